//! Trait seams between `psn-core` and the platform. Every external
//! collaborator out of this crate's scope (§1) is represented here as a
//! trait the orchestrator is generic over, so the whole state machine can be
//! driven by mock implementations on the development host.

use crate::config::Configuration;

/// Real-time clock: wall time, validity, and a one-shot alarm.
pub trait Clock {
    /// Current time as epoch seconds. Meaningless if `is_time_valid()` is
    /// false, but still total (never panics).
    fn now(&self) -> u32;

    /// False if the driver reports an error or the clock has never been set
    /// (e.g. RTC backup battery was removed).
    fn is_time_valid(&self) -> bool;

    /// Sets the device time (used by `WRITE_TIME`).
    fn set_time(&mut self, epoch_s: u32) -> Result<(), ClockError>;

    /// Arms the one-shot alarm to fire at `at_epoch_s` and enables the square
    /// wave / interrupt output on the designated pin.
    fn set_alarm(&mut self, at_epoch_s: u32) -> Result<(), ClockError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockError;

/// Sensor acquisition. Each reading is attempted independently; a failure
/// leaves the corresponding `Observation` field at `None` rather than
/// aborting the whole sample.
pub trait Sensor {
    fn read_temperature_c(&mut self) -> Option<f32>;
    fn read_relative_humidity_pct(&mut self) -> Option<f32>;
    fn read_battery_v(&mut self) -> Option<f32>;
}

/// Persistent configuration storage.
pub trait ConfigStore {
    fn load(&self) -> Result<Configuration, ConfigStoreError>;
    fn save(&mut self, config: &Configuration) -> Result<(), ConfigStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigStoreError;

/// One event delivered from the transport's background IO task into the
/// orchestrator's non-blocking mailbox (Design Note §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SubscribeAck { packet_id: u16 },
    Message { corr_id: u16, payload: String },
    Disconnected,
}

/// Pub/sub transport. `connect_network`/`connect_server` are blocking calls
/// bounded by the given timeout; `publish`/`subscribe` enqueue asynchronously
/// and report completion later via [`TransportEvent`]s drained through
/// `try_recv_event`.
pub trait Transport {
    fn connect_network(&mut self, timeout_s: u8) -> bool;
    fn connect_server(&mut self, timeout_s: u8) -> bool;

    /// Publishes `payload` to `topic` at QoS 0. Returns the packet id on
    /// successful enqueue, or `None` if the publish could not be enqueued at
    /// all (distinct from a later delivery failure, which arrives as a
    /// timeout with no matching event).
    fn publish(&mut self, topic: &str, payload: &str) -> Option<u16>;

    /// Subscribes to `topic_filter` at QoS 0. Returns the packet id used to
    /// match the eventual `SubscribeAck`.
    fn subscribe(&mut self, topic_filter: &str) -> Option<u16>;

    /// Drains one pending event from the mailbox, if any, without blocking.
    fn try_recv_event(&mut self) -> Option<TransportEvent>;
}

/// Platform sleep/wake primitives.
pub trait Power {
    /// Blocking delay, used only for the protocol layer's ~1s poll cadence.
    fn sleep_ms(&mut self, ms: u32);

    /// Arms the external GPIO (active low) as a wake source for the next
    /// deep sleep. Idempotent.
    fn arm_gpio_wake(&mut self);

    /// Enters deep sleep using whatever wake sources are currently armed.
    /// Never returns: on real hardware this resets the chip; host test
    /// doubles should treat a call to this as a logic error in the caller,
    /// since `psn_core::orchestrator` never calls it directly (see
    /// [`crate::orchestrator::WakeAction`]).
    fn enter_deep_sleep(&mut self) -> !;
}

/// Serial provisioning port, used only once on cold boot.
pub trait SerialIo {
    /// Blocks up to `timeout_s` waiting for the first byte to arrive.
    /// Returns `true` if a byte is now available to read.
    fn wait_for_byte(&mut self, timeout_s: u8) -> bool;

    /// Non-blocking single-byte read.
    fn read_byte(&mut self) -> Option<u8>;

    fn write_all(&mut self, bytes: &[u8]);
}
