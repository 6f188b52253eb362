//! RTC-retained state: a single static placed in `.rtc.data` so it survives
//! deep sleep without serialization, mirroring the original firmware's
//! `RTC_DATA_ATTR` globals but collapsed into one `psn_core::PersistentState`.

use psn_core::PersistentState;

/// Matches the original firmware's `BUFFER_CAPACITY` (the ring's fixed
/// slot count); batch sizes the server can request are validated against
/// `psn_core::ring::RING_CAPACITY`, which must equal this value.
pub const RING_CAPACITY: usize = psn_core::ring::RING_CAPACITY;

#[link_section = ".rtc.data"]
static mut PERSISTENT_STATE: PersistentState<RING_CAPACITY> = PersistentState::empty();

/// Access to the RTC-retained state. Safe because the firmware is strictly
/// single-threaded: there is exactly one core running this code path, and no
/// interrupt handler touches `PERSISTENT_STATE`.
pub fn with_state<R>(f: impl FnOnce(&mut PersistentState<RING_CAPACITY>) -> R) -> R {
    unsafe { f(&mut *core::ptr::addr_of_mut!(PERSISTENT_STATE)) }
}
