//! End-to-end scenario tests driving `orchestrator::run_wake` against mock
//! capability implementations, one per named scenario.

use psn_core::capabilities::{Clock, ClockError, ConfigStore, ConfigStoreError, Power, Sensor, SerialIo, Transport, TransportEvent};
use psn_core::config::{Configuration, CredStr, ShortStr};
use psn_core::instructions::Instructions;
use psn_core::persistent::{BootMode, PersistentState};
use psn_core::{run_wake, WakeAction};
use std::collections::VecDeque;

struct MockClock {
    now: u32,
    valid: bool,
    alarm: Option<u32>,
}

impl Clock for MockClock {
    fn now(&self) -> u32 {
        self.now
    }
    fn is_time_valid(&self) -> bool {
        self.valid
    }
    fn set_time(&mut self, epoch_s: u32) -> Result<(), ClockError> {
        self.now = epoch_s;
        Ok(())
    }
    fn set_alarm(&mut self, at_epoch_s: u32) -> Result<(), ClockError> {
        self.alarm = Some(at_epoch_s);
        Ok(())
    }
}

struct MockSensor;
impl Sensor for MockSensor {
    fn read_temperature_c(&mut self) -> Option<f32> {
        Some(20.0)
    }
    fn read_relative_humidity_pct(&mut self) -> Option<f32> {
        Some(50.0)
    }
    fn read_battery_v(&mut self) -> Option<f32> {
        Some(4.0)
    }
}

struct MockConfigStore {
    stored: Option<Configuration>,
}
impl ConfigStore for MockConfigStore {
    fn load(&self) -> Result<Configuration, ConfigStoreError> {
        self.stored.clone().ok_or(ConfigStoreError)
    }
    fn save(&mut self, config: &Configuration) -> Result<(), ConfigStoreError> {
        self.stored = Some(config.clone());
        Ok(())
    }
}

fn sample_config() -> Configuration {
    Configuration {
        network_ssid: ShortStr::try_from("home-wifi").unwrap(),
        network_enterprise: false,
        network_username: CredStr::new(),
        network_password: CredStr::try_from("hunter2").unwrap(),
        server_address: ShortStr::try_from("logs.example.com").unwrap(),
        server_port: 8883,
        network_timeout_s: 5,
        server_timeout_s: 5,
    }
}

struct MockTransport {
    events: VecDeque<TransportEvent>,
    next_packet_id: u16,
    reachable: bool,
    publishes: Vec<String>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            next_packet_id: 1,
            reachable: true,
            publishes: Vec::new(),
        }
    }
}

impl Transport for MockTransport {
    fn connect_network(&mut self, _timeout_s: u8) -> bool {
        self.reachable
    }
    fn connect_server(&mut self, _timeout_s: u8) -> bool {
        self.reachable
    }
    fn publish(&mut self, topic: &str, payload: &str) -> Option<u16> {
        self.publishes.push(format!("{topic}|{payload}"));
        let id = self.next_packet_id;
        self.next_packet_id += 1;
        Some(id)
    }
    fn subscribe(&mut self, _topic_filter: &str) -> Option<u16> {
        let id = self.next_packet_id;
        self.next_packet_id += 1;
        Some(id)
    }
    fn try_recv_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

struct MockPower;
impl Power for MockPower {
    fn sleep_ms(&mut self, _ms: u32) {}
    fn arm_gpio_wake(&mut self) {}
    fn enter_deep_sleep(&mut self) -> ! {
        panic!("orchestrator must never call this directly")
    }
}

struct MockSerial {
    bytes: VecDeque<u8>,
}
impl SerialIo for MockSerial {
    fn wait_for_byte(&mut self, _timeout_s: u8) -> bool {
        !self.bytes.is_empty()
    }
    fn read_byte(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }
    fn write_all(&mut self, _bytes: &[u8]) {}
}

fn no_serial_host() -> MockSerial {
    MockSerial {
        bytes: VecDeque::new(),
    }
}

#[test]
fn s1_first_alarm_alignment() {
    let mut state: PersistentState<16> = PersistentState::new();
    let mut clock = MockClock {
        now: 1_717_236_221, // 2024-06-01 10:03:41Z
        valid: true,
        alarm: None,
    };
    let mut sensor = MockSensor;
    let mut config_store = MockConfigStore {
        stored: Some(sample_config()),
    };
    let mut transport = MockTransport::new();
    transport.events.push_back(TransportEvent::SubscribeAck { packet_id: 1 });
    transport.events.push_back(TransportEvent::Message {
        corr_id: 0,
        payload: r#"{"session_id":1,"interval":5,"batch_size":3}"#.into(),
    });
    let mut power = MockPower;
    let mut serial = no_serial_host();

    let action = run_wake(
        &mut state,
        "aa:bb:cc:dd:ee:ff",
        &mut clock,
        &mut sensor,
        &mut config_store,
        &mut transport,
        &mut power,
        &mut serial,
    );

    match action {
        WakeAction::SleepUntilAlarm { next_alarm_epoch_s } => {
            assert_eq!(next_alarm_epoch_s, 1_717_236_300); // 2024-06-01 10:05:00Z
        }
        other => panic!("expected SleepUntilAlarm, got {other:?}"),
    }
}

#[test]
fn s2_first_alarm_guard_skip() {
    let mut state: PersistentState<16> = PersistentState::new();
    let mut clock = MockClock {
        now: 1_717_236_299, // 2024-06-01 10:04:59Z
        valid: true,
        alarm: None,
    };
    let mut sensor = MockSensor;
    let mut config_store = MockConfigStore {
        stored: Some(sample_config()),
    };
    let mut transport = MockTransport::new();
    transport.events.push_back(TransportEvent::SubscribeAck { packet_id: 1 });
    transport.events.push_back(TransportEvent::Message {
        corr_id: 0,
        payload: r#"{"session_id":1,"interval":5,"batch_size":3}"#.into(),
    });
    let mut power = MockPower;
    let mut serial = no_serial_host();

    let action = run_wake(
        &mut state,
        "aa:bb:cc:dd:ee:ff",
        &mut clock,
        &mut sensor,
        &mut config_store,
        &mut transport,
        &mut power,
        &mut serial,
    );

    match action {
        WakeAction::SleepUntilAlarm { next_alarm_epoch_s } => {
            assert_eq!(next_alarm_epoch_s, 1_717_236_600); // 2024-06-01 10:10:00Z
        }
        other => panic!("expected SleepUntilAlarm, got {other:?}"),
    }
}

#[test]
fn s3_batch_gating_accumulates_then_drains() {
    let mut state: PersistentState<16> = PersistentState::new();
    state.boot_mode = BootMode::Operational;
    state.instructions = Some(Instructions {
        stream_id: 1,
        interval_min: 5,
        batch_size: 3,
    });

    let mut sensor = MockSensor;
    let mut config_store = MockConfigStore {
        stored: Some(sample_config()),
    };
    let mut power = MockPower;

    let mut now = 1_717_236_221u32;
    for _ in 0..3 {
        let mut clock = MockClock {
            now,
            valid: true,
            alarm: None,
        };
        let mut transport = MockTransport::new();
        transport.reachable = false; // unreachable transport for the first three wakes
        let action = psn_core::orchestrator::run_wake(
            &mut state,
            "aa:bb:cc:dd:ee:ff",
            &mut clock,
            &mut sensor,
            &mut config_store,
            &mut transport,
            &mut power,
            &mut no_serial_host(),
        );
        assert!(matches!(action, WakeAction::SleepUntilAlarm { .. }));
        now += 300;
    }

    assert_eq!(state.ring.len(), 3);

    // Fourth wake: transport is up, all three observations transmit.
    let mut clock = MockClock {
        now,
        valid: true,
        alarm: None,
    };
    let mut transport = MockTransport::new();
    // The subscribe call consumes the transport's first packet id (1); the
    // three observation responses are matched by the protocol client's own
    // corr_id counter, which starts at `state.next_corr_id` (0, untouched by
    // this scenario since it never went through instructions acquisition).
    transport.events.push_back(TransportEvent::SubscribeAck { packet_id: 1 });
    for corr_id in 0..3u16 {
        transport.events.push_back(TransportEvent::Message {
            corr_id,
            payload: "ok".into(),
        });
    }
    let action = psn_core::orchestrator::run_wake(
        &mut state,
        "aa:bb:cc:dd:ee:ff",
        &mut clock,
        &mut sensor,
        &mut config_store,
        &mut transport,
        &mut power,
        &mut no_serial_host(),
    );
    assert!(matches!(action, WakeAction::SleepUntilAlarm { .. }));
    assert!(state.ring.is_empty());
}

#[test]
fn s4_no_session_terminates_permanently() {
    let mut state: PersistentState<16> = PersistentState::new();
    state.boot_mode = BootMode::Operational;
    state.instructions = Some(Instructions {
        stream_id: 1,
        interval_min: 5,
        batch_size: 3,
    });

    let mut clock = MockClock {
        now: 1_717_236_221,
        valid: true,
        alarm: None,
    };
    let mut sensor = MockSensor;
    let mut config_store = MockConfigStore {
        stored: Some(sample_config()),
    };
    let mut transport = MockTransport::new();
    transport.events.push_back(TransportEvent::SubscribeAck { packet_id: 1 });
    transport.events.push_back(TransportEvent::Message {
        corr_id: 0,
        payload: "no_session".into(),
    });
    let mut power = MockPower;

    let initial_len = state.ring.len(); // 0 before the new sample is pushed this wake

    let action = psn_core::orchestrator::run_wake(
        &mut state,
        "aa:bb:cc:dd:ee:ff",
        &mut clock,
        &mut sensor,
        &mut config_store,
        &mut transport,
        &mut power,
        &mut no_serial_host(),
    );

    // One observation was pushed this wake then immediately popped on NoSession.
    assert_eq!(state.ring.len(), initial_len);
    assert_eq!(action, WakeAction::SleepIndefinitely);
    assert_eq!(state.boot_mode, BootMode::Cold);
}

#[test]
fn s6_correlation_mismatch_ignored_then_times_out() {
    use psn_core::protocol::ProtocolClient;

    let mut client = ProtocolClient::new("aa:bb:cc:dd:ee:ff".to_string(), 42);
    let mut transport = MockTransport::new();
    transport.events.push_back(TransportEvent::Message {
        corr_id: 41,
        payload: "ok".into(),
    });
    let mut power = MockPower;

    let result = client.send_observation(&mut transport, &mut power, "{}", 2);
    assert_eq!(result, psn_core::protocol::ObservationResult::Fail);
}
