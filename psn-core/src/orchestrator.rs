//! Boot/wake state machine (§4.5). `run_wake` is the single entry point the
//! firmware's `main` calls on every wake from reset or deep sleep; it never
//! sleeps the chip itself, returning a [`WakeAction`] instead so the whole
//! state machine stays host-testable against mock capabilities.

use crate::alarm::{first_aligned, ALARM_THRESHOLD};
use crate::capabilities::{Clock, ConfigStore, Power, Sensor, SerialIo, Transport};
use crate::config::Configuration;
use crate::observation::Observation;
use crate::persistent::{BootMode, PersistentState};
use crate::protocol::{InstructionsResult, ObservationResult, ProtocolClient};
use crate::repl::{parse_command, handle_command, LineAssembler};

/// What `main` must do once `run_wake` returns. The orchestrator decides
/// this; only the firmware binary is allowed to act on it, since
/// [`Power::enter_deep_sleep`] never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    /// Deep sleep with no wake source armed at all. Only a manual reset
    /// (power cycle or the reset button) recovers the node from this state
    /// (§7 terminal environment: invalid RTC, invalid configuration, an
    /// unreadable ConfigStore, or a server-reported NoSession).
    SleepIndefinitely,
    /// Deep sleep until `next_alarm_epoch_s`, the RTC alarm already armed.
    SleepUntilAlarm { next_alarm_epoch_s: u32 },
    /// Stay awake servicing the serial provisioning REPL; `main` loops
    /// calling `service_repl_byte` until the user disconnects.
    StayAwakeForProvisioning,
}

/// How long, in seconds, the node waits for a byte on the serial port before
/// concluding nobody is attached and falling back to scheduled operation.
const SERIAL_PROVISIONING_TIMEOUT_S: u8 = 5;

/// Runs one full wake cycle: cold boot provisioning, instructions
/// acquisition, or a scheduled observation/report cycle, depending on
/// `state.boot_mode`.
pub fn run_wake<const RING_N: usize, CL, SE, CS, TR, PW, SI>(
    state: &mut PersistentState<RING_N>,
    mac: &str,
    clock: &mut CL,
    sensor: &mut SE,
    config_store: &mut CS,
    transport: &mut TR,
    power: &mut PW,
    serial: &mut SI,
) -> WakeAction
where
    CL: Clock,
    SE: Sensor,
    CS: ConfigStore,
    TR: Transport,
    PW: Power,
    SI: SerialIo,
{
    match state.boot_mode {
        BootMode::Cold => cold_boot(state, mac, clock, config_store, transport, power, serial),
        BootMode::AwaitingInstructions => {
            awaiting_instructions(state, mac, clock, config_store, transport, power, serial)
        }
        BootMode::Operational => operational(state, mac, clock, sensor, config_store, transport, power),
    }
}

/// §4.5.1: on a true cold boot, try serial provisioning first; if nobody is
/// attached within the timeout, fall straight through to requesting
/// instructions instead of sleeping with no configuration at all.
fn cold_boot<const RING_N: usize, CL, CS, TR, PW, SI>(
    state: &mut PersistentState<RING_N>,
    mac: &str,
    clock: &mut CL,
    config_store: &mut CS,
    transport: &mut TR,
    power: &mut PW,
    serial: &mut SI,
) -> WakeAction
where
    CL: Clock,
    CS: ConfigStore,
    TR: Transport,
    PW: Power,
    SI: SerialIo,
{
    state.reset_for_cold_boot();

    if serial.wait_for_byte(SERIAL_PROVISIONING_TIMEOUT_S) {
        log::info!("serial host detected, entering provisioning mode");
        return WakeAction::StayAwakeForProvisioning;
    }

    // No human to run WRITE_TIME this wake; a dead RTC is unrecoverable here.
    if !clock.is_time_valid() {
        log::error!("RTC invalid, sleeping permanently");
        return WakeAction::SleepIndefinitely;
    }

    log::info!("no serial host detected, proceeding to instructions acquisition");
    state.boot_mode = BootMode::AwaitingInstructions;
    awaiting_instructions(state, mac, clock, config_store, transport, power, serial)
}

/// Services one byte of the provisioning REPL. `main` calls this in a loop
/// for as long as [`WakeAction::StayAwakeForProvisioning`] was returned.
pub fn service_repl_byte<CL: Clock, CS: ConfigStore>(
    assembler: &mut LineAssembler,
    byte: u8,
    mac: &str,
    clock: &mut CL,
    config_store: &mut CS,
    serial: &mut impl SerialIo,
) {
    let Some(result) = assembler.push_byte(byte) else {
        return;
    };

    let response = match result {
        Ok(line) => match parse_command(&line) {
            Ok(command) => handle_command(command, mac, clock, config_store),
            Err(_) => "ERROR".to_string(),
        },
        Err(_) => "ERROR".to_string(),
    };

    serial.write_all(response.as_bytes());
    serial.write_all(b"\n");
}

/// §4.5.2: connect, subscribe, request instructions. On success, schedule the
/// first aligned observation and move to Operational. On failure, count the
/// retry and sleep briefly before trying again; once retries are exhausted,
/// fall back to serial provisioning.
fn awaiting_instructions<const RING_N: usize, CL, CS, TR, PW, SI>(
    state: &mut PersistentState<RING_N>,
    mac: &str,
    clock: &mut CL,
    config_store: &mut CS,
    transport: &mut TR,
    power: &mut PW,
    _serial: &mut SI,
) -> WakeAction
where
    CL: Clock,
    CS: ConfigStore,
    TR: Transport,
    PW: Power,
    SI: SerialIo,
{
    state.boot_mode = BootMode::AwaitingInstructions;

    if !clock.is_time_valid() {
        log::error!("RTC invalid, sleeping permanently");
        return WakeAction::SleepIndefinitely;
    }

    let config = match config_store.load() {
        Ok(cfg) => cfg,
        Err(_) => {
            log::warn!("no configuration stored, cannot connect");
            return give_up_or_retry(state);
        }
    };

    if !connect(&config, transport) {
        log::warn!("failed to connect to network/server");
        return give_up_or_retry(state);
    }

    let mut client = ProtocolClient::new(mac.to_string(), state.next_corr_id);
    let server_timeout = config.server_timeout_s;

    if !client.subscribe(transport, power, server_timeout) {
        state.next_corr_id = client.corr_id_seed();
        log::warn!("subscribe ack not received");
        return give_up_or_retry(state);
    }

    let result = client.get_instructions(transport, power, server_timeout);
    state.next_corr_id = client.corr_id_seed();

    match result {
        InstructionsResult::Ok(instructions) => {
            log::info!("instructions received: interval={}m batch={}", instructions.interval_min, instructions.batch_size);
            state.adopt_instructions(instructions);
            let now = clock.now();
            let alarm_at = first_aligned(now, instructions.interval_secs(), ALARM_THRESHOLD);
            arm_alarm(state, clock, alarm_at);
            WakeAction::SleepUntilAlarm {
                next_alarm_epoch_s: alarm_at,
            }
        }
        InstructionsResult::NoSession | InstructionsResult::Fail => {
            log::warn!("instructions request did not succeed");
            give_up_or_retry(state)
        }
    }
}

fn give_up_or_retry<const RING_N: usize>(state: &mut PersistentState<RING_N>) -> WakeAction {
    state.record_instructions_failure();
    if state.instructions_retries_exhausted() {
        log::warn!("instructions retry budget exhausted, falling back to provisioning");
        state.boot_mode = BootMode::Cold;
        return WakeAction::SleepIndefinitely;
    }
    // Short fixed backoff; a real alarm will be reprogrammed on the retry.
    WakeAction::SleepUntilAlarm {
        next_alarm_epoch_s: state.next_alarm_epoch_s.unwrap_or(0),
    }
}

/// §4.5.3-§4.5.5: scheduled wake. Arms the next alarm first (so a crash
/// during the transmit loop cannot leave the node without a future wake
/// source), samples a new observation, pushes it, then attempts to drain the
/// ring while time remains before the next alarm.
fn operational<const RING_N: usize, CL, SE, CS, TR, PW>(
    state: &mut PersistentState<RING_N>,
    mac: &str,
    clock: &mut CL,
    sensor: &mut SE,
    config_store: &mut CS,
    transport: &mut TR,
    power: &mut PW,
) -> WakeAction
where
    CL: Clock,
    SE: Sensor,
    CS: ConfigStore,
    TR: Transport,
    PW: Power,
{
    if !clock.is_time_valid() {
        log::error!("RTC invalid, sleeping permanently");
        return WakeAction::SleepIndefinitely;
    }

    let Some(instructions) = state.instructions else {
        log::warn!("operational wake with no instructions, reverting to acquisition");
        state.boot_mode = BootMode::AwaitingInstructions;
        return WakeAction::SleepIndefinitely;
    };

    let config = match config_store.load() {
        Ok(cfg) => cfg,
        Err(_) => {
            log::warn!("no configuration stored during operational wake");
            return WakeAction::SleepIndefinitely;
        }
    };

    let now = clock.now();
    let next_alarm = now + instructions.interval_secs();
    arm_alarm(state, clock, next_alarm);

    state.ring.push(sample_observation(now, sensor));

    let mut no_session = false;

    if connect(&config, transport) {
        let mut client = ProtocolClient::new(mac.to_string(), state.next_corr_id);
        let server_timeout = config.server_timeout_s;

        if client.subscribe(transport, power, server_timeout) {
            no_session = drain_ring(state, &mut client, transport, power, instructions.stream_id, server_timeout, next_alarm, clock);
        } else {
            log::warn!("subscribe failed during operational wake, deferring transmit");
        }

        state.next_corr_id = client.corr_id_seed();
    } else {
        log::warn!("connect failed during operational wake, deferring transmit");
    }

    if no_session {
        // §7: the server explicitly reports no active session. Terminate
        // permanently rather than wake again on the alarm just armed.
        log::warn!("server reports no session, terminating until manual reset");
        state.instructions = None;
        state.boot_mode = BootMode::Cold;
        return WakeAction::SleepIndefinitely;
    }

    WakeAction::SleepUntilAlarm {
        next_alarm_epoch_s: next_alarm,
    }
}

/// §4.5.5: transmit the oldest queued observation repeatedly while the ring
/// is non-empty and there's enough time left before the next alarm to risk
/// another round trip. Returns `true` if the server reported NoSession,
/// signalling the caller to terminate permanently (§7, invariant 6, S4).
fn drain_ring<const RING_N: usize, TR, PW, CL>(
    state: &mut PersistentState<RING_N>,
    client: &mut ProtocolClient,
    transport: &mut TR,
    power: &mut PW,
    stream_id: u16,
    server_timeout: u8,
    next_alarm_epoch_s: u32,
    clock: &mut CL,
) -> bool
where
    TR: Transport,
    PW: Power,
    CL: Clock,
{
    while let Some(observation) = state.ring.peek_oldest() {
        let now = clock.now();
        if next_alarm_epoch_s.saturating_sub(now) < server_timeout as u32 + ALARM_THRESHOLD {
            log::info!("not enough time left before next alarm, deferring remaining reports");
            break;
        }

        let payload = observation.to_wire_json(stream_id);
        match client.send_observation(transport, power, &payload, server_timeout) {
            ObservationResult::Success { fresh_instructions } => {
                state.ring.pop_oldest();
                if let Some(instructions) = fresh_instructions {
                    log::info!("adopting fresh instructions from report response");
                    state.adopt_instructions(instructions);
                }
            }
            ObservationResult::NoSession => {
                state.ring.pop_oldest();
                return true;
            }
            ObservationResult::Fail => {
                log::warn!("report delivery failed, leaving observation queued");
                break;
            }
        }
    }
    false
}

fn sample_observation<SE: Sensor>(now: u32, sensor: &mut SE) -> Observation {
    Observation {
        time: now,
        air_temp_c: sensor.read_temperature_c(),
        relative_humidity_pct: sensor.read_relative_humidity_pct(),
        battery_v: sensor.read_battery_v(),
    }
}

fn connect<TR: Transport>(config: &Configuration, transport: &mut TR) -> bool {
    transport.connect_network(config.network_timeout_s) && transport.connect_server(config.server_timeout_s)
}

fn arm_alarm<const RING_N: usize, CL: Clock>(
    state: &mut PersistentState<RING_N>,
    clock: &mut CL,
    at_epoch_s: u32,
) {
    if let Err(_) = clock.set_alarm(at_epoch_s) {
        log::error!("failed to arm RTC alarm for {at_epoch_s}");
    }
    state.next_alarm_epoch_s = Some(at_epoch_s);
}
