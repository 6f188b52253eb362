//! State carried across deep sleep in RTC-retained RAM (§3, §6). The struct
//! itself is plain old data; the firmware crate is responsible for placing an
//! instance of it in `.rtc.data` via `#[link_section]`, which is why nothing
//! here derives `Serialize`/`Deserialize` — the bytes survive in place and
//! never need encoding.

use crate::instructions::Instructions;
use crate::ring::ObservationRing;

/// Distinguishes a true cold boot (power applied, backup battery removed or
/// first-ever boot) from a wake from deep sleep, mirroring the original
/// firmware's `boot_mode` RTC global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Cold,
    AwaitingInstructions,
    Operational,
}

impl Default for BootMode {
    fn default() -> Self {
        BootMode::Cold
    }
}

/// Bounded retry counter for the AwaitingInstructions phase (§4.5.2). The
/// node gives up and falls back to serial provisioning mode after
/// `MAX_RETRIES` consecutive failures to obtain instructions.
pub const MAX_INSTRUCTIONS_RETRIES: u8 = 5;

#[derive(Debug, Clone)]
pub struct PersistentState<const RING_N: usize> {
    pub boot_mode: BootMode,
    pub instructions_retries: u8,
    pub instructions: Option<Instructions>,
    pub ring: ObservationRing<RING_N>,
    pub next_corr_id: u16,
    pub next_alarm_epoch_s: Option<u32>,
}

impl<const RING_N: usize> Default for PersistentState<RING_N> {
    fn default() -> Self {
        Self {
            boot_mode: BootMode::default(),
            instructions_retries: 0,
            instructions: None,
            ring: ObservationRing::new(),
            next_corr_id: 0,
            next_alarm_epoch_s: None,
        }
    }
}

impl<const RING_N: usize> PersistentState<RING_N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `const fn` equivalent of [`Default::default`], usable as the initial
    /// value of a `static` the firmware crate places in `.rtc.data`.
    pub const fn empty() -> Self {
        Self {
            boot_mode: BootMode::Cold,
            instructions_retries: 0,
            instructions: None,
            ring: ObservationRing::new(),
            next_corr_id: 0,
            next_alarm_epoch_s: None,
        }
    }

    /// True once the instructions retry budget is exhausted (§4.5.2 edge
    /// case): the node must fall back to serial provisioning rather than
    /// retry again on the next wake.
    pub fn instructions_retries_exhausted(&self) -> bool {
        self.instructions_retries >= MAX_INSTRUCTIONS_RETRIES
    }

    pub fn record_instructions_failure(&mut self) {
        self.instructions_retries = self.instructions_retries.saturating_add(1);
    }

    pub fn adopt_instructions(&mut self, instructions: Instructions) {
        self.instructions = Some(instructions);
        self.instructions_retries = 0;
        self.boot_mode = BootMode::Operational;
    }

    /// Resets everything that must not survive a true cold boot: the
    /// correlation-id counter (Design Note §9, first open question) and any
    /// prior session's instructions/ring contents.
    pub fn reset_for_cold_boot(&mut self) {
        *self = Self::default();
    }
}
