//! Hardware-independent boot/wake logic for the sensor node: alarm
//! arithmetic, the observation ring, the instructions protocol client, the
//! provisioning REPL, and the orchestrator tying them together behind a set
//! of platform capability traits (§1-§9).

pub mod alarm;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod instructions;
pub mod observation;
pub mod orchestrator;
pub mod persistent;
pub mod protocol;
pub mod repl;
pub mod ring;

pub use capabilities::{Clock, ConfigStore, Power, Sensor, SerialIo, Transport, TransportEvent};
pub use orchestrator::{run_wake, service_repl_byte, WakeAction};
pub use persistent::{BootMode, PersistentState};
