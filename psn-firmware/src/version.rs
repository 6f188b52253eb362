//! Centralized version information, reported over serial by `PING`.

pub const FIRMWARE_VERSION: &str = "v1.0-psn";

pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn full_version() -> String {
    format!("{} ({})", FIRMWARE_VERSION, CARGO_VERSION)
}
