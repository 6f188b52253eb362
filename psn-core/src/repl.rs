//! Serial provisioning REPL (§4.4): byte-at-a-time line assembly plus the
//! PING/READ_CONFIG/WRITE_CONFIG/READ_TIME/WRITE_TIME command set. Used only
//! during the `AwaitingInstructions` fallback and initial factory setup.

use crate::capabilities::{Clock, ConfigStore};
use crate::config::{parse_and_validate, Configuration};
use crate::error::ReplError;
use crate::observation::format_iso8601_utc;
use heapless::Vec as HVec;
use serde::Deserialize;

/// Maximum command line length the original firmware's serial reader
/// enforced; a line exceeding this sets an overflow flag and is discarded.
pub const MAX_LINE_LEN: usize = 200;

/// Accumulates bytes into newline-delimited command lines.
#[derive(Debug)]
pub struct LineAssembler {
    buf: HVec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buf: HVec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte. Returns `Some(line)` once a `\n` completes a line; the
    /// trailing `\r`, if any, is trimmed. A line that exceeded
    /// [`MAX_LINE_LEN`] before its terminator is reported as `Err`, and the
    /// assembler is reset so the next line starts clean.
    pub fn push_byte(&mut self, byte: u8) -> Option<Result<String, ReplError>> {
        if byte == b'\n' {
            let overflowed = self.overflowed;
            let mut line = String::from_utf8_lossy(&self.buf).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            self.buf.clear();
            self.overflowed = false;
            return Some(if overflowed {
                Err(ReplError::LineTooLong)
            } else {
                Ok(line)
            });
        }

        if self.buf.push(byte).is_err() {
            self.overflowed = true;
        }
        None
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// One parsed command, ready to dispatch against the platform traits.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    ReadConfig,
    WriteConfig(String),
    ReadTime,
    WriteTime(u32),
}

/// Splits a line into a command and looks up its variant. The body of
/// `WRITE_CONFIG`/`WRITE_TIME` is whatever follows the first space,
/// unvalidated at this stage.
pub fn parse_command(line: &str) -> Result<Command, ReplError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    match verb {
        "PING" => Ok(Command::Ping),
        "READ_CONFIG" => Ok(Command::ReadConfig),
        "WRITE_CONFIG" => Ok(Command::WriteConfig(rest.to_string())),
        "READ_TIME" => Ok(Command::ReadTime),
        "WRITE_TIME" => {
            #[derive(Deserialize)]
            struct RawTime {
                time: u32,
            }
            let raw: RawTime = serde_json::from_str(rest).map_err(|_| ReplError::MalformedJson)?;
            Ok(Command::WriteTime(raw.time))
        }
        _ => Err(ReplError::UnknownCommand),
    }
}

/// Executes one command against the platform, returning the line to write
/// back to the serial port (without a trailing newline; the caller appends
/// one).
pub fn handle_command<C: Clock, S: ConfigStore>(
    command: Command,
    mac: &str,
    clock: &mut C,
    config_store: &mut S,
) -> String {
    match command {
        Command::Ping => "PSN_NODE".to_string(),

        Command::ReadConfig => match config_store.load() {
            Ok(cfg) => serialize_config_for_repl(mac, &cfg),
            Err(_) => "ERROR".to_string(),
        },

        Command::WriteConfig(body) => match parse_and_validate(&body) {
            Ok(cfg) => match config_store.save(&cfg) {
                Ok(()) => "OK".to_string(),
                Err(_) => "ERROR".to_string(),
            },
            Err(_) => "ERROR".to_string(),
        },

        Command::ReadTime => format!(
            r#"{{"time":"{}","tvld":{}}}"#,
            format_iso8601_utc(clock.now()),
            clock.is_time_valid()
        ),

        Command::WriteTime(epoch_s) => match clock.set_time(epoch_s) {
            Ok(()) => "OK".to_string(),
            Err(_) => "ERROR".to_string(),
        },
    }
}

fn serialize_config_for_repl(mac: &str, cfg: &Configuration) -> String {
    format!(
        r#"{{"madr":"{}","nnam":"{}","nent":{},"nunm":"{}","npwd":"{}","ladr":"{}","lprt":{},"tnet":{},"tlog":{}}}"#,
        mac,
        cfg.network_ssid,
        cfg.network_enterprise,
        cfg.network_username,
        cfg.network_password,
        cfg.server_address,
        cfg.server_port,
        cfg.network_timeout_s,
        cfg.server_timeout_s,
    )
}
