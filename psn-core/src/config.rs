//! Device configuration: the fields persisted under the `psn` namespace in
//! the platform's `ConfigStore` (§6), plus the validation rules the original
//! firmware's serial `WRITE_CONFIG` handler enforced field-by-field.

use crate::error::ConfigError;
use heapless::String as HString;
use serde::{Deserialize, Serialize};

/// SSID and server address are capped at 31 bytes, credentials at 63 bytes,
/// matching the NVS string key limits in §6.
pub type ShortStr = HString<31>;
pub type CredStr = HString<63>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub network_ssid: ShortStr,
    pub network_enterprise: bool,
    pub network_username: CredStr,
    pub network_password: CredStr,
    pub server_address: ShortStr,
    pub server_port: u16,
    pub network_timeout_s: u8,
    pub server_timeout_s: u8,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_ssid.is_empty() {
            return Err(ConfigError::InvalidSsid);
        }
        if self.network_username.len() > 63 || self.network_password.len() > 63 {
            return Err(ConfigError::CredentialTooLong);
        }
        if self.network_enterprise
            && (self.network_username.is_empty() || self.network_password.is_empty())
        {
            return Err(ConfigError::MissingEnterpriseCredentials);
        }
        if self.server_address.is_empty() {
            return Err(ConfigError::InvalidServerAddress);
        }
        if self.server_port < 1024 {
            return Err(ConfigError::InvalidServerPort);
        }
        if !(1..=13).contains(&self.network_timeout_s) || !(1..=13).contains(&self.server_timeout_s)
        {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn logger_timeout_secs(&self) -> u32 {
        self.server_timeout_s as u32
    }

    pub fn network_timeout_secs(&self) -> u32 {
        self.network_timeout_s as u32
    }
}

/// Parses and validates a `WRITE_CONFIG`/REPL JSON body. Field names follow
/// §6's NVS key names (`nnam`, `nent`, `nunm`, `npwd`, `ladr`, `lprt`, `tnet`,
/// `tlog`) so the wire format and the storage format stay identical.
pub fn parse_and_validate(json: &str) -> Result<Configuration, ConfigError> {
    #[derive(Deserialize)]
    struct Raw {
        nnam: String,
        nent: bool,
        nunm: String,
        npwd: String,
        ladr: String,
        lprt: u16,
        tnet: u8,
        tlog: u8,
    }

    let raw: Raw = serde_json::from_str(json).map_err(|_| ConfigError::Malformed)?;

    let network_ssid = ShortStr::try_from(raw.nnam.as_str()).map_err(|_| ConfigError::InvalidSsid)?;
    let network_username =
        CredStr::try_from(raw.nunm.as_str()).map_err(|_| ConfigError::CredentialTooLong)?;
    let network_password =
        CredStr::try_from(raw.npwd.as_str()).map_err(|_| ConfigError::CredentialTooLong)?;
    let server_address =
        ShortStr::try_from(raw.ladr.as_str()).map_err(|_| ConfigError::InvalidServerAddress)?;

    let config = Configuration {
        network_ssid,
        network_enterprise: raw.nent,
        network_username,
        network_password,
        server_address,
        server_port: raw.lprt,
        network_timeout_s: raw.tnet,
        server_timeout_s: raw.tlog,
    };

    config.validate()?;
    Ok(config)
}
