//! Core-level error kinds. Every fallible operation in `psn-core` returns one
//! of these instead of the original firmware's bare `bool` return codes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    #[error("configuration payload was not valid JSON")]
    Malformed,
    #[error("ssid must be 1..=31 bytes")]
    InvalidSsid,
    #[error("enterprise network requires non-empty username and password")]
    MissingEnterpriseCredentials,
    #[error("username/password must be <=63 bytes")]
    CredentialTooLong,
    #[error("server address must be 1..=31 bytes")]
    InvalidServerAddress,
    #[error("server port must be >= 1024")]
    InvalidServerPort,
    #[error("timeout must be in 1..=13 seconds")]
    InvalidTimeout,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ReplError {
    #[error("command exceeded the 200 byte line limit")]
    LineTooLong,
    #[error("command body was not valid JSON for this command")]
    MalformedJson,
    #[error("configuration payload failed validation: {0}")]
    InvalidConfig(ConfigError),
    #[error("unrecognized command")]
    UnknownCommand,
}
