/*!
Error type shared by every daemon component
*/

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutobackupError>;

#[derive(Error, Debug)]
pub enum AutobackupError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid character {0:?} in pulse pattern (only '0' and '1' allowed)")]
    InvalidPattern(char),

    #[error("Backup of {label} failed: {reason}")]
    BackupFailed { label: String, reason: String },

    #[error("Notification via {handler} failed: {reason}")]
    NotificationFailed { handler: &'static str, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Device event source failed: {0}")]
    EventSource(String),

    #[error("Device state lock poisoned")]
    StatePoisoned,
}

impl AutobackupError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        AutobackupError::InvalidConfig(msg.into())
    }
}
