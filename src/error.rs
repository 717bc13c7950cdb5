//! Error types for the pneumatic control stack.
//!
//! Startup failures (`DeviceNotFound`, `LinkUnavailable`, `Config`) abort before any
//! actuation. Protocol faults during a run are recoverable: the control loop skips the
//! tick and keeps the link open.

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No serial device matched at discovery time
    #[error("No serial device matching '{0}' found")]
    DeviceNotFound(String),

    /// Port failed to open or never reported the setup banner
    #[error("Actuator link unavailable: {0}")]
    LinkUnavailable(String),

    /// Response line could not be parsed as the awaited kind
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// No complete response line before the deadline
    #[error("No {awaited} response within {timeout:?}")]
    ProtocolTimeout {
        awaited: &'static str,
        timeout: Duration,
    },

    /// Position tracker produced no usable sample
    #[error("Position source unavailable: {0}")]
    PositionUnavailable(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The control loop has stopped and no longer accepts commands
    #[error("Command channel closed")]
    CommandChannelClosed,
}

impl Error {
    /// Faults that cost one control tick but leave the link usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ProtocolDecode(_) | Error::ProtocolTimeout { .. } | Error::PositionUnavailable(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
