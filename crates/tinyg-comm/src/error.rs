//! Driver errors

use thiserror::Error;

use crate::port::PortNumber;

/// Result alias used throughout the driver
pub type Result<T> = std::result::Result<T, CommError>;

/// Errors that can occur while managing ports or exchanging commands
#[derive(Error, Debug)]
pub enum CommError {
    #[error("Bad port number: {0}")]
    BadPort(u32),

    #[error("{0} is not an RS-232 serial port")]
    NotASerialPort(PortNumber),

    #[error("Too many open ports")]
    TooManyPorts,

    #[error("Port registry in use, teardown skipped")]
    Busy,

    #[error("OS error (code {code:?}): {message}")]
    Os { code: Option<i32>, message: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timed out waiting for device")]
    Timeout,

    #[error("Device rejected command (NAK): {}", String::from_utf8_lossy(.0))]
    ProtocolNak(Vec<u8>),

    #[error("{0} is not open")]
    NotOpen(PortNumber),

    #[error("No port selected")]
    NoPortSelected,

    #[error("Response buffer full")]
    BufferFull,

    #[error("Echo mismatch: sent {expected:#04x}, received {received:?}")]
    EchoMismatch { expected: u8, received: Option<u8> },

    #[error("Unsupported line setting: {0}")]
    UnsupportedSetting(&'static str),

    #[error("Port discovery failed: {0}")]
    Discovery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommError {
    /// Build an OS error from a platform error code and message
    pub fn os(code: Option<i32>, message: impl Into<String>) -> Self {
        CommError::Os {
            code,
            message: message.into(),
        }
    }

    /// True for failures that mean the device went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CommError::Disconnected)
    }
}

impl From<serialport::Error> for CommError {
    fn from(e: serialport::Error) -> Self {
        CommError::os(None, e.description)
    }
}
