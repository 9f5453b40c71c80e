//! # TinyG Comm
//!
//! Serial transport and command/response driver for TinyG motion controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A fixed-capacity registry of open serial ports with a selected port
//! - Automatic reconnect that restores the caller's line configuration
//! - Byte I/O with a one-byte read-ahead cache and disconnect detection
//! - ACK/NAK, delimiter, line, fixed-length and echo-verified exchanges
//! - Port discovery by manufacturer string
//! - Modem control lines and break
//! - Chunked block transfers across several ports
//! - An interactive terminal session and device property reports
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tinyg_comm::prelude::*;
//!
//! let mut enumerator = SerialportEnumerator::new();
//! let port = locate_device(&mut enumerator, FTDI_MANUFACTURER)?;
//!
//! let mut driver = SerialDriver::system();
//! driver.open(port)?;
//! driver.set_line_config(LineConfig::with_baud(115200))?;
//!
//! let reply = driver.cmdio_delimited(b" \r", Duration::from_secs(10), 256, b"\n")?;
//! println!("{}", String::from_utf8_lossy(&reply));
//! ```

pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod shutdown;
pub mod signals;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DataBits, DriverConfig, FlowControl, LineConfig, Parity, StopBits};
    pub use crate::discovery::{
        is_serial_port, locate_device, ModeListing, PnpDump, PortEnumerator,
        SerialportEnumerator, FTDI_MANUFACTURER,
    };
    pub use crate::driver::{Chunk, Poll, SerialDriver, TerminalOptions};
    pub use crate::error::{CommError, Result};
    pub use crate::port::{DeviceProperties, PortNumber, SerialBackend, SerialDevice, SystemBackend};
    pub use crate::protocol::{Exchange, LineEnding, Terminator, Transmit};
    pub use crate::registry::ConnectionState;
    pub use crate::signals::{LineErrors, ModemSignals, RxByte};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ports tracked at once unless configured otherwise
pub const DEFAULT_MAX_PORTS: usize = 10;

/// Highest port number accepted (COM255)
pub const MAX_PORT_NUMBER: u32 = 255;

/// Positive acknowledgement, ends a successful reply
pub const ACK: u8 = 0x06;

/// Negative acknowledgement, ends a rejected reply
pub const NAK: u8 = 0x15;

/// Carriage return
pub const CR: u8 = 0x0D;

/// Line feed
pub const LF: u8 = 0x0A;

/// Escape, the default key for leaving a terminal session
pub const ESC: u8 = 0x1B;
