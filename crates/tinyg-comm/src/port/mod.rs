//! Serial port handles
//!
//! The driver only ever talks to hardware through the [`SerialDevice`] and
//! [`SerialBackend`] traits. [`SystemBackend`] implements them on top of the
//! `serialport` crate; tests plug in scripted backends.

mod device;
mod system;

pub use device::{DeviceProperties, Provider, SerialBackend, SerialDevice};
pub use system::{com_device_path, SystemBackend, SystemDevice};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CommError, Result};

/// 1-based external port number (COM1 is 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(u32);

impl PortNumber {
    /// Validate a port number against the highest number the driver accepts
    pub fn new(number: u32, max: u32) -> Result<Self> {
        if number == 0 || number > max {
            return Err(CommError::BadPort(number));
        }
        Ok(Self(number))
    }

    /// The raw 1-based number
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COM{}", self.0)
    }
}
