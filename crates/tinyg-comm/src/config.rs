//! Line and driver configuration
//!
//! [`LineConfig`] is the serial line setup saved per port slot and reapplied
//! whenever the device reconnects. [`DriverConfig`] holds the driver-wide
//! timing constants and can be loaded from JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{CommError, Result};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Four,
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Bit count as a number
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Four => 4,
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// Handshake mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    XonXoff,
    RtsCts,
    DtrDsr,
}

/// Serial line configuration
///
/// The RTS and DTR fields are the commanded output line states. Applying a
/// configuration also drives those lines, so changing the baud rate with a
/// stale copy resets RTS/DTR too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (4-8)
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Handshake mode
    pub flow_control: FlowControl,
    /// Commanded RTS output state
    pub rts: bool,
    /// Commanded DTR output state
    pub dtr: bool,
    /// Abort pending reads/writes when a line error occurs
    ///
    /// The system backend always aborts; turning this off there yields
    /// [`CommError::UnsupportedSetting`](crate::error::CommError::UnsupportedSetting).
    pub abort_on_error: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            rts: false,
            dtr: false,
            abort_on_error: true,
        }
    }
}

impl LineConfig {
    /// Default 8N1 setup at the given baud rate
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Reject settings no serial device can take
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(CommError::Config("baud rate must be non-zero".into()));
        }
        Ok(())
    }
}

/// Driver-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Maximum number of simultaneously tracked ports
    pub max_ports: usize,
    /// Highest port number accepted by open/select
    pub max_port_number: u32,
    /// Minimum time between disconnect health checks on a slot
    pub check_interval_ms: u64,
    /// A health check slower than this is treated as a vanished device
    pub check_deadline_ms: u64,
    /// How long `read_byte` waits for data when nothing is cached
    pub read_byte_wait_ms: u64,
    /// Per-write OS timeout
    pub write_timeout_ms: u64,
    /// Give up retrying a partially accepted write after this long
    pub write_deadline_ms: u64,
    /// Per-byte echo wait in full-duplex mode
    pub echo_timeout_ms: u64,
    /// Sleep between empty polls (0 yields the thread instead)
    pub idle_backoff_us: u64,
    /// Configuration applied to a slot the caller never configured
    pub default_line: LineConfig,
    /// Reject devices that are not RS-232 class providers
    pub verify_provider: bool,
    /// Explicit device paths keyed by port number
    pub device_paths: BTreeMap<u32, String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_ports: crate::DEFAULT_MAX_PORTS,
            max_port_number: crate::MAX_PORT_NUMBER,
            check_interval_ms: 200,
            check_deadline_ms: 50,
            read_byte_wait_ms: 500,
            write_timeout_ms: 10,
            write_deadline_ms: 2000,
            echo_timeout_ms: 500,
            idle_backoff_us: 0,
            default_line: LineConfig::default(),
            verify_provider: true,
            device_paths: BTreeMap::new(),
        }
    }
}

impl DriverConfig {
    /// Parse a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DriverConfig =
            serde_json::from_str(json).map_err(|e| CommError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CommError::Config(e.to_string()))
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_ports == 0 {
            return Err(CommError::Config("max_ports must be at least 1".into()));
        }
        if self.max_port_number == 0 {
            return Err(CommError::Config(
                "max_port_number must be at least 1".into(),
            ));
        }
        self.default_line.validate()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn check_deadline(&self) -> Duration {
        Duration::from_millis(self.check_deadline_ms)
    }

    pub fn read_byte_wait(&self) -> Duration {
        Duration::from_millis(self.read_byte_wait_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_micros(self.idle_backoff_us)
    }
}
