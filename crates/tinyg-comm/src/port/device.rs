use std::fmt;
use std::io;
use std::time::Duration;

use super::PortNumber;
use crate::config::{DataBits, FlowControl, LineConfig, Parity, StopBits};
use crate::error::Result;
use crate::signals::{LineErrors, ModemSignals};

/// Kind of communications provider behind an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// RS-232 class serial port (including USB virtual COM ports)
    Rs232,
    /// Anything else; reading from these can hang
    Other,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Rs232 => write!(f, "RS-232"),
            Provider::Other => write!(f, "other"),
        }
    }
}

/// Settings and queue state reported by an open device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    /// OS name of the port, when the platform reports one
    pub name: Option<String>,
    pub provider: Provider,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Bytes received and not yet read
    pub rx_queued: u32,
    /// Bytes written and not yet sent
    pub tx_queued: u32,
    /// Per-write OS timeout
    pub write_timeout: Duration,
}

impl DeviceProperties {
    /// Character framing in the usual short form, e.g. `8N1`
    pub fn framing(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        format!("{}{}{}", self.data_bits.bits(), parity, stop)
    }
}

impl fmt::Display for DeviceProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name          : {}", self.name.as_deref().unwrap_or("-"))?;
        writeln!(f, "provider      : {}", self.provider)?;
        writeln!(f, "baud rate     : {}", self.baud_rate)?;
        writeln!(f, "framing       : {}", self.framing())?;
        writeln!(f, "flow control  : {:?}", self.flow_control)?;
        writeln!(f, "rx queued     : {}", self.rx_queued)?;
        writeln!(f, "tx queued     : {}", self.tx_queued)?;
        writeln!(f, "write timeout : {:?}", self.write_timeout)
    }
}

/// An open serial device handle
///
/// Dropping the value closes the OS handle.
pub trait SerialDevice: Send {
    /// Read at most one byte without waiting
    ///
    /// `Ok(None)` means nothing is pending. An error means the device is gone.
    fn read_nowait(&mut self) -> io::Result<Option<u8>>;

    /// Write as much of `data` as the OS accepts within the write timeout
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Apply a full line configuration, including the RTS/DTR output states
    fn apply_config(&mut self, config: &LineConfig) -> Result<()>;

    /// Read back the current line state and reapply `config`
    ///
    /// USB serial adapters that vanished fail here, which makes this the
    /// disconnect health check.
    fn check_health(&mut self, config: &LineConfig) -> Result<()>;

    /// Set the per-write OS timeout
    fn set_write_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Discard anything buffered in either direction
    fn clear_buffers(&mut self) -> Result<()>;

    /// Fetch and clear the receive error flags
    fn take_line_errors(&mut self) -> LineErrors;

    /// Current state of the input lines (CTS/DSR/RI/CD)
    fn modem_status(&mut self) -> Result<ModemSignals>;

    /// Assert or clear a break condition
    fn set_break(&mut self, on: bool) -> Result<()>;

    /// Kind of provider this handle talks to
    fn provider(&self) -> Provider;

    /// Current settings and queue state as the OS reports them
    fn properties(&mut self) -> Result<DeviceProperties>;
}

/// Factory for device handles
pub trait SerialBackend {
    /// OS device path for a port number
    fn device_path(&self, port: PortNumber) -> String;

    /// Acquire a read/write handle to `path`
    fn open(&mut self, port: PortNumber, path: &str) -> Result<Box<dyn SerialDevice>>;
}
