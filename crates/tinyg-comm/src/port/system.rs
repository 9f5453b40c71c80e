//! `serialport`-backed device handles

use serialport::{ClearBuffer, SerialPort};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{DeviceProperties, PortNumber, Provider, SerialBackend, SerialDevice};
use crate::config::{DataBits, FlowControl, LineConfig, Parity, StopBits};
use crate::error::{CommError, Result};
use crate::signals::{LineErrors, ModemSignals};

/// Windows device name for a COM port
///
/// COM1-COM9 open by their short name. COM10 and above need the `\\?\`
/// prefix or the open fails.
pub fn com_device_path(port: PortNumber) -> String {
    if port.get() < 10 {
        format!("COM{}", port.get())
    } else {
        format!(r"\\?\COM{}", port.get())
    }
}

/// Strip Windows device namespace prefixes for name comparison
fn bare_port_name(name: &str) -> &str {
    name.strip_prefix(r"\\?\")
        .or_else(|| name.strip_prefix(r"\\.\"))
        .unwrap_or(name)
}

/// Backend that opens real ports through the `serialport` crate
#[derive(Debug, Clone, Default)]
pub struct SystemBackend {
    device_paths: BTreeMap<u32, String>,
}

impl SystemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit device paths for some port numbers
    pub fn with_device_paths(device_paths: BTreeMap<u32, String>) -> Self {
        Self { device_paths }
    }

    /// Whether the OS lists `path` as a serial port
    fn listed_provider(path: &str) -> Provider {
        let wanted = bare_port_name(path);
        match serialport::available_ports() {
            Ok(ports) => {
                if ports
                    .iter()
                    .any(|p| bare_port_name(&p.port_name).eq_ignore_ascii_case(wanted))
                {
                    Provider::Rs232
                } else {
                    Provider::Other
                }
            }
            Err(e) => {
                tracing::debug!("available_ports failed ({}), assuming {} is serial", e, path);
                Provider::Rs232
            }
        }
    }
}

impl SerialBackend for SystemBackend {
    fn device_path(&self, port: PortNumber) -> String {
        if let Some(path) = self.device_paths.get(&port.get()) {
            return path.clone();
        }
        if cfg!(windows) {
            com_device_path(port)
        } else {
            format!("/dev/ttyS{}", port.get() - 1)
        }
    }

    fn open(&mut self, port: PortNumber, path: &str) -> Result<Box<dyn SerialDevice>> {
        let handle = serialport::new(path, LineConfig::default().baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                tracing::debug!("open {} ({}) failed: {}", port, path, e);
                CommError::from(e)
            })?;

        Ok(Box::new(SystemDevice {
            port: handle,
            provider: Self::listed_provider(path),
        }))
    }
}

/// A [`LineConfig`] translated to `serialport` terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortSettings {
    data_bits: serialport::DataBits,
    parity: serialport::Parity,
    stop_bits: serialport::StopBits,
    flow_control: serialport::FlowControl,
}

impl PortSettings {
    /// Fails for settings `serialport` has no way to express
    fn from_line(config: &LineConfig) -> Result<Self> {
        if !config.abort_on_error {
            return Err(CommError::UnsupportedSetting("continue after line error"));
        }
        let data_bits = match config.data_bits {
            DataBits::Four => return Err(CommError::UnsupportedSetting("4 data bits")),
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::Mark => return Err(CommError::UnsupportedSetting("mark parity")),
            Parity::Space => return Err(CommError::UnsupportedSetting("space parity")),
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => return Err(CommError::UnsupportedSetting("1.5 stop bits")),
        };
        let flow_control = match config.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::XonXoff => serialport::FlowControl::Software,
            FlowControl::RtsCts => serialport::FlowControl::Hardware,
            FlowControl::DtrDsr => return Err(CommError::UnsupportedSetting("DTR/DSR handshake")),
        };
        Ok(Self {
            data_bits,
            parity,
            stop_bits,
            flow_control,
        })
    }
}

/// A port opened by [`SystemBackend`]
pub struct SystemDevice {
    port: Box<dyn SerialPort>,
    provider: Provider,
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl SerialDevice for SystemDevice {
    fn read_nowait(&mut self) -> io::Result<Option<u8>> {
        if self.port.bytes_to_read().map_err(to_io)? == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.port.write(data) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn apply_config(&mut self, config: &LineConfig) -> Result<()> {
        let settings = PortSettings::from_line(config)?;

        self.port.set_baud_rate(config.baud_rate)?;
        self.port.set_data_bits(settings.data_bits)?;
        self.port.set_parity(settings.parity)?;
        self.port.set_stop_bits(settings.stop_bits)?;
        self.port.set_flow_control(settings.flow_control)?;

        // RTS is owned by the handshake when hardware flow control is on
        if config.flow_control != FlowControl::RtsCts {
            self.port.write_request_to_send(config.rts)?;
        }
        self.port.write_data_terminal_ready(config.dtr)?;
        Ok(())
    }

    fn check_health(&mut self, config: &LineConfig) -> Result<()> {
        self.port.baud_rate()?;
        self.apply_config(config)
    }

    fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn take_line_errors(&mut self) -> LineErrors {
        // serialport does not surface per-byte line errors
        LineErrors::empty()
    }

    fn modem_status(&mut self) -> Result<ModemSignals> {
        let mut status = ModemSignals::empty();
        status.set(ModemSignals::CTS, self.port.read_clear_to_send()?);
        status.set(ModemSignals::DSR, self.port.read_data_set_ready()?);
        status.set(ModemSignals::RI, self.port.read_ring_indicator()?);
        status.set(ModemSignals::RLSD, self.port.read_carrier_detect()?);
        Ok(status)
    }

    fn set_break(&mut self, on: bool) -> Result<()> {
        if on {
            self.port.set_break()?;
        } else {
            self.port.clear_break()?;
        }
        Ok(())
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn properties(&mut self) -> Result<DeviceProperties> {
        let data_bits = match self.port.data_bits()? {
            serialport::DataBits::Five => DataBits::Five,
            serialport::DataBits::Six => DataBits::Six,
            serialport::DataBits::Seven => DataBits::Seven,
            serialport::DataBits::Eight => DataBits::Eight,
        };
        let parity = match self.port.parity()? {
            serialport::Parity::None => Parity::None,
            serialport::Parity::Odd => Parity::Odd,
            serialport::Parity::Even => Parity::Even,
        };
        let stop_bits = match self.port.stop_bits()? {
            serialport::StopBits::One => StopBits::One,
            serialport::StopBits::Two => StopBits::Two,
        };
        let flow_control = match self.port.flow_control()? {
            serialport::FlowControl::None => FlowControl::None,
            serialport::FlowControl::Software => FlowControl::XonXoff,
            serialport::FlowControl::Hardware => FlowControl::RtsCts,
        };
        Ok(DeviceProperties {
            name: self.port.name(),
            provider: self.provider,
            baud_rate: self.port.baud_rate()?,
            data_bits,
            parity,
            stop_bits,
            flow_control,
            rx_queued: self.port.bytes_to_read()?,
            tx_queued: self.port.bytes_to_write()?,
            write_timeout: self.port.timeout(),
        })
    }
}
