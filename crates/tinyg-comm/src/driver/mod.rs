//! Serial driver
//!
//! [`SerialDriver`] owns the port registry and a backend that produces device
//! handles. It implements the slot lifecycle:
//!
//! ```text
//! Empty -> Opening -> Connected <-> Disconnected
//!             |                          |
//!             +-- (fail) -> Empty        +-- next access -> Opening
//! ```
//!
//! Every single-port call targets the selected slot. `open` and `select`
//! change the selection, everything else leaves it alone.

mod block;
mod io;
mod properties;
mod signals;
mod terminal;

pub(crate) use block::BlockState;
pub use block::Chunk;
pub use io::Poll;
pub use terminal::{key_name, TerminalOptions};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{DriverConfig, LineConfig};
use crate::error::{CommError, Result};
use crate::port::{PortNumber, Provider, SerialBackend, SystemBackend};
use crate::registry::{ConnectionState, PortRegistry, PortSlot};
use crate::shutdown;

pub(crate) fn lock(registry: &Mutex<PortRegistry>) -> MutexGuard<'_, PortRegistry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Acquire and configure a handle for a tracked slot
///
/// On success the slot holds a live handle configured with its saved line
/// setup (or the driver default if the caller never configured it), with
/// buffers flushed. On failure the slot is left without a handle.
pub(crate) fn connect_slot<B: SerialBackend>(
    backend: &mut B,
    config: &DriverConfig,
    slot: &mut PortSlot,
) -> Result<()> {
    let port = slot.port.ok_or(CommError::NoPortSelected)?;
    let line = if slot.config_initialized {
        slot.saved_config
    } else {
        config.default_line
    };

    slot.opening = true;
    let path = backend.device_path(port);
    let opened = backend.open(port, &path).and_then(|mut device| {
        if config.verify_provider && device.provider() != Provider::Rs232 {
            return Err(CommError::NotASerialPort(port));
        }
        device.apply_config(&line)?;
        device.set_write_timeout(config.write_timeout())?;
        device.clear_buffers()?;
        Ok(device)
    });
    slot.opening = false;

    let device = opened.map_err(|e| {
        tracing::debug!("open {} at {} failed: {}", port, path, e);
        e
    })?;

    slot.saved_config = line;
    slot.handle = Some(device);
    slot.connected = true;
    slot.read_ahead = None;
    slot.last_check = Some(Instant::now());
    Ok(())
}

pub(crate) fn backoff(config: &DriverConfig) {
    let pause = config.idle_backoff();
    if pause.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(pause);
    }
}

/// Serial command/response driver
pub struct SerialDriver<B: SerialBackend = SystemBackend> {
    pub(crate) backend: B,
    pub(crate) config: DriverConfig,
    pub(crate) registry: Arc<Mutex<PortRegistry>>,
    chunk_cursor: usize,
    exit_hook: bool,
}

impl SerialDriver<SystemBackend> {
    /// Driver over the system's serial ports with default settings
    pub fn system() -> Self {
        Self::new(SystemBackend::new())
    }

    /// Driver over the system's serial ports, using the device path table
    /// from `config`
    pub fn system_with_config(config: DriverConfig) -> Result<Self> {
        let backend = SystemBackend::with_device_paths(config.device_paths.clone());
        Self::with_config(backend, config)
    }
}

impl<B: SerialBackend> SerialDriver<B> {
    pub fn new(backend: B) -> Self {
        let config = DriverConfig::default();
        let registry = PortRegistry::new(config.max_ports, config.default_line);
        Self {
            backend,
            config,
            registry: Arc::new(Mutex::new(registry)),
            chunk_cursor: 0,
            exit_hook: false,
        }
    }

    pub fn with_config(backend: B, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let registry = PortRegistry::new(config.max_ports, config.default_line);
        Ok(Self {
            backend,
            config,
            registry: Arc::new(Mutex::new(registry)),
            chunk_cursor: 0,
            exit_hook: false,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Shared handle to the port registry
    pub fn registry(&self) -> Arc<Mutex<PortRegistry>> {
        Arc::clone(&self.registry)
    }

    fn port_number(&self, number: u32) -> Result<PortNumber> {
        PortNumber::new(number, self.config.max_port_number)
    }

    /// Open a port and make it the selected one
    ///
    /// Opening a port that is already tracked with a live handle only selects
    /// it. A tracked port whose handle was dropped after a failure is reopened
    /// with its saved configuration.
    pub fn open(&mut self, number: u32) -> Result<()> {
        let port = self.port_number(number)?;
        let mut reg = lock(&self.registry);

        if let Some(index) = reg.find(port) {
            if reg.slot(index).is_some_and(PortSlot::has_handle) {
                reg.select(index);
                return Ok(());
            }
        }

        let tracked = reg.find(port).is_some();
        let index = reg.allocate(port)?;
        let slot = reg.slot_mut(index).ok_or(CommError::TooManyPorts)?;
        if let Err(e) = connect_slot(&mut self.backend, &self.config, slot) {
            if !tracked {
                reg.release(index);
            }
            return Err(e);
        }

        reg.select(index);
        reg.note_opened(index);
        drop(reg);

        tracing::info!("{} open", port);
        if !self.exit_hook {
            shutdown::track(&self.registry);
            self.exit_hook = true;
        }
        Ok(())
    }

    /// Select a port, opening it first when needed
    pub fn select(&mut self, number: u32) -> Result<()> {
        self.open(number)
    }

    /// Close a port and forget its saved configuration
    pub fn close(&mut self, number: u32) -> Result<()> {
        let port = self.port_number(number)?;
        let mut reg = lock(&self.registry);
        let index = reg.find(port).ok_or(CommError::NotOpen(port))?;
        reg.release(index);
        tracing::info!("{} closed", port);
        Ok(())
    }

    /// Close every port
    ///
    /// Safe to call repeatedly; a second call finds nothing to close.
    pub fn close_all(&mut self) {
        let closed = lock(&self.registry).release_all();
        if closed > 0 {
            tracing::debug!("close_all closed {} ports", closed);
        }
    }

    /// Rotate the selection to the next tracked port
    pub fn other_port(&mut self) -> Option<PortNumber> {
        let mut reg = lock(&self.registry);
        let capacity = reg.capacity();
        let start = reg.selected().map_or(0, |i| i + 1);
        let next = (0..capacity)
            .map(|step| (start + step) % capacity)
            .find(|&i| reg.slot(i).is_some_and(|s| s.port.is_some()))?;
        reg.select(next);
        reg.slot(next).and_then(PortSlot::port)
    }

    /// The selected port number
    pub fn current_port(&self) -> Option<PortNumber> {
        let reg = lock(&self.registry);
        reg.selected()
            .and_then(|i| reg.slot(i))
            .and_then(PortSlot::port)
    }

    /// Whether the selected port answered its last poll
    pub fn is_connected(&self) -> bool {
        let reg = lock(&self.registry);
        reg.selected()
            .and_then(|i| reg.slot(i))
            .is_some_and(|s| s.state() == ConnectionState::Connected)
    }

    pub fn is_port_connected(&self, number: u32) -> bool {
        self.state(number) == ConnectionState::Connected
    }

    /// Lifecycle state of a port; untracked or invalid ports are `Empty`
    pub fn state(&self, number: u32) -> ConnectionState {
        let Ok(port) = self.port_number(number) else {
            return ConnectionState::Empty;
        };
        let reg = lock(&self.registry);
        reg.find(port)
            .and_then(|i| reg.slot(i))
            .map_or(ConnectionState::Empty, PortSlot::state)
    }

    /// Run `f` against the selected slot
    pub(crate) fn with_selected<T>(
        &mut self,
        f: impl FnOnce(&mut B, &DriverConfig, &mut PortSlot) -> Result<T>,
    ) -> Result<T> {
        let mut reg = lock(&self.registry);
        let index = reg.selected().ok_or(CommError::NoPortSelected)?;
        let slot = reg.slot_mut(index).ok_or(CommError::NoPortSelected)?;
        f(&mut self.backend, &self.config, slot)
    }

    /// Run `f` against the slot tracking `number`, leaving the selection alone
    pub(crate) fn with_port<T>(
        &mut self,
        number: u32,
        f: impl FnOnce(&mut B, &DriverConfig, &mut PortSlot) -> Result<T>,
    ) -> Result<T> {
        let port = self.port_number(number)?;
        let mut reg = lock(&self.registry);
        let index = reg.find(port).ok_or(CommError::NotOpen(port))?;
        let slot = reg.slot_mut(index).ok_or(CommError::NotOpen(port))?;
        f(&mut self.backend, &self.config, slot)
    }

    /// Saved line configuration of the selected port
    pub fn line_config(&mut self) -> Result<LineConfig> {
        self.with_selected(|_, _, slot| Ok(slot.saved_config))
    }

    /// Apply a line configuration to the selected port
    ///
    /// The configuration is remembered and reapplied after every reconnect.
    /// A device that refuses it for any reason other than an unsupported
    /// setting is treated as gone.
    pub fn set_line_config(&mut self, line: LineConfig) -> Result<()> {
        line.validate()?;
        self.with_selected(|_, _, slot| {
            slot.saved_config = line;
            slot.config_initialized = true;
            let Some(device) = slot.handle.as_mut() else {
                return Ok(());
            };
            match device.apply_config(&line) {
                Err(CommError::UnsupportedSetting(what)) => {
                    Err(CommError::UnsupportedSetting(what))
                }
                Err(e) => {
                    tracing::warn!("reconfigure failed, dropping handle: {}", e);
                    slot.drop_handle();
                    Err(e)
                }
                Ok(()) => Ok(()),
            }
        })
    }

    /// Set only the baud rate of the selected port
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let line = LineConfig {
            baud_rate,
            ..self.line_config()?
        };
        self.set_line_config(line)
    }

    /// Clear line errors and discard buffered data in both directions
    pub fn reset(&mut self) -> Result<()> {
        self.with_selected(|_, _, slot| {
            slot.read_ahead = None;
            let device = slot.device()?;
            let errors = device.take_line_errors();
            if !errors.is_empty() {
                tracing::debug!("cleared line errors {:#04x}", errors.bits());
            }
            device.clear_buffers()
        })
    }
}

impl<B: SerialBackend> Drop for SerialDriver<B> {
    fn drop(&mut self) {
        self.close_all();
    }
}
