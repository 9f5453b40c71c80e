//! Port registry
//!
//! Fixed-capacity table of port slots. Each slot owns the device handle for
//! one external port number together with the line configuration to restore
//! after a reconnect and the one-byte read-ahead cache.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::LineConfig;
use crate::driver::BlockState;
use crate::error::{CommError, Result};
use crate::port::{PortNumber, SerialDevice};
use crate::signals::RxByte;

/// Externally visible state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No port tracked
    Empty,
    /// Handle being acquired and configured
    Opening,
    /// Handle open and the device answered the last poll
    Connected,
    /// Tracked, but the handle was dropped after a failure; the next access
    /// reopens it
    Disconnected,
}

/// One registry entry
pub struct PortSlot {
    pub(crate) handle: Option<Box<dyn SerialDevice>>,
    pub(crate) port: Option<PortNumber>,
    pub(crate) saved_config: LineConfig,
    pub(crate) config_initialized: bool,
    pub(crate) connected: bool,
    pub(crate) opening: bool,
    pub(crate) read_ahead: Option<RxByte>,
    pub(crate) last_check: Option<Instant>,
    pub(crate) block: BlockState,
}

impl PortSlot {
    fn empty(default_line: LineConfig) -> Self {
        Self {
            handle: None,
            port: None,
            saved_config: default_line,
            config_initialized: false,
            connected: false,
            opening: false,
            read_ahead: None,
            last_check: None,
            block: BlockState::default(),
        }
    }

    pub fn port(&self) -> Option<PortNumber> {
        self.port
    }

    pub fn saved_config(&self) -> &LineConfig {
        &self.saved_config
    }

    pub fn is_configured(&self) -> bool {
        self.config_initialized
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn read_ahead(&self) -> Option<RxByte> {
        self.read_ahead
    }

    /// Whether no chunk transfer is queued or armed
    pub fn block_idle(&self) -> bool {
        self.block.is_idle()
    }

    pub fn state(&self) -> ConnectionState {
        match (self.port, self.opening, &self.handle, self.connected) {
            (None, _, _, _) => ConnectionState::Empty,
            (Some(_), true, _, _) => ConnectionState::Opening,
            (Some(_), false, Some(_), true) => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    /// The live device handle
    pub(crate) fn device(&mut self) -> Result<&mut Box<dyn SerialDevice>> {
        match (self.handle.as_mut(), self.port) {
            (Some(device), _) => Ok(device),
            (None, Some(port)) => Err(CommError::NotOpen(port)),
            (None, None) => Err(CommError::NoPortSelected),
        }
    }

    /// Drop the OS handle but keep the slot tracked for reconnection
    pub(crate) fn drop_handle(&mut self) {
        self.connected = false;
        self.last_check = None;
        self.handle = None;
    }

    /// Forget everything about this slot, block transfers included
    pub(crate) fn reset(&mut self, default_line: LineConfig) {
        *self = Self::empty(default_line);
    }
}

/// The table of port slots
pub struct PortRegistry {
    slots: Vec<PortSlot>,
    default_line: LineConfig,
    selected: Option<usize>,
    high_water: usize,
}

impl PortRegistry {
    /// Create a registry with `capacity` empty slots
    pub fn new(capacity: usize, default_line: LineConfig) -> Self {
        Self {
            slots: (0..capacity).map(|_| PortSlot::empty(default_line)).collect(),
            default_line,
            selected: None,
            high_water: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index tracking `port`
    pub fn find(&self, port: PortNumber) -> Option<usize> {
        self.slots.iter().position(|s| s.port == Some(port))
    }

    /// Slot index for `port`, reserving a free slot when it is not tracked yet
    pub fn allocate(&mut self, port: PortNumber) -> Result<usize> {
        if let Some(index) = self.find(port) {
            return Ok(index);
        }
        let index = self
            .slots
            .iter()
            .position(|s| s.port.is_none())
            .ok_or(CommError::TooManyPorts)?;

        let default_line = self.default_line;
        let slot = &mut self.slots[index];
        slot.reset(default_line);
        slot.port = Some(port);
        Ok(index)
    }

    pub fn slot(&self, index: usize) -> Option<&PortSlot> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut PortSlot> {
        self.slots.get_mut(index)
    }

    pub fn slots(&self) -> impl Iterator<Item = &PortSlot> {
        self.slots.iter()
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub(crate) fn select(&mut self, index: usize) {
        if index < self.slots.len() {
            self.selected = Some(index);
        }
    }

    /// One past the highest slot that has held an open port
    pub fn live_count(&self) -> usize {
        self.high_water
    }

    pub(crate) fn note_opened(&mut self, index: usize) {
        if index + 1 > self.high_water {
            self.high_water = index + 1;
        }
    }

    /// Slots currently holding an OS handle
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.handle.is_some()).count()
    }

    /// Release one slot: close its handle and forget the port
    pub fn release(&mut self, index: usize) {
        let default_line = self.default_line;
        if let Some(slot) = self.slots.get_mut(index) {
            slot.reset(default_line);
        }
        self.high_water = self
            .slots
            .iter()
            .rposition(|s| s.port.is_some())
            .map_or(0, |i| i + 1);
        if self.selected == Some(index) {
            self.selected = None;
        }
    }

    /// Close every handle and empty every slot, returning how many ports
    /// were tracked
    ///
    /// Exclusive access comes from the `Mutex` the registry lives in. The exit
    /// hook only ever `try_lock`s it, so a teardown racing a driver call is
    /// skipped instead of deadlocking, and a repeat call finds nothing to do.
    pub fn release_all(&mut self) -> usize {
        let default_line = self.default_line;
        let mut closed = 0;
        for slot in self.slots.iter_mut().filter(|s| s.port.is_some()) {
            if let Some(port) = slot.port {
                tracing::debug!("closing {}", port);
            }
            slot.reset(default_line);
            closed += 1;
        }
        self.high_water = 0;
        self.selected = None;
        closed
    }
}
