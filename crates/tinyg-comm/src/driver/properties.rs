//! Device property reports

use std::io::Write;

use super::{connect_slot, SerialDriver};
use crate::error::{CommError, Result};
use crate::port::{DeviceProperties, SerialBackend};

impl<B: SerialBackend> SerialDriver<B> {
    /// Settings and queue state of the selected port, reopening it if needed
    pub fn properties(&mut self) -> Result<DeviceProperties> {
        self.with_selected(|backend, config, slot| {
            if slot.handle.is_none() {
                connect_slot(backend, config, slot).map_err(|_| CommError::Disconnected)?;
            }
            slot.device()?.properties()
        })
    }

    /// Write a property report for the selected port to `out`
    pub fn print_properties(&mut self, out: &mut dyn Write) -> Result<()> {
        let props = self.properties()?;
        let port = self
            .current_port()
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        writeln!(out, "{} properties:", port)?;
        write!(out, "{}", props)?;
        Ok(())
    }
}
