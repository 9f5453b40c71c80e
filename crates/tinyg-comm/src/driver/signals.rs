//! Modem control lines and break

use std::time::Duration;

use super::SerialDriver;
use crate::error::Result;
use crate::port::SerialBackend;
use crate::registry::PortSlot;
use crate::signals::ModemSignals;

/// Input lines from the device plus the commanded RTS/DTR states
///
/// The OS does not reliably report back output line states, so those come
/// from the saved configuration.
fn read_signals(slot: &mut PortSlot) -> Result<ModemSignals> {
    let mut signals = slot.device()?.modem_status()? & ModemSignals::INPUTS;
    signals.set(ModemSignals::RTS, slot.saved_config.rts);
    signals.set(ModemSignals::DTR, slot.saved_config.dtr);
    Ok(signals)
}

/// Store RTS/DTR in the saved configuration and reapply all of it
fn write_signals(slot: &mut PortSlot, mask: ModemSignals) -> Result<()> {
    slot.saved_config.rts = mask.contains(ModemSignals::RTS);
    slot.saved_config.dtr = mask.contains(ModemSignals::DTR);
    let line = slot.saved_config;
    slot.device()?.apply_config(&line)
}

impl<B: SerialBackend> SerialDriver<B> {
    pub fn modem_signals(&mut self) -> Result<ModemSignals> {
        self.with_selected(|_, _, slot| read_signals(slot))
    }

    /// Set RTS and DTR from `mask`
    ///
    /// This reapplies the whole saved line configuration, not just the two
    /// lines. Input bits in `mask` are ignored.
    pub fn set_modem_signals(&mut self, mask: ModemSignals) -> Result<()> {
        self.with_selected(|_, _, slot| write_signals(slot, mask))
    }

    pub fn modem_signals_of(&mut self, number: u32) -> Result<ModemSignals> {
        self.with_port(number, |_, _, slot| read_signals(slot))
    }

    pub fn set_modem_signals_of(&mut self, number: u32, mask: ModemSignals) -> Result<()> {
        self.with_port(number, |_, _, slot| write_signals(slot, mask))
    }

    /// Assert (`true`) or clear a break condition on the selected port
    pub fn send_break(&mut self, on: bool) -> Result<()> {
        self.with_selected(|_, _, slot| slot.device()?.set_break(on))
    }

    /// Hold a break for `duration`, then clear it
    pub fn send_break_timed(&mut self, duration: Duration) -> Result<()> {
        self.send_break(true)?;
        std::thread::sleep(duration);
        self.send_break(false)
    }
}
