//! Modem control lines, receive error flags and received bytes

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Modem control/status line bit set
    ///
    /// DTR and RTS are outputs, the rest are inputs. The bit layout matches
    /// the classic PC serial status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ModemSignals: u8 {
        /// Data terminal ready (output)
        const DTR = 0x01;
        /// Request to send (output)
        const RTS = 0x02;
        /// Clear to send (input)
        const CTS = 0x10;
        /// Data set ready (input)
        const DSR = 0x20;
        /// Ring indicator (input)
        const RI = 0x40;
        /// Carrier detect (input)
        const RLSD = 0x80;

        /// Lines the host drives
        const OUTPUTS = Self::DTR.bits() | Self::RTS.bits();
        /// Lines the device drives
        const INPUTS = Self::CTS.bits() | Self::DSR.bits() | Self::RI.bits() | Self::RLSD.bits();
    }
}

impl ModemSignals {
    /// Signal names in bit order from bit 0
    pub const NAMES: [&'static str; 8] = ["DTR", "RTS", "B2", "B3", "CTS", "DSR", "RI", "CD"];

    /// Names of the asserted signals
    pub fn names(self) -> Vec<&'static str> {
        (0..8)
            .filter(|bit| self.bits() & (1 << bit) != 0)
            .map(|bit| Self::NAMES[bit])
            .collect()
    }
}

impl Default for ModemSignals {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for ModemSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join("|"))
    }
}

bitflags! {
    /// Receive error flags reported alongside a byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LineErrors: u8 {
        /// Receive queue overflow
        const RXOVER = 0x01;
        /// Hardware overrun
        const OVERRUN = 0x02;
        /// Parity error
        const PARITY = 0x04;
        /// Framing error
        const FRAME = 0x08;
        /// Break condition
        const BREAK = 0x10;
    }
}

impl Default for LineErrors {
    fn default() -> Self {
        Self::empty()
    }
}

/// A received byte with any line errors seen when it arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxByte {
    pub value: u8,
    pub errors: LineErrors,
}

impl RxByte {
    pub fn new(value: u8) -> Self {
        Self {
            value,
            errors: LineErrors::empty(),
        }
    }

    pub fn with_errors(value: u8, errors: LineErrors) -> Self {
        Self { value, errors }
    }

    /// Byte in the low 8 bits, error flags in the high 8 bits
    pub fn word(self) -> u16 {
        (u16::from(self.errors.bits()) << 8) | u16::from(self.value)
    }

    /// The byte with the parity bit cleared
    pub fn seven_bit(self) -> u8 {
        self.value & 0x7F
    }
}
