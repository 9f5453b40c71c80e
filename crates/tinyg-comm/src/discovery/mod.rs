//! Serial port discovery
//!
//! Finding the controller is best-effort: the OS is asked for its serial
//! ports and each candidate's manufacturer string is compared with the one the
//! target device reports. Enumerators that scrape command output treat a
//! missing or unreadable listing as "no ports".

mod capture;
mod mode;
mod pnp;
mod usb;

pub use capture::{run_captured, TextSource};
pub use mode::{parse_mode_listing, ModeListing};
pub use pnp::{field_for_port, PnpDump};
pub use usb::{PortDetails, SerialportEnumerator};

use crate::error::{CommError, Result};

/// Manufacturer string reported by FTDI USB serial adapters
pub const FTDI_MANUFACTURER: &str = "FTDI";

/// Source of candidate serial port numbers
pub trait PortEnumerator {
    /// Port numbers of the serial devices present
    fn ports(&mut self) -> Result<Vec<u32>>;

    /// A named property of a port's device record
    ///
    /// Enumerators without per-device records return `Ok(None)`.
    fn field_for_port(&mut self, _field: &str, _port: u32) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Candidate ports, with enumeration failures logged and read as "none"
pub fn candidate_ports(enumerator: &mut dyn PortEnumerator) -> Vec<u32> {
    match enumerator.ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::warn!("port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// Whether `port` is one of the serial ports present
pub fn is_serial_port(enumerator: &mut dyn PortEnumerator, port: u32) -> bool {
    candidate_ports(enumerator).contains(&port)
}

/// Ports whose manufacturer starts with `manufacturer` (case-insensitive)
pub fn ports_by_manufacturer(
    enumerator: &mut dyn PortEnumerator,
    manufacturer: &str,
) -> Vec<u32> {
    let wanted = manufacturer.to_ascii_lowercase();
    candidate_ports(enumerator)
        .into_iter()
        .filter(|&port| match enumerator.field_for_port("Manufacturer", port) {
            Ok(Some(found)) => {
                tracing::debug!("COM{} manufacturer '{}'", port, found);
                found.to_ascii_lowercase().starts_with(&wanted)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!("COM{} manufacturer lookup failed: {}", port, e);
                false
            }
        })
        .collect()
}

/// The single port whose manufacturer starts with `manufacturer`
///
/// Fails when no port matches, or when several do and the choice would be a
/// guess.
pub fn locate_device(enumerator: &mut dyn PortEnumerator, manufacturer: &str) -> Result<u32> {
    match ports_by_manufacturer(enumerator, manufacturer).as_slice() {
        [port] => {
            tracing::info!("found {} device on COM{}", manufacturer, port);
            Ok(*port)
        }
        [] => Err(CommError::Discovery(format!(
            "no {} device found",
            manufacturer
        ))),
        many => Err(CommError::Discovery(format!(
            "{} {} devices found ({:?}), cannot choose",
            many.len(),
            manufacturer,
            many
        ))),
    }
}
