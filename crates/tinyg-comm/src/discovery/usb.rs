//! Port enumeration through `serialport`

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

use super::mode::leading_number;
use super::PortEnumerator;
use crate::error::{CommError, Result};

/// What the OS knows about one serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDetails {
    /// OS port name (e.g. "COM5" or "/dev/ttyUSB0")
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Field lookup by PnP-style heading name
    pub fn field(&self, field: &str) -> Option<String> {
        let value = match field.to_ascii_lowercase().as_str() {
            "name" | "caption" => Some(self.name.clone()),
            "manufacturer" => self.manufacturer.clone(),
            "product" | "description" => self.product.clone(),
            "serialnumber" => self.serial_number.clone(),
            "vid" => self.vid.map(|v| format!("{:04X}", v)),
            "pid" => self.pid.map(|p| format!("{:04X}", p)),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }
}

impl From<SerialPortInfo> for PortDetails {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// Ordering for port names: ttyACM first, then ttyUSB, each by number, then
/// everything else by name
fn port_sort_key(name: &str) -> (u8, u32, String) {
    let base = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB"), (2, "COM")] {
        if let Some(rest) = base.strip_prefix(prefix) {
            return (rank, leading_number(rest).unwrap_or(u32::MAX), base.to_string());
        }
    }
    (3, 0, base.to_string())
}

/// Port number for a Windows `COMn` name
fn com_number(name: &str) -> Option<u32> {
    let base = name.rsplit('\\').next().unwrap_or(name);
    let rest = base.strip_prefix("COM")?;
    leading_number(rest).filter(|_| rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Enumerator backed by `serialport::available_ports`
///
/// `COMn` ports keep their number. Ports with other names (Unix device
/// paths) are numbered after the highest COM number in sorted order, and
/// [`device_paths`](Self::device_paths) maps those numbers back to paths.
#[derive(Debug, Clone, Default)]
pub struct SerialportEnumerator {
    found: BTreeMap<u32, PortDetails>,
    fixed: Option<Vec<PortDetails>>,
}

impl SerialportEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate a fixed list instead of asking the OS
    pub fn from_details(details: Vec<PortDetails>) -> Self {
        Self {
            found: BTreeMap::new(),
            fixed: Some(details),
        }
    }

    fn scan(&mut self) -> Result<()> {
        let mut details = match &self.fixed {
            Some(list) => list.clone(),
            None => system_ports()?,
        };
        details.sort_by_key(|d| port_sort_key(&d.name));

        self.found.clear();
        let mut next = details
            .iter()
            .filter_map(|d| com_number(&d.name))
            .max()
            .unwrap_or(0);
        for d in details {
            let number = match com_number(&d.name) {
                Some(n) => n,
                None => {
                    next += 1;
                    next
                }
            };
            self.found.insert(number, d);
        }
        Ok(())
    }

    /// Details of every port found by the last scan
    pub fn details(&self) -> impl Iterator<Item = (u32, &PortDetails)> {
        self.found.iter().map(|(n, d)| (*n, d))
    }

    /// Port number to OS path table, suitable for `DriverConfig::device_paths`
    pub fn device_paths(&self) -> BTreeMap<u32, String> {
        self.found
            .iter()
            .map(|(n, d)| (*n, d.name.clone()))
            .collect()
    }
}

impl PortEnumerator for SerialportEnumerator {
    fn ports(&mut self) -> Result<Vec<u32>> {
        self.scan()?;
        Ok(self.found.keys().copied().collect())
    }

    fn field_for_port(&mut self, field: &str, port: u32) -> Result<Option<String>> {
        if self.found.is_empty() {
            self.scan()?;
        }
        Ok(self.found.get(&port).and_then(|d| d.field(field)))
    }
}

/// Ports the OS reports
fn system_ports() -> Result<Vec<PortDetails>> {
    let listed = serialport::available_ports()
        .map_err(|e| CommError::Discovery(e.to_string()))?
        .into_iter()
        .map(PortDetails::from)
        .collect();
    Ok(with_dev_nodes(listed))
}

/// Add /dev/ttyACM* and /dev/ttyUSB* nodes the OS listing missed
#[cfg(target_os = "linux")]
fn with_dev_nodes(listed: Vec<PortDetails>) -> Vec<PortDetails> {
    let mut by_name: HashMap<String, PortDetails> =
        listed.into_iter().map(|d| (d.name.clone(), d)).collect();
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let Some(file) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if file.starts_with("ttyACM") || file.starts_with("ttyUSB") {
                let path = format!("/dev/{}", file);
                by_name
                    .entry(path.clone())
                    .or_insert_with(|| PortDetails::named(path));
            }
        }
    }
    by_name.into_values().collect()
}

#[cfg(not(target_os = "linux"))]
fn with_dev_nodes(listed: Vec<PortDetails>) -> Vec<PortDetails> {
    listed
}
