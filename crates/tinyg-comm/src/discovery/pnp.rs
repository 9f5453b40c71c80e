//! Plug-and-play device dump
//!
//! `Get-WmiObject Win32_PnPEntity` prints one block of `Heading : value` lines
//! per device, blocks separated by blank lines. Serial devices carry their
//! port in the caption, e.g. `Caption : USB Serial Port (COM5)`.

use super::capture::TextSource;
use super::mode::leading_number;
use super::PortEnumerator;
use crate::error::Result;
use crate::MAX_PORT_NUMBER;

/// Device records from the Windows plug-and-play dump
#[derive(Debug, Clone)]
pub struct PnpDump {
    source: TextSource,
    cached: Option<String>,
}

impl PnpDump {
    pub fn system() -> Self {
        Self::from_source(TextSource::command(
            "powershell",
            &["-NoProfile", "-Command", "Get-WmiObject Win32_PnPEntity"],
        ))
    }

    pub fn from_source(source: TextSource) -> Self {
        Self {
            source,
            cached: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_source(TextSource::Captured(text.into()))
    }

    /// Forget the cached dump so the next query runs the command again
    pub fn refresh(&mut self) {
        self.cached = None;
    }

    fn text(&mut self) -> Result<&str> {
        if self.cached.is_none() {
            self.cached = Some(self.source.read()?);
        }
        Ok(self.cached.as_deref().unwrap_or_default())
    }
}

impl PortEnumerator for PnpDump {
    fn ports(&mut self) -> Result<Vec<u32>> {
        let text = self.text()?;
        let mut ports: Vec<u32> = records(text).filter_map(|r| caption_port(&r)).collect();
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }

    fn field_for_port(&mut self, field: &str, port: u32) -> Result<Option<String>> {
        Ok(field_for_port(self.text()?, field, port))
    }
}

/// Split the dump into blocks of non-blank lines
fn records(text: &str) -> impl Iterator<Item = Vec<&str>> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .split(|line| line.trim().is_empty())
        .filter(|block| !block.is_empty())
        .map(|block| block.to_vec())
        .collect::<Vec<_>>()
        .into_iter()
}

/// `(heading, value)` of a `Heading : value` line
fn split_line(line: &str) -> Option<(&str, &str)> {
    let (heading, value) = line.split_once(':')?;
    Some((heading.trim(), value.trim()))
}

/// Port number in a COMn caption line, if the record has one
fn caption_port(record: &[&str]) -> Option<u32> {
    record.iter().find_map(|line| {
        let (heading, value) = split_line(line)?;
        if heading != "Caption" {
            return None;
        }
        value
            .match_indices("COM")
            .find_map(|(at, _)| leading_number(&value[at + 3..]))
            .filter(|&n| n > 0 && n <= MAX_PORT_NUMBER)
    })
}

/// Value of `field` in the record whose caption names COM`port`
///
/// Headings compare case-insensitively. The field may come before or after
/// the caption line. An empty value counts as absent.
pub fn field_for_port(text: &str, field: &str, port: u32) -> Option<String> {
    records(text)
        .find(|record| caption_port(record) == Some(port))?
        .iter()
        .filter_map(|line| split_line(line))
        .find(|(heading, _)| heading.eq_ignore_ascii_case(field))
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
