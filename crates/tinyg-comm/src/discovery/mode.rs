use super::capture::TextSource;
use super::PortEnumerator;
use crate::error::Result;

/// Serial ports listed by the Windows `mode` command
///
/// Each port shows up as a `Status for device COMn:` header.
#[derive(Debug, Clone)]
pub struct ModeListing {
    source: TextSource,
}

impl ModeListing {
    /// Run `mode` on this machine
    pub fn system() -> Self {
        Self {
            source: TextSource::command("cmd", &["/C", "mode"]),
        }
    }

    pub fn from_source(source: TextSource) -> Self {
        Self { source }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_source(TextSource::Captured(text.into()))
    }
}

impl PortEnumerator for ModeListing {
    fn ports(&mut self) -> Result<Vec<u32>> {
        Ok(parse_mode_listing(&self.source.read()?))
    }
}

/// Leading decimal digits of `text` as a number
pub(crate) fn leading_number(text: &str) -> Option<u32> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Port numbers from `mode` output, in listing order
pub fn parse_mode_listing(text: &str) -> Vec<u32> {
    text.lines()
        .filter_map(|line| {
            let at = line.find("device COM")?;
            leading_number(&line[at + "device COM".len()..])
        })
        .filter(|&n| n > 0)
        .collect()
}
