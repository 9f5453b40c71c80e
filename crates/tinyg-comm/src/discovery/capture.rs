use std::fs::File;
use std::io::Read;
use std::process::{Command, Stdio};

use crate::error::{CommError, Result};

/// Where an enumerator gets its text from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    /// Run a program and parse what it prints
    Command { program: String, args: Vec<String> },
    /// Text captured earlier
    Captured(String),
}

impl TextSource {
    pub fn command(program: &str, args: &[&str]) -> Self {
        TextSource::Command {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Fetch the text, running the program if needed
    pub fn read(&self) -> Result<String> {
        match self {
            TextSource::Captured(text) => Ok(text.clone()),
            TextSource::Command { program, args } => run_captured(program, args),
        }
    }
}

/// Run `program` with its standard output redirected to a temporary file
///
/// The file is removed once its contents have been read back, whether or
/// not the program succeeded.
pub fn run_captured(program: &str, args: &[String]) -> Result<String> {
    let capture = tempfile::NamedTempFile::new()?;
    let sink = capture.reopen()?;

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::null())
        .status()
        .map_err(|e| CommError::Discovery(format!("cannot run {}: {}", program, e)))?;
    if !status.success() {
        tracing::debug!("{} exited with {}", program, status);
    }

    let mut raw = Vec::new();
    File::open(capture.path())?.read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}
