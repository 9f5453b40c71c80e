//! Interactive terminal session
//!
//! Keys read from an input stream go to the selected port, and whatever the
//! port sends is rendered to an output stream, until the exit key arrives.
//! Control characters are shown by name, e.g. `ACK[06]`, and bytes above
//! 0x7E in hex.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use super::{backoff, Poll, SerialDriver};
use crate::error::{CommError, Result};
use crate::port::SerialBackend;
use crate::signals::ModemSignals;
use crate::{CR, ESC};

const CONTROL_NAMES: [&str; 32] = [
    "NUL", "SOH", "STX", "ETX", "EOT", "ENQ", "ACK", "BEL", "BS", "TAB", "LF", "VT", "FF", "CR",
    "SO", "SI", "DLE", "DC1", "DC2", "DC3", "DC4", "NAK", "SYN", "ETB", "CAN", "EM", "SUB", "ESC",
    "FS", "GS", "RS", "US",
];

/// Received bytes rendered per pass before the next key is handled
const RENDER_BURST: usize = 256;

/// Behavior of [`SerialDriver::terminal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOptions {
    /// Ends the session; never sent to the device
    pub exit_key: u8,
    /// Flips the commanded RTS line; never sent to the device
    pub rts_toggle_key: Option<u8>,
    /// Show typed keys locally as well as sending them
    pub local_echo: bool,
    /// Show CR, LF and TAB by name instead of acting on them
    pub binary: bool,
    /// Follow every received CR with a line feed
    pub auto_lf: bool,
    /// Printed before the exit key hint
    pub banner: String,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            exit_key: ESC,
            rts_toggle_key: None,
            local_echo: false,
            binary: false,
            auto_lf: false,
            banner: String::new(),
        }
    }
}

/// Display name of a key: `ESC[1B]` for control characters, hex otherwise
pub fn key_name(key: u8) -> String {
    match CONTROL_NAMES.get(usize::from(key)) {
        Some(name) => format!("{}[{:02X}]", name, key),
        None => format!("{:02X}", key),
    }
}

fn render(byte: u8, options: &TerminalOptions, out: &mut dyn Write) -> std::io::Result<()> {
    match byte {
        b'\r' | b'\n' | b'\t' if !options.binary => {
            out.write_all(&[byte])?;
            if byte == CR && options.auto_lf {
                out.write_all(b"\n")?;
            }
            Ok(())
        }
        0x00..=0x1F => write!(out, "{}", key_name(byte)),
        0x7F..=0xFF => write!(out, "[{:02X}]", byte),
        _ => out.write_all(&[byte]),
    }
}

/// Forward input bytes until the exit key or end of input
fn forward_keys(input: impl Read, exit_key: u8, keys: Sender<u8>) {
    for byte in input.bytes() {
        let Ok(key) = byte else {
            break;
        };
        if keys.send(key).is_err() || key == exit_key {
            break;
        }
    }
}

impl<B: SerialBackend> SerialDriver<B> {
    /// Run a terminal session on the selected port
    ///
    /// Input is read on a helper thread so the port keeps being serviced
    /// while no key is pressed. The session ends on the exit key or when
    /// `input` runs out; pending received data is rendered before each key is
    /// handled. Send failures are logged and the session carries on, so a
    /// replugged device picks up where it left off.
    pub fn terminal<R, W>(&mut self, input: R, output: &mut W, options: &TerminalOptions) -> Result<()>
    where
        R: Read + Send + 'static,
        W: Write,
    {
        let port = self.current_port().ok_or(CommError::NoPortSelected)?;

        write!(output, "{}", options.banner)?;
        writeln!(output, "Press {} to terminate.", key_name(options.exit_key))?;
        output.flush()?;

        let (tx, keys) = mpsc::channel();
        let exit_key = options.exit_key;
        thread::spawn(move || forward_keys(input, exit_key, tx));

        tracing::debug!("terminal session on {}", port);
        self.terminal_loop(keys, output, options)
    }

    fn terminal_loop(
        &mut self,
        keys: Receiver<u8>,
        output: &mut dyn Write,
        options: &TerminalOptions,
    ) -> Result<()> {
        loop {
            let mut rendered = 0;
            while rendered < RENDER_BURST {
                let Poll::Available(rx) = self.recv_selected() else {
                    break;
                };
                render(rx.value, options, output)?;
                rendered += 1;
            }
            if rendered > 0 {
                output.flush()?;
            }

            let key = match keys.try_recv() {
                Ok(key) => key,
                Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => {
                    if rendered == 0 {
                        backoff(&self.config);
                    }
                    continue;
                }
            };

            if key == options.exit_key {
                return Ok(());
            }
            if Some(key) == options.rts_toggle_key {
                let rts = self.toggle_rts()?;
                writeln!(output, "\nRTS {}", if rts { "On" } else { "Off" })?;
                output.flush()?;
                continue;
            }
            if let Err(e) = self.write_byte(key) {
                tracing::warn!("terminal send failed: {}", e);
            }
            if options.local_echo {
                output.write_all(&[key])?;
                output.flush()?;
            }
        }
    }

    /// Flip the commanded RTS line of the selected port, returning the new state
    fn toggle_rts(&mut self) -> Result<bool> {
        let mut signals = self.modem_signals()?;
        signals.toggle(ModemSignals::RTS);
        self.set_modem_signals(signals)?;
        Ok(signals.contains(ModemSignals::RTS))
    }
}
