//! Command/response exchange engine
//!
//! One receive loop serves every framing convention. An [`Exchange`] sends a
//! command (bulk, paced or echo-verified), then collects reply bytes until its
//! [`Terminator`] fires, the reply outgrows the buffer, the device goes away,
//! or no byte arrives for `timeout`. The timeout rolls: each received byte
//! restarts it.

use std::io;
use std::time::{Duration, Instant};

use crate::driver::Poll;
use crate::error::{CommError, Result};
use crate::{ACK, CR, LF, NAK};

/// Byte transport used by the engine
pub trait ByteLink {
    /// Poll for input, consuming the byte when one is available
    fn recv(&mut self) -> Poll;

    /// Write all of `data`
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Called between empty polls
    fn idle(&mut self) {
        std::thread::yield_now();
    }
}

/// Which byte ends a line in [`Terminator::Line`] mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// CR ends the line, LF is dropped
    Cr,
    /// LF ends the line, CR is dropped
    Lf,
}

impl LineEnding {
    fn bytes(self) -> (u8, u8) {
        match self {
            LineEnding::Cr => (CR, LF),
            LineEnding::Lf => (LF, CR),
        }
    }
}

/// What ends a reply
///
/// Terminator bytes are consumed and never part of the returned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// ACK ends with success, NAK with [`CommError::ProtocolNak`]
    AckNak,
    /// Any of these bytes ends with success
    Delimiters(Vec<u8>),
    /// Multi-byte success and failure sequences
    Sequence { ack: Vec<u8>, nak: Vec<u8> },
    /// Success once this many bytes have arrived
    FixedLength(usize),
    /// A text line; a full buffer also ends the line with success
    Line(LineEnding),
    /// Success once the input stream contains this sequence; nothing is
    /// returned
    Pattern(Vec<u8>),
}

/// How the command is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    /// One write for the whole command
    Bulk,
    /// One byte at a time with this pause before and after each byte
    Paced(Duration),
    /// One byte at a time, each echoed back by the device before the next
    FullDuplex { echo_timeout: Duration },
}

/// Printable rendering of raw bytes for diagnostics
pub fn printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

/// One command/response exchange
pub struct Exchange<'a> {
    command: &'a [u8],
    terminator: Terminator,
    timeout: Duration,
    capacity: usize,
    transmit: Transmit,
    strip_parity: bool,
    drain_first: bool,
    on_idle: Option<&'a mut dyn FnMut()>,
    echo: Option<&'a mut dyn io::Write>,
}

enum Step {
    More,
    Done(Result<Vec<u8>>),
}

impl<'a> Exchange<'a> {
    /// Exchange with the given command and framing
    ///
    /// `capacity` counts a terminating slot, so at most `capacity - 1` payload
    /// bytes are ever returned. An empty command only listens.
    pub fn new(
        command: &'a [u8],
        terminator: Terminator,
        timeout: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            command,
            terminator,
            timeout,
            capacity,
            transmit: Transmit::Bulk,
            strip_parity: false,
            drain_first: false,
            on_idle: None,
            echo: None,
        }
    }

    pub fn transmit(mut self, transmit: Transmit) -> Self {
        self.transmit = transmit;
        self
    }

    /// Clear bit 7 of every received byte before framing
    pub fn strip_parity(mut self) -> Self {
        self.strip_parity = true;
        self
    }

    /// Discard (and log) unsolicited input before sending
    pub fn drain_first(mut self) -> Self {
        self.drain_first = true;
        self
    }

    /// Call `f` on every poll that finds no data
    pub fn on_idle(mut self, f: &'a mut dyn FnMut()) -> Self {
        self.on_idle = Some(f);
        self
    }

    /// Copy every payload byte to `sink` as it arrives
    pub fn echo_to(mut self, sink: &'a mut dyn io::Write) -> Self {
        self.echo = Some(sink);
        self
    }

    fn limit(&self) -> usize {
        self.capacity.saturating_sub(1)
    }

    /// Run the exchange to completion
    pub fn run<L: ByteLink + ?Sized>(mut self, link: &mut L) -> Result<Vec<u8>> {
        if self.drain_first {
            drain(link)?;
        }
        self.send_command(link)?;

        let mut payload = Vec::new();
        let mut window = Vec::new();
        if let Some(done) = self.check_complete(&payload) {
            return done;
        }

        let mut last_rx = Instant::now();
        loop {
            match link.recv() {
                Poll::Available(rx) => {
                    last_rx = Instant::now();
                    let byte = if self.strip_parity {
                        rx.seven_bit()
                    } else {
                        rx.value
                    };
                    match self.accept(byte, &mut payload, &mut window)? {
                        Step::More => {}
                        Step::Done(result) => return result,
                    }
                }
                Poll::Empty => {
                    if last_rx.elapsed() >= self.timeout {
                        tracing::debug!(
                            "no reply to '{}' within {:?} ({} bytes so far)",
                            printable(self.command),
                            self.timeout,
                            payload.len()
                        );
                        return Err(CommError::Timeout);
                    }
                    if let Some(f) = self.on_idle.as_deref_mut() {
                        f();
                    }
                    link.idle();
                }
                Poll::Disconnected => {
                    tracing::warn!(
                        "device disconnected during '{}'",
                        printable(self.command)
                    );
                    return Err(CommError::Disconnected);
                }
            }
        }
    }

    fn send_command<L: ByteLink + ?Sized>(&self, link: &mut L) -> Result<()> {
        if self.command.is_empty() {
            return Ok(());
        }
        tracing::trace!("send '{}'", printable(self.command));
        match self.transmit {
            Transmit::Bulk => link.send(self.command),
            Transmit::Paced(pause) => {
                for &byte in self.command {
                    std::thread::sleep(pause);
                    link.send(&[byte])?;
                    std::thread::sleep(pause);
                }
                Ok(())
            }
            Transmit::FullDuplex { echo_timeout } => {
                for &byte in self.command {
                    link.send(&[byte])?;
                    let echoed = wait_byte(link, echo_timeout)?;
                    if echoed != Some(byte) {
                        tracing::debug!(
                            "echo of {:#04x} in '{}' came back as {:?}",
                            byte,
                            printable(self.command),
                            echoed
                        );
                        return Err(CommError::EchoMismatch {
                            expected: byte,
                            received: echoed,
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Completion check before any byte arrives
    fn check_complete(&self, payload: &[u8]) -> Option<Result<Vec<u8>>> {
        match &self.terminator {
            Terminator::FixedLength(count) if (*count).min(self.limit()) == payload.len() => {
                Some(Ok(payload.to_vec()))
            }
            Terminator::Line(_) if self.limit() == 0 => Some(Ok(Vec::new())),
            Terminator::Pattern(pattern) if pattern.is_empty() => Some(Ok(Vec::new())),
            _ => None,
        }
    }

    fn accept(&mut self, byte: u8, payload: &mut Vec<u8>, window: &mut Vec<u8>) -> Result<Step> {
        let limit = self.limit();
        let full = payload.len() >= limit;
        let echo = &mut self.echo;

        match &self.terminator {
            Terminator::AckNak => match byte {
                ACK => Ok(Step::Done(Ok(std::mem::take(payload)))),
                NAK => Ok(Step::Done(Err(CommError::ProtocolNak(std::mem::take(payload))))),
                _ if full => Ok(Step::Done(Err(CommError::BufferFull))),
                _ => keep(echo, byte, payload).map(|_| Step::More),
            },

            Terminator::Delimiters(set) => {
                if set.contains(&byte) {
                    Ok(Step::Done(Ok(std::mem::take(payload))))
                } else if full {
                    Ok(Step::Done(Err(CommError::BufferFull)))
                } else {
                    keep(echo, byte, payload).map(|_| Step::More)
                }
            }

            Terminator::FixedLength(count) => {
                keep(echo, byte, payload)?;
                if payload.len() >= (*count).min(limit) {
                    Ok(Step::Done(Ok(std::mem::take(payload))))
                } else {
                    Ok(Step::More)
                }
            }

            Terminator::Line(ending) => {
                let (end, skip) = ending.bytes();
                if byte == end {
                    return Ok(Step::Done(Ok(std::mem::take(payload))));
                }
                if byte == skip {
                    return Ok(Step::More);
                }
                keep(echo, byte, payload)?;
                if payload.len() >= limit {
                    Ok(Step::Done(Ok(std::mem::take(payload))))
                } else {
                    Ok(Step::More)
                }
            }

            Terminator::Sequence { ack, nak } => {
                // Sequence bytes pass through the window and are cut off on a match
                window.push(byte);
                let success = if !ack.is_empty() && window.ends_with(ack) {
                    window.truncate(window.len() - ack.len());
                    true
                } else if !nak.is_empty() && window.ends_with(nak) {
                    window.truncate(window.len() - nak.len());
                    false
                } else {
                    let longest = ack.len().max(nak.len()).max(1);
                    if window.len() >= limit + longest {
                        return Ok(Step::Done(Err(CommError::BufferFull)));
                    }
                    return Ok(Step::More);
                };

                if window.len() > limit {
                    return Ok(Step::Done(Err(CommError::BufferFull)));
                }
                for byte in std::mem::take(window) {
                    keep(echo, byte, payload)?;
                }
                let body = std::mem::take(payload);
                if success {
                    Ok(Step::Done(Ok(body)))
                } else {
                    Ok(Step::Done(Err(CommError::ProtocolNak(body))))
                }
            }

            Terminator::Pattern(pattern) => {
                window.push(byte);
                if window.len() > pattern.len() {
                    window.remove(0);
                }
                if window.as_slice() == pattern.as_slice() {
                    Ok(Step::Done(Ok(Vec::new())))
                } else {
                    Ok(Step::More)
                }
            }
        }
    }
}

/// Store a payload byte, copying it to the echo sink when there is one
fn keep(echo: &mut Option<&mut dyn io::Write>, byte: u8, payload: &mut Vec<u8>) -> Result<()> {
    payload.push(byte);
    if let Some(sink) = echo.as_mut() {
        sink.write_all(&[byte])?;
        sink.flush()?;
    }
    Ok(())
}

/// Wait up to `wait` for one byte
fn wait_byte<L: ByteLink + ?Sized>(link: &mut L, wait: Duration) -> Result<Option<u8>> {
    let started = Instant::now();
    loop {
        match link.recv() {
            Poll::Available(rx) => return Ok(Some(rx.value)),
            Poll::Disconnected => return Err(CommError::Disconnected),
            Poll::Empty if started.elapsed() >= wait => return Ok(None),
            Poll::Empty => link.idle(),
        }
    }
}

/// Throw away whatever input is pending
fn drain<L: ByteLink + ?Sized>(link: &mut L) -> Result<()> {
    let mut stale = Vec::new();
    loop {
        match link.recv() {
            Poll::Available(rx) => stale.push(rx.value),
            Poll::Empty => break,
            Poll::Disconnected => return Err(CommError::Disconnected),
        }
    }
    if !stale.is_empty() {
        tracing::debug!("discarded unsolicited input '{}'", printable(&stale));
    }
    Ok(())
}
