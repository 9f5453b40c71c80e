//! Command/response calls on the selected port

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use super::engine::{ByteLink, Exchange, LineEnding, Terminator, Transmit};
use crate::driver::{backoff, Poll, SerialDriver};
use crate::error::Result;
use crate::port::SerialBackend;

/// Serializes [`SerialDriver::cmdio_exclusive`] across the whole process
static EXCHANGE_LOCK: Mutex<()> = Mutex::new(());

impl<B: SerialBackend> ByteLink for SerialDriver<B> {
    fn recv(&mut self) -> Poll {
        self.recv_selected()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.write_block(data)
    }

    fn idle(&mut self) {
        backoff(self.config());
    }
}

impl<B: SerialBackend> SerialDriver<B> {
    /// Run a prepared exchange on the selected port
    pub fn exchange(&mut self, exchange: Exchange<'_>) -> Result<Vec<u8>> {
        exchange.run(self)
    }

    /// Send `command` and collect the reply up to ACK or NAK
    ///
    /// `command` goes out verbatim, so it must carry its own line terminator.
    /// At most `capacity - 1` reply bytes are returned.
    pub fn cmdio(&mut self, command: &[u8], timeout: Duration, capacity: usize) -> Result<Vec<u8>> {
        self.exchange(Exchange::new(command, Terminator::AckNak, timeout, capacity))
    }

    /// [`cmdio`](Self::cmdio) that calls `on_idle` whenever a poll finds no data
    pub fn cmdio_with_idle(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
        on_idle: &mut dyn FnMut(),
    ) -> Result<Vec<u8>> {
        self.exchange(
            Exchange::new(command, Terminator::AckNak, timeout, capacity).on_idle(on_idle),
        )
    }

    /// Send `command` and collect the reply up to any byte in `delimiters`
    pub fn cmdio_delimited(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
        delimiters: &[u8],
    ) -> Result<Vec<u8>> {
        let terminator = Terminator::Delimiters(delimiters.to_vec());
        self.exchange(Exchange::new(command, terminator, timeout, capacity))
    }

    /// [`cmdio_delimited`](Self::cmdio_delimited) holding a process-wide lock
    /// for the whole exchange
    ///
    /// This is the call to use from several threads: TinyG answers with
    /// LF-terminated JSON lines, so `delimiters` is usually `b"\n"`. An empty
    /// `command` only listens. With `clear_input`, unsolicited bytes waiting
    /// before the command is sent are discarded and logged.
    pub fn cmdio_exclusive(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
        delimiters: &[u8],
        clear_input: bool,
    ) -> Result<Vec<u8>> {
        let _guard = EXCHANGE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let terminator = Terminator::Delimiters(delimiters.to_vec());
        let mut exchange = Exchange::new(command, terminator, timeout, capacity);
        if clear_input {
            exchange = exchange.drain_first();
        }
        self.exchange(exchange)
    }

    /// [`cmdio`](Self::cmdio) with a pause before and after every command
    /// byte, after discarding unsolicited input
    pub fn cmdio_paced(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
        pacing: Duration,
    ) -> Result<Vec<u8>> {
        self.exchange(
            Exchange::new(command, Terminator::AckNak, timeout, capacity)
                .drain_first()
                .transmit(Transmit::Paced(pacing)),
        )
    }

    /// [`cmdio`](Self::cmdio) copying each reply byte to `sink` as it arrives
    pub fn cmdio_echo(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
        sink: &mut dyn io::Write,
    ) -> Result<Vec<u8>> {
        self.exchange(Exchange::new(command, Terminator::AckNak, timeout, capacity).echo_to(sink))
    }

    /// [`cmdio`](Self::cmdio) where the device echoes every command byte
    ///
    /// Each byte must come back unchanged within the echo timeout before the
    /// next one is sent.
    pub fn cmdio_full_duplex(
        &mut self,
        command: &[u8],
        timeout: Duration,
        capacity: usize,
    ) -> Result<Vec<u8>> {
        let echo_timeout = self.config().echo_timeout();
        self.exchange(
            Exchange::new(command, Terminator::AckNak, timeout, capacity)
                .drain_first()
                .transmit(Transmit::FullDuplex { echo_timeout }),
        )
    }

    /// Read a CR-terminated line with LF dropped and bit 7 cleared
    pub fn read_line(&mut self, timeout: Duration, capacity: usize) -> Result<Vec<u8>> {
        self.exchange(
            Exchange::new(b"", Terminator::Line(LineEnding::Cr), timeout, capacity).strip_parity(),
        )
    }

    /// Read exactly `count` bytes
    pub fn read_exact(
        &mut self,
        timeout: Duration,
        count: usize,
        strip_parity: bool,
    ) -> Result<Vec<u8>> {
        let mut exchange = Exchange::new(
            b"",
            Terminator::FixedLength(count),
            timeout,
            count.saturating_add(1),
        );
        if strip_parity {
            exchange = exchange.strip_parity();
        }
        self.exchange(exchange)
    }

    /// Optionally send `command`, then read an LF-terminated line
    ///
    /// CR is dropped. A full buffer ends the line successfully.
    pub fn get_line(
        &mut self,
        command: Option<&[u8]>,
        timeout: Duration,
        capacity: usize,
    ) -> Result<Vec<u8>> {
        let command = command.unwrap_or_default();
        self.exchange(Exchange::new(
            command,
            Terminator::Line(LineEnding::Lf),
            timeout,
            capacity,
        ))
    }

    /// Consume input until `pattern` has been seen
    pub fn wait_for(&mut self, timeout: Duration, pattern: &[u8]) -> Result<()> {
        self.exchange(Exchange::new(
            b"",
            Terminator::Pattern(pattern.to_vec()),
            timeout,
            0,
        ))
        .map(|_| ())
    }

    /// Collect input until the `ack` or `nak` sequence arrives
    ///
    /// Bytes before the sequence are returned on success and carried in the
    /// error on NAK.
    pub fn wait_for_reply(
        &mut self,
        timeout: Duration,
        capacity: usize,
        ack: &[u8],
        nak: &[u8],
    ) -> Result<Vec<u8>> {
        let terminator = Terminator::Sequence {
            ack: ack.to_vec(),
            nak: nak.to_vec(),
        };
        self.exchange(Exchange::new(b"", terminator, timeout, capacity))
    }
}
