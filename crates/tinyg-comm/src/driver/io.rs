//! Byte-level I/O
//!
//! Reads go through a one-byte read-ahead cache per slot: [`Poll`] fetches at
//! most one byte from the OS and parks it in the slot, later reads consume it.
//! The same polling path doubles as the disconnect detector.

use std::time::{Duration, Instant};

use super::{backoff, connect_slot, lock, SerialDriver};
use crate::config::DriverConfig;
use crate::error::{CommError, Result};
use crate::port::{PortNumber, SerialBackend};
use crate::registry::PortSlot;
use crate::signals::RxByte;

/// Outcome of polling a port for input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// A byte is waiting in the read-ahead cache
    Available(RxByte),
    /// Connected, nothing pending
    Empty,
    /// The device is gone or could not be reopened
    Disconnected,
}

/// Poll one slot, reconnecting and probing as needed
///
/// A byte found by the OS read stays cached in the slot until consumed.
pub(crate) fn poll_slot<B: SerialBackend>(
    backend: &mut B,
    config: &DriverConfig,
    slot: &mut PortSlot,
) -> Poll {
    let Some(port) = slot.port else {
        return Poll::Disconnected;
    };

    if slot.handle.is_none() {
        if connect_slot(backend, config, slot).is_err() {
            return Poll::Disconnected;
        }
        tracing::info!("{} reconnected", port);
    }

    if let Some(rx) = slot.read_ahead {
        return Poll::Available(rx);
    }

    let check_due = slot
        .last_check
        .map_or(true, |at| at.elapsed() >= config.check_interval());
    if check_due && !check_slot(config, slot, port) {
        return Poll::Disconnected;
    }

    let Some(device) = slot.handle.as_mut() else {
        return Poll::Disconnected;
    };
    match device.read_nowait() {
        Ok(Some(value)) => {
            let rx = RxByte::with_errors(value, device.take_line_errors());
            slot.read_ahead = Some(rx);
            slot.connected = true;
            Poll::Available(rx)
        }
        Ok(None) => {
            slot.connected = true;
            Poll::Empty
        }
        Err(e) => {
            tracing::warn!("{} read failed, dropping handle: {}", port, e);
            slot.drop_handle();
            Poll::Disconnected
        }
    }
}

/// Reapply the saved configuration as a liveness check
fn check_slot(config: &DriverConfig, slot: &mut PortSlot, port: PortNumber) -> bool {
    let line = slot.saved_config;
    let Some(device) = slot.handle.as_mut() else {
        return false;
    };

    let started = Instant::now();
    let result = device.check_health(&line);
    let took = started.elapsed();
    slot.last_check = Some(Instant::now());

    match result {
        Ok(()) if took <= config.check_deadline() => true,
        Ok(()) => {
            tracing::warn!("{} health check took {:?}, treating as disconnected", port, took);
            slot.drop_handle();
            false
        }
        Err(e) => {
            tracing::warn!("{} health check failed, dropping handle: {}", port, e);
            slot.drop_handle();
            false
        }
    }
}

/// Poll until a byte is cached or `wait` passes, then consume it
fn read_slot<B: SerialBackend>(
    backend: &mut B,
    config: &DriverConfig,
    slot: &mut PortSlot,
    wait: Duration,
) -> Result<RxByte> {
    let started = Instant::now();
    loop {
        match poll_slot(backend, config, slot) {
            Poll::Available(rx) => {
                slot.read_ahead = None;
                return Ok(rx);
            }
            Poll::Disconnected => return Err(CommError::Disconnected),
            Poll::Empty if started.elapsed() >= wait => return Err(CommError::Timeout),
            Poll::Empty => backoff(config),
        }
    }
}

/// Write all of `data`, retrying partial writes until the write deadline
fn write_slot<B: SerialBackend>(
    backend: &mut B,
    config: &DriverConfig,
    slot: &mut PortSlot,
    data: &[u8],
) -> Result<()> {
    if slot.handle.is_none() {
        connect_slot(backend, config, slot).map_err(|_| CommError::Disconnected)?;
    }
    let port = slot.port.ok_or(CommError::NoPortSelected)?;
    let started = Instant::now();
    let mut sent = 0;

    while sent < data.len() {
        let Some(device) = slot.handle.as_mut() else {
            return Err(CommError::Disconnected);
        };
        match device.write(&data[sent..]) {
            Ok(0) if started.elapsed() >= config.write_deadline() => {
                tracing::warn!(
                    "{} write stalled, {} of {} bytes sent",
                    port,
                    sent,
                    data.len()
                );
                return Err(CommError::Timeout);
            }
            Ok(0) => backoff(config),
            Ok(n) => sent += n,
            Err(e) => {
                tracing::warn!("{} write failed, dropping handle: {}", port, e);
                slot.drop_handle();
                return Err(CommError::Disconnected);
            }
        }
    }
    Ok(())
}

impl<B: SerialBackend> SerialDriver<B> {
    /// Poll the selected port
    pub fn poll_byte(&mut self) -> Poll {
        self.with_selected(|backend, config, slot| Ok(poll_slot(backend, config, slot)))
            .unwrap_or(Poll::Disconnected)
    }

    /// Poll a tracked port without changing the selection
    pub fn poll_port(&mut self, number: u32) -> Result<Poll> {
        self.with_port(number, |backend, config, slot| {
            Ok(poll_slot(backend, config, slot))
        })
    }

    /// Take the first pending byte from any tracked port
    ///
    /// Scanning starts at the slot after the selected one so a chatty port
    /// cannot starve the others. The selection is left unchanged.
    pub fn any_rx(&mut self) -> Option<(PortNumber, RxByte)> {
        let mut reg = lock(&self.registry);
        let capacity = reg.capacity();
        let start = reg.selected().map_or(0, |i| i + 1);

        for index in (0..capacity).map(|step| (start + step) % capacity) {
            let Some(slot) = reg.slot_mut(index) else {
                continue;
            };
            let Some(port) = slot.port else {
                continue;
            };
            if let Poll::Available(rx) = poll_slot(&mut self.backend, &self.config, slot) {
                slot.read_ahead = None;
                return Some((port, rx));
            }
        }
        None
    }

    /// Read one byte from the selected port
    ///
    /// Returns the cached byte at once if there is one, otherwise waits up to
    /// the configured read wait.
    pub fn read_byte(&mut self) -> Result<RxByte> {
        self.with_selected(|backend, config, slot| {
            read_slot(backend, config, slot, config.read_byte_wait())
        })
    }

    /// Read one byte, waiting at most `wait`
    pub fn read_byte_within(&mut self, wait: Duration) -> Result<RxByte> {
        self.with_selected(|backend, config, slot| read_slot(backend, config, slot, wait))
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_block(&[byte])
    }

    pub fn write_str(&mut self, text: &str) -> Result<()> {
        self.write_block(text.as_bytes())
    }

    /// Write all of `data` to the selected port
    pub fn write_block(&mut self, data: &[u8]) -> Result<()> {
        self.with_selected(|backend, config, slot| write_slot(backend, config, slot, data))
    }

    /// Single write attempt; returns how many bytes the OS accepted
    pub fn write_counted(&mut self, data: &[u8]) -> Result<usize> {
        self.with_selected(|_, _, slot| {
            let port = slot.port.ok_or(CommError::NoPortSelected)?;
            let written = slot.device()?.write(data);
            match written {
                Ok(n) => Ok(n),
                Err(e) => {
                    tracing::warn!("{} write failed, dropping handle: {}", port, e);
                    slot.drop_handle();
                    Err(CommError::Disconnected)
                }
            }
        })
    }

    /// Write byte by byte with a pause before each one
    pub fn write_paced(&mut self, data: &[u8], pacing: Duration) -> Result<()> {
        for &byte in data {
            std::thread::sleep(pacing);
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Write byte by byte, swallowing the echo of each one
    ///
    /// The echo is not compared with what was sent; a missing echo only costs
    /// the echo wait. Use `cmdio_full_duplex` for verified transmission.
    pub fn write_full_duplex(&mut self, data: &[u8]) -> Result<()> {
        self.with_selected(|backend, config, slot| {
            for &byte in data {
                write_slot(backend, config, slot, &[byte])?;
                match read_slot(backend, config, slot, config.echo_timeout()) {
                    Ok(_) | Err(CommError::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    pub(crate) fn recv_selected(&mut self) -> Poll {
        self.with_selected(|backend, config, slot| {
            let polled = poll_slot(backend, config, slot);
            if let Poll::Available(_) = polled {
                slot.read_ahead = None;
            }
            Ok(polled)
        })
        .unwrap_or(Poll::Disconnected)
    }
}
