//! Block transfers
//!
//! Non-blocking chunk writes and chunked receives for large, fast payloads.
//! A chunked receive reads the device directly: once [`get_chunk`] is armed on
//! a port, collect its data through [`wait_for_chunks`] or
//! [`wait_all_chunks`] rather than the byte-level reads.
//!
//! [`get_chunk`]: SerialDriver::get_chunk
//! [`wait_for_chunks`]: SerialDriver::wait_for_chunks
//! [`wait_all_chunks`]: SerialDriver::wait_all_chunks

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{backoff, connect_slot, lock, SerialDriver};
use crate::config::DriverConfig;
use crate::error::{CommError, Result};
use crate::port::{PortNumber, SerialBackend};
use crate::registry::PortSlot;

/// Per-slot block transfer state, dropped with the slot
#[derive(Debug, Default)]
pub(crate) struct BlockState {
    outgoing: VecDeque<u8>,
    incoming: Option<ChunkedRead>,
}

impl BlockState {
    pub(crate) fn is_idle(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_none()
    }
}

/// One block of received data handed back by [`SerialDriver::wait_for_chunks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Port the data came from
    pub port: PortNumber,
    /// Position of `data` within the armed transfer
    pub offset: usize,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct ChunkedRead {
    data: Vec<u8>,
    size: usize,
    chunk_size: usize,
    returned: usize,
    timeout: Duration,
    deadline: Instant,
}

impl ChunkedRead {
    fn is_complete(&self) -> bool {
        self.data.len() >= self.size
    }

    /// Next full chunk, or the short tail once the transfer is complete
    fn take_chunk(&mut self) -> Option<(usize, Vec<u8>)> {
        let pending = self.data.len() - self.returned;
        if pending == 0 || (pending < self.chunk_size && !self.is_complete()) {
            return None;
        }
        let offset = self.returned;
        let end = offset + pending.min(self.chunk_size);
        self.returned = end;
        Some((offset, self.data[offset..end].to_vec()))
    }

    fn is_drained(&self) -> bool {
        self.is_complete() && self.returned >= self.size
    }
}

/// Time `size` bytes take at `baud_rate` with ten bits per byte, times three
fn transfer_timeout(size: usize, baud_rate: u32, floor: Duration) -> Duration {
    let micros = 30_000_000u64.saturating_mul(size as u64) / u64::from(baud_rate.max(1));
    Duration::from_micros(micros).max(floor)
}

fn ensure_handle<B: SerialBackend>(
    backend: &mut B,
    config: &DriverConfig,
    slot: &mut PortSlot,
) -> Result<()> {
    if slot.handle.is_none() {
        connect_slot(backend, config, slot).map_err(|_| CommError::Disconnected)?;
    }
    Ok(())
}

/// Hand queued output to the OS, as much as it takes in one write
fn pump_outgoing(port: PortNumber, slot: &mut PortSlot) -> Result<()> {
    if slot.block.outgoing.is_empty() {
        return Ok(());
    }
    let Some(device) = slot.handle.as_mut() else {
        slot.block.outgoing.clear();
        return Err(CommError::Disconnected);
    };
    match device.write(slot.block.outgoing.make_contiguous()) {
        Ok(n) => {
            slot.block.outgoing.drain(..n);
            Ok(())
        }
        Err(e) => {
            tracing::warn!("{} chunk write failed, dropping handle: {}", port, e);
            slot.drop_handle();
            slot.block.outgoing.clear();
            Err(CommError::Disconnected)
        }
    }
}

/// Move whatever the device has pending into the armed receive buffer
fn pump_incoming(port: PortNumber, slot: &mut PortSlot) -> Result<()> {
    let Some(read) = slot.block.incoming.as_mut() else {
        return Ok(());
    };
    let Some(device) = slot.handle.as_mut() else {
        slot.block.incoming = None;
        return Err(CommError::Disconnected);
    };

    let chunks_before = read.data.len() / read.chunk_size;
    while !read.is_complete() {
        match device.read_nowait() {
            Ok(Some(byte)) => read.data.push(byte),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("{} chunk read failed, dropping handle: {}", port, e);
                slot.drop_handle();
                slot.block.incoming = None;
                return Err(CommError::Disconnected);
            }
        }
    }
    if read.data.len() / read.chunk_size > chunks_before || read.is_complete() {
        read.deadline = Instant::now() + read.timeout;
    }
    Ok(())
}

/// Tear the port down when an unfinished transfer ran past its deadline
fn check_deadline(port: PortNumber, slot: &mut PortSlot) -> Result<()> {
    let expired = slot
        .block
        .incoming
        .as_ref()
        .is_some_and(|read| !read.is_complete() && Instant::now() > read.deadline);
    if expired {
        if let Some(read) = slot.block.incoming.as_ref() {
            tracing::warn!(
                "{} block receive timed out, {} of {} bytes",
                port,
                read.data.len(),
                read.size
            );
        }
        slot.drop_handle();
        slot.block = BlockState::default();
        return Err(CommError::Timeout);
    }
    Ok(())
}

impl<B: SerialBackend> SerialDriver<B> {
    /// Queue `data` for the selected port and return without waiting
    ///
    /// Poll [`chunk_sent`](Self::chunk_sent) until it reports the queue empty.
    /// Returns the number of bytes queued.
    pub fn out_chunk(&mut self, data: &[u8]) -> Result<usize> {
        self.with_selected(|backend, config, slot| {
            ensure_handle(backend, config, slot)?;
            let port = slot.port.ok_or(CommError::NoPortSelected)?;
            slot.block.outgoing.extend(data.iter().copied());
            pump_outgoing(port, slot)?;
            Ok(data.len())
        })
    }

    /// Push more queued output; true once everything queued has gone out
    pub fn chunk_sent(&mut self) -> Result<bool> {
        self.with_selected(|_, _, slot| {
            let port = slot.port.ok_or(CommError::NoPortSelected)?;
            pump_outgoing(port, slot)?;
            Ok(slot.block.outgoing.is_empty())
        })
    }

    /// Arm a receive of `size` bytes on a tracked port, delivered in blocks of
    /// `chunk_size`
    ///
    /// With `chunk_size` zero or at least `size`, nothing is delivered until
    /// every byte has arrived. The transfer times out after three times the
    /// time `size` bytes take at the port's baud rate, rolled forward each time
    /// a block completes; on timeout the port's handle is dropped.
    ///
    /// Returns the number of bytes armed.
    pub fn get_chunk(&mut self, number: u32, size: usize, chunk_size: usize) -> Result<usize> {
        self.with_port(number, |backend, config, slot| {
            ensure_handle(backend, config, slot)?;
            if size == 0 {
                slot.block.incoming = None;
                return Ok(0);
            }
            let chunk_size = if chunk_size == 0 { size } else { chunk_size.min(size) };
            let timeout =
                transfer_timeout(size, slot.saved_config.baud_rate, config.read_byte_wait());

            let mut data = Vec::with_capacity(size);
            if let Some(rx) = slot.read_ahead.take() {
                data.push(rx.value);
            }
            slot.block.incoming = Some(ChunkedRead {
                data,
                size,
                chunk_size,
                returned: 0,
                timeout,
                deadline: Instant::now() + timeout,
            });
            Ok(size)
        })
    }

    /// Next block of data from any port with an armed receive
    ///
    /// Ports take turns, starting after the one served last, so one fast
    /// port cannot starve the rest. `on_idle` runs whenever a pass finds
    /// nothing. Returns `Ok(None)` once every armed transfer has been handed
    /// back in full. A transfer that times out drops its port's handle and
    /// gives `Err(Timeout)`.
    pub fn wait_for_chunks(
        &mut self,
        mut on_idle: Option<&mut dyn FnMut()>,
    ) -> Result<Option<Chunk>> {
        loop {
            let mut reg = lock(&self.registry);
            let capacity = reg.capacity();
            let mut active = false;

            for step in 0..capacity {
                let index = (self.chunk_cursor + step) % capacity;
                let Some(slot) = reg.slot_mut(index) else {
                    continue;
                };
                let Some(port) = slot.port else {
                    continue;
                };
                if slot.block.incoming.is_none() {
                    continue;
                }
                active = true;

                pump_incoming(port, slot)?;
                if let Some(read) = slot.block.incoming.as_mut() {
                    if let Some((offset, data)) = read.take_chunk() {
                        if read.is_drained() {
                            slot.block.incoming = None;
                        }
                        self.chunk_cursor = (index + 1) % capacity;
                        return Ok(Some(Chunk { port, offset, data }));
                    }
                }
                check_deadline(port, slot)?;
            }
            drop(reg);

            if !active {
                return Ok(None);
            }
            if let Some(f) = on_idle.as_deref_mut() {
                f();
            }
            backoff(&self.config);
        }
    }

    /// Wait until every armed receive has all its bytes
    ///
    /// The data stays queued for [`wait_for_chunks`](Self::wait_for_chunks).
    /// Returns the total number of bytes received across all ports.
    pub fn wait_all_chunks(&mut self) -> Result<usize> {
        loop {
            let mut reg = lock(&self.registry);
            let capacity = reg.capacity();
            let mut running = false;
            let mut received = 0;

            for index in 0..capacity {
                let Some(slot) = reg.slot_mut(index) else {
                    continue;
                };
                let Some(port) = slot.port else {
                    continue;
                };
                if slot.block.incoming.is_none() {
                    continue;
                }
                pump_incoming(port, slot)?;
                check_deadline(port, slot)?;
                if let Some(read) = slot.block.incoming.as_ref() {
                    running |= !read.is_complete();
                    received += read.data.len();
                }
            }
            drop(reg);

            if !running {
                return Ok(received);
            }
            backoff(&self.config);
        }
    }
}
