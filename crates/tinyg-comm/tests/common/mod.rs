//! Scripted serial backend shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tinyg_comm::config::{DriverConfig, LineConfig};
use tinyg_comm::driver::SerialDriver;
use tinyg_comm::error::{CommError, Result};
use tinyg_comm::port::{DeviceProperties, PortNumber, Provider, SerialBackend, SerialDevice};
use tinyg_comm::signals::{LineErrors, ModemSignals};

/// State of one simulated serial line and the device behind it
#[derive(Debug)]
pub struct MockLine {
    /// Bytes the device has sent and the host has not read yet
    pub rx: VecDeque<u8>,
    /// Everything the host wrote
    pub sent: Vec<u8>,
    /// Host output since the last reply trigger fired
    pending: Vec<u8>,
    /// Reply queued when the host output ends with the trigger
    pub replies: Vec<(Vec<u8>, Vec<u8>)>,
    /// Device echoes every byte it receives
    pub echo: bool,
    /// Device attached
    pub plugged: bool,
    generation: u32,
    /// Unplug after this many more bytes have been read
    pub unplug_after_reads: Option<usize>,
    /// Largest write the OS accepts at once
    pub write_limit: Option<usize>,
    pub provider: Provider,
    pub check_fails: bool,
    pub check_delay: Duration,
    /// Every configuration applied, by open, health check or reconfigure
    pub applied: Vec<LineConfig>,
    pub opens: usize,
    pub checks: usize,
    pub clears: usize,
    pub modem: ModemSignals,
    pub line_errors: LineErrors,
    pub breaks: Vec<bool>,
    pub write_timeout: Duration,
}

impl Default for MockLine {
    fn default() -> Self {
        Self {
            rx: VecDeque::new(),
            sent: Vec::new(),
            pending: Vec::new(),
            replies: Vec::new(),
            echo: false,
            plugged: true,
            generation: 0,
            unplug_after_reads: None,
            write_limit: None,
            provider: Provider::Rs232,
            check_fails: false,
            check_delay: Duration::ZERO,
            applied: Vec::new(),
            opens: 0,
            checks: 0,
            clears: 0,
            modem: ModemSignals::empty(),
            line_errors: LineErrors::empty(),
            breaks: Vec::new(),
            write_timeout: Duration::ZERO,
        }
    }
}

impl MockLine {
    /// Queue bytes as if the device had sent them
    pub fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Queue `reply` whenever the host finishes writing `trigger`
    pub fn reply_to(&mut self, trigger: &[u8], reply: &[u8]) {
        self.replies.push((trigger.to_vec(), reply.to_vec()));
    }

    /// Pull the cable; handles opened before stay dead after a replug
    pub fn unplug(&mut self) {
        self.plugged = false;
        self.generation += 1;
    }

    pub fn replug(&mut self) {
        self.plugged = true;
    }

    fn accept_write(&mut self, data: &[u8]) {
        for &b in data {
            self.sent.push(b);
            self.pending.push(b);
            if self.echo {
                self.rx.push_back(b);
            }
        }
        let fired = self
            .replies
            .iter()
            .find(|(trigger, _)| !trigger.is_empty() && self.pending.ends_with(trigger))
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = fired {
            self.pending.clear();
            self.rx.extend(reply);
        }
    }
}

pub type SharedLine = Arc<Mutex<MockLine>>;

pub fn lock(line: &SharedLine) -> MutexGuard<'_, MockLine> {
    line.lock().unwrap()
}

/// Backend whose ports are [`MockLine`]s
#[derive(Debug, Default)]
pub struct MockBackend {
    lines: BTreeMap<u32, SharedLine>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The simulated line behind `port`, created on first use
    pub fn line(&mut self, port: u32) -> SharedLine {
        Arc::clone(self.lines.entry(port).or_default())
    }
}

impl SerialBackend for MockBackend {
    fn device_path(&self, port: PortNumber) -> String {
        format!("mock://{}", port)
    }

    fn open(&mut self, port: PortNumber, path: &str) -> Result<Box<dyn SerialDevice>> {
        let line = self
            .lines
            .get(&port.get())
            .cloned()
            .ok_or_else(|| CommError::os(Some(2), "no such device"))?;
        let generation = {
            let mut l = lock(&line);
            if !l.plugged {
                return Err(CommError::os(Some(2), "device not present"));
            }
            l.opens += 1;
            l.generation
        };
        Ok(Box::new(MockDevice {
            line,
            generation,
            path: path.to_string(),
        }))
    }
}

struct MockDevice {
    line: SharedLine,
    generation: u32,
    path: String,
}

impl MockDevice {
    fn alive(&self) -> io::Result<MutexGuard<'_, MockLine>> {
        let l = lock(&self.line);
        if l.plugged && l.generation == self.generation {
            Ok(l)
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"))
        }
    }
}

impl SerialDevice for MockDevice {
    fn read_nowait(&mut self) -> io::Result<Option<u8>> {
        let mut l = self.alive()?;
        let byte = l.rx.pop_front();
        if byte.is_some() {
            if let Some(left) = l.unplug_after_reads.as_mut() {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    l.unplug_after_reads = None;
                    l.unplug();
                }
            }
        }
        Ok(byte)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut l = self.alive()?;
        let n = l.write_limit.map_or(data.len(), |max| max.min(data.len()));
        l.accept_write(&data[..n]);
        Ok(n)
    }

    fn apply_config(&mut self, config: &LineConfig) -> Result<()> {
        let mut l = self.alive()?;
        l.applied.push(*config);
        Ok(())
    }

    fn check_health(&mut self, config: &LineConfig) -> Result<()> {
        let delay = {
            let mut l = self.alive()?;
            l.checks += 1;
            if l.check_fails {
                return Err(CommError::os(Some(22), "health check failed"));
            }
            l.applied.push(*config);
            l.check_delay
        };
        std::thread::sleep(delay);
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.alive()?.write_timeout = timeout;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut l = self.alive()?;
        l.clears += 1;
        l.rx.clear();
        Ok(())
    }

    fn take_line_errors(&mut self) -> LineErrors {
        let mut l = lock(&self.line);
        std::mem::take(&mut l.line_errors)
    }

    fn modem_status(&mut self) -> Result<ModemSignals> {
        Ok(self.alive()?.modem)
    }

    fn set_break(&mut self, on: bool) -> Result<()> {
        self.alive()?.breaks.push(on);
        Ok(())
    }

    fn provider(&self) -> Provider {
        lock(&self.line).provider
    }

    fn properties(&mut self) -> Result<DeviceProperties> {
        let l = self.alive()?;
        let line = l.applied.last().copied().unwrap_or_default();
        Ok(DeviceProperties {
            name: Some(self.path.clone()),
            provider: l.provider,
            baud_rate: line.baud_rate,
            data_bits: line.data_bits,
            parity: line.parity,
            stop_bits: line.stop_bits,
            flow_control: line.flow_control,
            rx_queued: l.rx.len() as u32,
            tx_queued: 0,
            write_timeout: l.write_timeout,
        })
    }
}

/// Timings short enough for tests
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        read_byte_wait_ms: 30,
        write_deadline_ms: 30,
        echo_timeout_ms: 30,
        ..DriverConfig::default()
    }
}

/// Driver over a mock backend with lines for `ports` already attached
pub fn driver_with(ports: &[u32]) -> (SerialDriver<MockBackend>, Vec<SharedLine>) {
    init_tracing();
    let mut backend = MockBackend::new();
    let lines = ports.iter().map(|&p| backend.line(p)).collect();
    let driver = SerialDriver::with_config(backend, fast_config()).unwrap();
    (driver, lines)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
