mod common;

use common::{driver_with, fast_config, lock, MockBackend};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tinyg_comm::prelude::*;
use tinyg_comm::port::Provider;
use tinyg_comm::shutdown;

#[test]
fn test_open_twice_is_idempotent() {
    let (mut driver, lines) = driver_with(&[3]);

    driver.open(3).unwrap();
    driver.open(3).unwrap();

    assert_eq!(lock(&lines[0]).opens, 1);
    assert_eq!(driver.state(3), ConnectionState::Connected);
    assert_eq!(driver.current_port().map(PortNumber::get), Some(3));
    assert!(driver.is_connected());
    assert!(shutdown::hook_installed());
}

#[test]
fn test_open_applies_defaults_then_flushes() {
    let (mut driver, lines) = driver_with(&[1]);
    lock(&lines[0]).push_rx(b"stale");

    driver.open(1).unwrap();

    let line = lock(&lines[0]);
    assert_eq!(line.applied, vec![LineConfig::default()]);
    assert_eq!(line.clears, 1);
    assert!(line.rx.is_empty());
}

#[test]
fn test_bad_port_numbers_rejected() {
    let (mut driver, _) = driver_with(&[]);
    assert!(matches!(driver.open(0), Err(CommError::BadPort(0))));
    assert!(matches!(driver.open(256), Err(CommError::BadPort(256))));
    assert_eq!(driver.state(0), ConnectionState::Empty);
}

#[test]
fn test_capacity_limits_tracked_ports() {
    let mut backend = MockBackend::new();
    for port in 1..=3 {
        backend.line(port);
    }
    let config = DriverConfig {
        max_ports: 2,
        ..fast_config()
    };
    let mut driver = SerialDriver::with_config(backend, config).unwrap();

    driver.open(1).unwrap();
    driver.open(2).unwrap();
    assert!(matches!(driver.open(3), Err(CommError::TooManyPorts)));

    driver.close(1).unwrap();
    driver.open(3).unwrap();
    assert_eq!(driver.state(3), ConnectionState::Connected);
}

#[test]
fn test_non_serial_device_refused() {
    let (mut driver, lines) = driver_with(&[4]);
    lock(&lines[0]).provider = Provider::Other;

    let err = driver.open(4).unwrap_err();
    assert!(matches!(err, CommError::NotASerialPort(p) if p.get() == 4));
    assert_eq!(driver.state(4), ConnectionState::Empty);
    assert_eq!(driver.current_port(), None);
}

#[test]
fn test_missing_device_reports_os_error() {
    let (mut driver, _) = driver_with(&[]);
    assert!(matches!(driver.open(9), Err(CommError::Os { code: Some(2), .. })));
    assert_eq!(driver.state(9), ConnectionState::Empty);
}

#[test]
fn test_reconnect_restores_caller_config() {
    let (mut driver, lines) = driver_with(&[5]);
    driver.open(5).unwrap();

    let custom = LineConfig {
        baud_rate: 115200,
        parity: Parity::Even,
        stop_bits: StopBits::Two,
        flow_control: FlowControl::RtsCts,
        ..LineConfig::default()
    };
    driver.set_line_config(custom).unwrap();

    lock(&lines[0]).unplug();
    assert_eq!(driver.poll_byte(), Poll::Disconnected);
    assert_eq!(driver.state(5), ConnectionState::Disconnected);

    // Still gone: the reopen attempt fails quietly
    assert_eq!(driver.poll_byte(), Poll::Disconnected);

    lock(&lines[0]).replug();
    assert_eq!(driver.poll_byte(), Poll::Empty);
    assert_eq!(driver.state(5), ConnectionState::Connected);

    let line = lock(&lines[0]);
    assert_eq!(line.opens, 2);
    assert_eq!(line.applied.last(), Some(&custom));
    assert_eq!(driver.line_config().unwrap(), custom);
}

#[test]
fn test_failed_health_check_means_disconnect() {
    let mut backend = MockBackend::new();
    let line = backend.line(2);
    let config = DriverConfig {
        check_interval_ms: 0,
        ..fast_config()
    };
    let mut driver = SerialDriver::with_config(backend, config).unwrap();
    driver.open(2).unwrap();

    assert_eq!(driver.poll_byte(), Poll::Empty);
    assert!(lock(&line).checks >= 1);

    lock(&line).check_fails = true;
    assert_eq!(driver.poll_byte(), Poll::Disconnected);
    assert_eq!(driver.state(2), ConnectionState::Disconnected);
}

#[test]
fn test_slow_health_check_means_disconnect() {
    let mut backend = MockBackend::new();
    let line = backend.line(2);
    let config = DriverConfig {
        check_interval_ms: 0,
        check_deadline_ms: 5,
        ..fast_config()
    };
    let mut driver = SerialDriver::with_config(backend, config).unwrap();
    driver.open(2).unwrap();

    lock(&line).check_delay = Duration::from_millis(30);
    assert_eq!(driver.poll_byte(), Poll::Disconnected);
}

#[test]
fn test_close_all_twice_is_safe() {
    let (mut driver, _) = driver_with(&[1, 2]);
    driver.open(1).unwrap();
    driver.open(2).unwrap();

    driver.close_all();
    driver.close_all();

    assert_eq!(driver.state(1), ConnectionState::Empty);
    assert_eq!(driver.state(2), ConnectionState::Empty);
    assert_eq!(driver.current_port(), None);
    assert_eq!(driver.registry().lock().unwrap().live_count(), 0);
}

#[test]
fn test_close_untracked_port() {
    let (mut driver, _) = driver_with(&[1]);
    assert!(matches!(driver.close(1), Err(CommError::NotOpen(_))));
}

#[test]
fn test_read_ahead_byte_kept_until_read() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).push_rx(b"AB");

    assert_eq!(driver.poll_byte(), Poll::Available(RxByte::new(b'A')));
    assert_eq!(driver.poll_byte(), Poll::Available(RxByte::new(b'A')));
    assert_eq!(lock(&lines[0]).rx.len(), 1);

    assert_eq!(driver.read_byte().unwrap().value, b'A');
    assert_eq!(driver.read_byte().unwrap().value, b'B');
    assert!(matches!(driver.read_byte(), Err(CommError::Timeout)));
}

#[test]
fn test_line_errors_packed_in_high_byte() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    {
        let mut line = lock(&lines[0]);
        line.push_rx(&[0x41]);
        line.line_errors = LineErrors::FRAME;
    }

    let rx = driver.read_byte().unwrap();
    assert_eq!(rx.word(), 0x0841);
}

#[test]
fn test_read_from_unplugged_device() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).unplug();
    assert!(matches!(driver.read_byte(), Err(CommError::Disconnected)));
}

#[test]
fn test_poll_port_leaves_selection() {
    let (mut driver, lines) = driver_with(&[1, 2]);
    driver.open(2).unwrap();
    driver.open(1).unwrap();
    lock(&lines[1]).push_rx(b"x");

    assert_eq!(driver.poll_port(2).unwrap(), Poll::Available(RxByte::new(b'x')));
    assert_eq!(driver.current_port().map(PortNumber::get), Some(1));
    assert!(matches!(driver.poll_port(7), Err(CommError::NotOpen(_))));
}

#[test]
fn test_any_rx_scans_after_selected() {
    let (mut driver, lines) = driver_with(&[1, 2, 3]);
    for port in [1, 2, 3] {
        driver.open(port).unwrap();
    }
    driver.select(1).unwrap();
    lock(&lines[0]).push_rx(b"a");
    lock(&lines[2]).push_rx(b"c");

    let (port, rx) = driver.any_rx().unwrap();
    assert_eq!((port.get(), rx.value), (3, b'c'));
    let (port, rx) = driver.any_rx().unwrap();
    assert_eq!((port.get(), rx.value), (1, b'a'));
    assert!(driver.any_rx().is_none());
    assert_eq!(driver.current_port().map(PortNumber::get), Some(1));
}

#[test]
fn test_other_port_rotates() {
    let (mut driver, _) = driver_with(&[4, 6]);
    driver.open(4).unwrap();
    driver.open(6).unwrap();

    assert_eq!(driver.other_port().map(PortNumber::get), Some(4));
    assert_eq!(driver.other_port().map(PortNumber::get), Some(6));
}

#[test]
fn test_partial_writes_retried() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).write_limit = Some(2);

    driver.write_str("G0 X10\r").unwrap();
    driver.write_byte(b'!').unwrap();
    assert_eq!(lock(&lines[0]).sent, b"G0 X10\r!".to_vec());

    assert_eq!(driver.write_counted(b"abcdef").unwrap(), 2);
}

#[test]
fn test_stalled_write_times_out() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).write_limit = Some(0);

    assert!(matches!(driver.write_block(b"$sr\r"), Err(CommError::Timeout)));
    assert_eq!(driver.state(1), ConnectionState::Connected);
}

#[test]
fn test_write_to_unplugged_device_drops_handle() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).unplug();

    assert!(matches!(driver.write_block(b"?"), Err(CommError::Disconnected)));
    assert_eq!(driver.state(1), ConnectionState::Disconnected);
}

#[test]
fn test_full_duplex_write_swallows_echo() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).echo = true;

    driver.write_full_duplex(b"abc").unwrap();
    assert_eq!(driver.poll_byte(), Poll::Empty);
    assert_eq!(lock(&lines[0]).sent, b"abc".to_vec());
}

#[test]
fn test_paced_write() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    driver.write_paced(b"$$\r", Duration::from_millis(1)).unwrap();
    assert_eq!(lock(&lines[0]).sent, b"$$\r".to_vec());
}

#[test]
fn test_reset_discards_pending_input() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).push_rx(b"xyz");
    assert!(matches!(driver.poll_byte(), Poll::Available(_)));

    driver.reset().unwrap();
    assert_eq!(driver.poll_byte(), Poll::Empty);
    assert_eq!(lock(&lines[0]).clears, 2);
}

#[test]
fn test_modem_signals_merge_outputs() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).modem = ModemSignals::CTS | ModemSignals::DSR | ModemSignals::DTR;

    // Input bits in the mask are ignored, output states come from the saved config
    driver
        .set_modem_signals(ModemSignals::RTS | ModemSignals::CTS)
        .unwrap();
    let signals = driver.modem_signals().unwrap();
    assert_eq!(signals, ModemSignals::RTS | ModemSignals::CTS | ModemSignals::DSR);

    let applied = *lock(&lines[0]).applied.last().unwrap();
    assert!(applied.rts);
    assert!(!applied.dtr);
    assert_eq!(applied.baud_rate, 9600);
}

#[test]
fn test_modem_signals_of_other_port() {
    let (mut driver, lines) = driver_with(&[1, 2]);
    driver.open(2).unwrap();
    driver.open(1).unwrap();
    lock(&lines[1]).modem = ModemSignals::RI;

    driver.set_modem_signals_of(2, ModemSignals::DTR).unwrap();
    assert_eq!(
        driver.modem_signals_of(2).unwrap(),
        ModemSignals::RI | ModemSignals::DTR
    );
    assert_eq!(driver.current_port().map(PortNumber::get), Some(1));
}

#[test]
fn test_timed_break() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    driver.send_break_timed(Duration::from_millis(2)).unwrap();
    assert_eq!(lock(&lines[0]).breaks, vec![true, false]);
}

#[test]
fn test_set_baud_rate_keeps_other_settings() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    driver.set_modem_signals(ModemSignals::DTR).unwrap();
    driver.set_baud_rate(115200).unwrap();

    let applied = *lock(&lines[0]).applied.last().unwrap();
    assert_eq!(applied.baud_rate, 115200);
    assert!(applied.dtr);
}

#[test]
fn test_no_port_selected() {
    let (mut driver, _) = driver_with(&[]);
    assert_eq!(driver.poll_byte(), Poll::Disconnected);
    assert!(matches!(driver.read_byte(), Err(CommError::NoPortSelected)));
    assert!(matches!(driver.line_config(), Err(CommError::NoPortSelected)));
}

#[test]
fn test_failed_reconfigure_means_disconnect() {
    let (mut driver, lines) = driver_with(&[1]);
    driver.open(1).unwrap();
    lock(&lines[0]).unplug();

    assert!(driver.set_line_config(LineConfig::with_baud(115200)).is_err());
    assert_eq!(driver.state(1), ConnectionState::Disconnected);

    lock(&lines[0]).replug();
    assert_eq!(driver.poll_byte(), Poll::Empty);
    assert_eq!(lock(&lines[0]).applied.last().map(|c| c.baud_rate), Some(115200));
}

#[test]
fn test_properties_report_applied_config() {
    let (mut driver, _lines) = driver_with(&[3]);
    driver.open(3).unwrap();
    driver.set_baud_rate(115200).unwrap();

    let props = driver.properties().unwrap();
    assert_eq!(props.name.as_deref(), Some("mock://COM3"));
    assert_eq!(props.baud_rate, 115200);
    assert_eq!(props.framing(), "8N1");
    assert_eq!(props.write_timeout, fast_config().write_timeout());

    let mut out = Vec::new();
    driver.print_properties(&mut out).unwrap();
    let report = String::from_utf8(out).unwrap();
    assert!(report.starts_with("COM3 properties:\nname          : mock://COM3\n"));
    assert!(report.contains("baud rate     : 115200\n"));
}

#[test]
fn test_properties_reopen_dropped_handle() {
    let (mut driver, lines) = driver_with(&[3]);
    driver.open(3).unwrap();
    lock(&lines[0]).unplug();
    assert_eq!(driver.poll_byte(), Poll::Disconnected);

    lock(&lines[0]).replug();
    assert!(driver.properties().is_ok());
    assert_eq!(lock(&lines[0]).opens, 2);
}
