mod common;

use common::{driver_with, lock, SharedLine};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use tinyg_comm::prelude::*;
use tinyg_comm::{ACK, NAK};

const TIMEOUT: Duration = Duration::from_secs(2);

fn connected(port: u32) -> (SerialDriver<common::MockBackend>, SharedLine) {
    let (mut driver, mut lines) = driver_with(&[port]);
    driver.open(port).unwrap();
    (driver, lines.remove(0))
}

#[test]
fn test_ack_alone_is_empty_success() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$ej=1\r", &[ACK]);

    let reply = driver.cmdio(b"$ej=1\r", TIMEOUT, 256).unwrap();
    assert_eq!(reply, Vec::<u8>::new());
    assert_eq!(lock(&line).sent, b"$ej=1\r".to_vec());
}

#[test]
fn test_reply_before_ack() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$sr\r", b"{\"sr\":{\"stat\":3}}\x06");

    let reply = driver.cmdio(b"$sr\r", TIMEOUT, 256).unwrap();
    assert_eq!(reply, b"{\"sr\":{\"stat\":3}}".to_vec());
}

#[test]
fn test_nak_carries_partial_reply() {
    let (mut driver, line) = connected(3);
    let mut reply = b"bad".to_vec();
    reply.push(NAK);
    lock(&line).reply_to(b"G99\r", &reply);

    match driver.cmdio(b"G99\r", TIMEOUT, 256) {
        Err(CommError::ProtocolNak(body)) => assert_eq!(body, b"bad".to_vec()),
        other => panic!("expected NAK, got {:?}", other),
    }
}

#[test]
fn test_delimiter_not_in_payload() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"?\r", b"abc,def");

    let reply = driver.cmdio_delimited(b"?\r", TIMEOUT, 256, b",;").unwrap();
    assert_eq!(reply, b"abc".to_vec());
}

#[test]
fn test_tinyg_wakeup_handshake() {
    let (mut driver, line) = connected(5);
    lock(&line).reply_to(b" \r", b"{\"r\":{\"fv\":0.97},\"f\":[1,0,2]}\n");
    driver.set_baud_rate(115200).unwrap();

    let reply = driver
        .cmdio_delimited(b" \r", Duration::from_secs(10), 256, b"\n")
        .unwrap();
    assert_eq!(
        String::from_utf8(reply).unwrap(),
        "{\"r\":{\"fv\":0.97},\"f\":[1,0,2]}"
    );
    assert_eq!(lock(&line).applied.last().map(|c| c.baud_rate), Some(115200));
}

#[test]
fn test_silence_times_out() {
    let (mut driver, _line) = connected(3);
    let timeout = Duration::from_millis(60);

    let started = Instant::now();
    let result = driver.cmdio(b"$sr\r", timeout, 256);
    assert!(matches!(result, Err(CommError::Timeout)));
    assert!(started.elapsed() >= timeout);
    assert!(driver.is_connected());
}

#[test]
fn test_unplug_mid_reply_is_disconnect() {
    let (mut driver, line) = connected(3);
    {
        let mut l = lock(&line);
        l.reply_to(b"$sr\r", b"{\"sr\"");
        l.unplug_after_reads = Some(2);
    }

    let started = Instant::now();
    let result = driver.cmdio(b"$sr\r", Duration::from_secs(5), 256);
    assert!(matches!(result, Err(CommError::Disconnected)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(driver.state(3), ConnectionState::Disconnected);
}

#[test]
fn test_capacity_counts_terminating_slot() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"a\r", b"abcdef\x06");
    lock(&line).reply_to(b"b\r", b"abcdef\x06");

    assert!(matches!(
        driver.cmdio(b"a\r", TIMEOUT, 4),
        Err(CommError::BufferFull)
    ));

    driver.reset().unwrap();
    let reply = driver.cmdio(b"b\r", TIMEOUT, 7).unwrap();
    assert_eq!(reply, b"abcdef".to_vec());
}

#[test]
fn test_full_duplex_with_echo() {
    let (mut driver, line) = connected(3);
    {
        let mut l = lock(&line);
        l.echo = true;
        l.reply_to(b"$x\r", b"ok\x06");
        l.push_rx(b"junk");
    }

    let reply = driver.cmdio_full_duplex(b"$x\r", TIMEOUT, 256).unwrap();
    assert_eq!(reply, b"ok".to_vec());
}

#[test]
fn test_full_duplex_without_echo_fails_first_byte() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$x\r", b"ok\x06");

    match driver.cmdio_full_duplex(b"$x\r", TIMEOUT, 256) {
        Err(CommError::EchoMismatch { expected, received }) => {
            assert_eq!(expected, b'$');
            assert_eq!(received, None);
        }
        other => panic!("expected echo mismatch, got {:?}", other),
    }
    assert_eq!(lock(&line).sent, b"$".to_vec());
}

#[test]
fn test_reply_copied_to_sink() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$$\r", b"[xvm] 16000\x06");

    let mut sink = Vec::new();
    let reply = driver.cmdio_echo(b"$$\r", TIMEOUT, 256, &mut sink).unwrap();
    assert_eq!(reply, b"[xvm] 16000".to_vec());
    assert_eq!(sink, reply);
}

#[test]
fn test_idle_callback_runs_while_waiting() {
    let (mut driver, _line) = connected(3);
    let mut idles = 0;
    let mut count = || idles += 1;

    let result = driver.cmdio_with_idle(b"$sr\r", Duration::from_millis(40), 256, &mut count);
    assert!(matches!(result, Err(CommError::Timeout)));
    assert!(idles > 0);
}

#[test]
fn test_exclusive_frames_json_line() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$sr\r", b"{\"r\":{}}\n");

    let reply = driver
        .cmdio_exclusive(b"$sr\r", Duration::from_millis(100), 256, b"\n", true)
        .unwrap();
    assert_eq!(reply, b"{\"r\":{}}".to_vec());
}

#[test]
fn test_exclusive_listen_only() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(b"{\"sr\":{\"stat\":3}}\n{\"sr\":{\"stat\":4}}\n");

    let first = driver.cmdio_exclusive(b"", TIMEOUT, 256, b"\n", false).unwrap();
    assert_eq!(first, b"{\"sr\":{\"stat\":3}}".to_vec());
    let second = driver.cmdio_exclusive(b"", TIMEOUT, 256, b"\n", false).unwrap();
    assert_eq!(second, b"{\"sr\":{\"stat\":4}}".to_vec());
    assert!(lock(&line).sent.is_empty());
}

#[test]
fn test_exclusive_discards_unsolicited_input() {
    let (mut driver, line) = connected(3);
    {
        let mut l = lock(&line);
        l.push_rx(b"{\"sr\":{}}\n");
        l.reply_to(b"$fv\r", b"{\"r\":{\"fv\":0.97}}\n");
    }

    let reply = driver.cmdio_exclusive(b"$fv\r", TIMEOUT, 256, b"\n", true).unwrap();
    assert_eq!(reply, b"{\"r\":{\"fv\":0.97}}".to_vec());
}

#[test]
fn test_exclusive_keeps_input_without_clear() {
    let (mut driver, line) = connected(3);
    {
        let mut l = lock(&line);
        l.push_rx(b"{\"sr\":{}}\n");
        l.reply_to(b"$fv\r", b"{\"r\":{}}\n");
    }

    let reply = driver.cmdio_exclusive(b"$fv\r", TIMEOUT, 256, b"\n", false).unwrap();
    assert_eq!(reply, b"{\"sr\":{}}".to_vec());
}

#[test]
fn test_paced_send() {
    let (mut driver, line) = connected(3);
    {
        let mut l = lock(&line);
        l.push_rx(b"stale");
        l.write_limit = Some(1);
        l.reply_to(b"$1\r", &[ACK]);
    }

    let reply = driver
        .cmdio_paced(b"$1\r", TIMEOUT, 256, Duration::from_millis(1))
        .unwrap();
    assert!(reply.is_empty());
    assert_eq!(lock(&line).sent, b"$1\r".to_vec());
}

#[test]
fn test_get_line_drops_cr() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$fb\r", b"440.20\r\nnext\n");

    let first = driver.get_line(Some(b"$fb\r"), TIMEOUT, 256).unwrap();
    assert_eq!(first, b"440.20".to_vec());
    let second = driver.get_line(None, TIMEOUT, 256).unwrap();
    assert_eq!(second, b"next".to_vec());
}

#[test]
fn test_get_line_full_buffer_is_success() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(b"abcdefgh\n");

    let reply = driver.get_line(None, TIMEOUT, 5).unwrap();
    assert_eq!(reply, b"abcd".to_vec());
}

#[test]
fn test_read_line_strips_parity() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(&[b'o' | 0x80, b'k', b'\n', b'\r', b'z']);

    let reply = driver.read_line(TIMEOUT, 256).unwrap();
    assert_eq!(reply, b"ok".to_vec());
    assert_eq!(driver.read_byte().unwrap().value, b'z');
}

#[test]
fn test_read_exact_counts() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(&[b'1', b'2', b'3', b'4' | 0x80, b'5']);

    assert_eq!(driver.read_exact(TIMEOUT, 3, false).unwrap(), b"123".to_vec());
    assert_eq!(driver.read_exact(TIMEOUT, 2, true).unwrap(), b"45".to_vec());
    assert!(matches!(
        driver.read_exact(Duration::from_millis(30), 1, false),
        Err(CommError::Timeout)
    ));
}

#[test]
fn test_wait_for_pattern() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(b"booting...\ntinyg [mm] ok> rest");

    driver.wait_for(TIMEOUT, b"ok> ").unwrap();
    assert_eq!(driver.read_byte().unwrap().value, b'r');
}

#[test]
fn test_wait_for_reply_sequences() {
    let (mut driver, line) = connected(3);
    lock(&line).push_rx(b"G0 X1 ok>");
    let body = driver.wait_for_reply(TIMEOUT, 256, b"ok>", b"err>").unwrap();
    assert_eq!(body, b"G0 X1 ".to_vec());

    lock(&line).push_rx(b"G99 err>");
    match driver.wait_for_reply(TIMEOUT, 256, b"ok>", b"err>") {
        Err(CommError::ProtocolNak(body)) => assert_eq!(body, b"G99 ".to_vec()),
        other => panic!("expected NAK sequence, got {:?}", other),
    }
}

#[test]
fn test_custom_exchange() {
    let (mut driver, line) = connected(3);
    lock(&line).reply_to(b"$sv\r", &[b'1' | 0x80, b'#']);

    let exchange = Exchange::new(
        b"$sv\r",
        Terminator::Delimiters(vec![b'#']),
        TIMEOUT,
        16,
    )
    .strip_parity();
    assert_eq!(driver.exchange(exchange).unwrap(), b"1".to_vec());
}

#[test]
fn test_exchange_without_port() {
    let (mut driver, _) = driver_with(&[]);
    assert!(matches!(
        driver.cmdio(b"$sr\r", TIMEOUT, 256),
        Err(CommError::NoPortSelected)
    ));
}
