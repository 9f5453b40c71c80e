//! TinyG Wake-up
//!
//! Finds a TinyG behind an FTDI adapter (or uses the given port), wakes it up
//! and prints its reply. Optionally sends one more command.
//!
//! Usage:
//!   cargo run --example tinyg_wake -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port N          Port number (default: locate by manufacturer)
//!   --maker NAME      Manufacturer to search for (default: FTDI)
//!   --baud RATE       Baud rate (default: 115200)
//!   --timeout MS      Reply timeout in ms (default: 10000)
//!   --cmd TEXT        Extra command; accepts \r \n \t \e \0 \\ \xNN escapes
//!   --list            List the serial ports found and exit
//!   --props           Print the port's properties after connecting
//!   --terminal        Finish with an interactive session (ESC exits)

use anyhow::{bail, Context};
use std::time::Duration;
use tinyg_comm::prelude::*;
use tinyg_comm::protocol::{parse_escapes, printable, DEFAULT_CAPACITY};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tinyg_comm=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port: Option<u32> = None;
    let mut maker = FTDI_MANUFACTURER.to_string();
    let mut baud_rate = 115200u32;
    let mut timeout_ms = 10000u64;
    let mut extra: Option<String> = None;
    let mut list_only = false;
    let mut show_props = false;
    let mut terminal = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port = args[i].parse().ok();
                }
            }
            "--maker" | "-m" => {
                i += 1;
                if i < args.len() {
                    maker = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i].parse().unwrap_or(115200);
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    timeout_ms = args[i].parse().unwrap_or(10000);
                }
            }
            "--cmd" | "-c" => {
                i += 1;
                if i < args.len() {
                    extra = Some(args[i].clone());
                }
            }
            "--list" | "-l" => {
                list_only = true;
            }
            "--props" => {
                show_props = true;
            }
            "--terminal" => {
                terminal = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                port = arg.parse().ok();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    let mut enumerator = SerialportEnumerator::new();
    let found = enumerator.ports().context("listing serial ports")?;

    if list_only {
        if found.is_empty() {
            println!("No serial ports found");
        }
        for (number, details) in enumerator.details() {
            println!(
                "  {:>3}  {:<20} {}",
                number,
                details.name,
                details.manufacturer.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    let port = match port {
        Some(p) => p,
        None => locate_device(&mut enumerator, &maker)
            .with_context(|| format!("looking for a {} adapter", maker))?,
    };
    if !found.contains(&port) {
        bail!("port {} is not a serial port on this system", port);
    }

    let config = DriverConfig {
        device_paths: enumerator.device_paths(),
        ..DriverConfig::default()
    };
    let mut driver = SerialDriver::system_with_config(config)?;
    driver.open(port).with_context(|| format!("opening port {}", port))?;
    driver.set_baud_rate(baud_rate)?;

    let timeout = Duration::from_millis(timeout_ms);
    println!("Waking TinyG on port {} at {} baud...", port, baud_rate);
    let reply = driver.cmdio_delimited(b" \r", timeout, DEFAULT_CAPACITY, b"\n")?;
    println!("< {}", String::from_utf8_lossy(&reply));

    if let Some(text) = extra {
        let command = parse_escapes(&text);
        println!("> {}", printable(&command));
        let reply = driver.cmdio_delimited(&command, timeout, DEFAULT_CAPACITY, b"\n")?;
        println!("< {}", String::from_utf8_lossy(&reply));
    }

    let signals = driver.modem_signals()?;
    println!("Modem lines: {}", if signals.is_empty() { "-".to_string() } else { signals.to_string() });

    if show_props {
        driver.print_properties(&mut std::io::stdout())?;
    }

    if terminal {
        let options = TerminalOptions {
            auto_lf: true,
            banner: format!("Terminal on port {}. ", port),
            ..TerminalOptions::default()
        };
        driver.terminal(std::io::stdin(), &mut std::io::stdout(), &options)?;
    }

    driver.close_all();
    Ok(())
}

fn print_help() {
    println!("TinyG Wake-up");
    println!();
    println!("Usage: tinyg_wake [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  -p, --port N        Port number (default: locate by manufacturer)");
    println!("  -m, --maker NAME    Manufacturer to search for (default: FTDI)");
    println!("  -b, --baud RATE     Baud rate (default: 115200)");
    println!("  -t, --timeout MS    Reply timeout in ms (default: 10000)");
    println!("  -c, --cmd TEXT      Extra command, with \\r \\n \\xNN style escapes");
    println!("  -l, --list          List the serial ports found and exit");
    println!("      --props         Print the port's properties after connecting");
    println!("      --terminal      Finish with an interactive session (ESC exits)");
    println!("  -h, --help          Show this help");
    println!();
    println!("Examples:");
    println!("  tinyg_wake --list");
    println!("  tinyg_wake --cmd '$sr\\r'");
    println!("  tinyg_wake 5 --baud 115200");
    println!("  tinyg_wake --terminal");
}
