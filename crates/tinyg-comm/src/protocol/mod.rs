//! Command/response protocol
//!
//! TinyG-style exchanges: a command goes out verbatim (the caller supplies its
//! line terminator) and the reply is collected byte by byte until a framing
//! condition is met. All entry points share one engine, [`Exchange`],
//! parameterized by a [`Terminator`] and a [`Transmit`] mode.

mod cmdio;
mod engine;
mod escape;

pub use engine::{printable, ByteLink, Exchange, LineEnding, Terminator, Transmit};
pub use escape::parse_escapes;

use std::time::Duration;

/// Default reply buffer capacity for command exchanges
pub const DEFAULT_CAPACITY: usize = 256;

/// Default rolling timeout for command exchanges
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
