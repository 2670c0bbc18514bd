//! Kairos protocol core: frame codec, payload schemas, shared types.
//!
//! This crate is transport-agnostic — it knows nothing about sockets or the
//! server runtime. Everything here is driven by byte buffers so the same
//! code serves the server, test harnesses, and future client crates.
//!
//! All parsers are panic-free: malformed input is reported as
//! [`KairosError`] instead of panicking or indexing raw buffers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod payload;
pub mod types;
pub mod wire;

pub use error::{ErrorCode, KairosError, Result};
pub use wire::{Frame, MessageHeader, MessageType, PROTOCOL_MAGIC, PROTOCOL_VERSION};
