//! Core library for the trading gateway and order service pair.
//!
//! The gateway terminates client TCP connections, frames and parses the wire
//! protocol, and forwards client requests to (and client-addressed responses
//! from) a Kafka-like broker. The order service consumes gateway traffic,
//! validates logins, and drains submitted orders toward an out-of-scope
//! matching engine. Both processes share this crate's wire codec, broker
//! client, and configuration loading; each owns its own single-threaded
//! event-loop core.

#![cfg_attr(
    test,
    expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")
)]
#![cfg_attr(test, expect(clippy::str_to_string, reason = "test code"))]
#![cfg_attr(test, expect(clippy::unwrap_used, reason = "test code can panic"))]
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "test code with known bounds")
)]
#![cfg_attr(test, expect(clippy::shadow_reuse, reason = "test code shadowing"))]
#![cfg_attr(
    test,
    expect(clippy::let_underscore_must_use, reason = "test cleanup code")
)]
#![cfg_attr(
    test,
    expect(clippy::unneeded_field_pattern, reason = "test pattern matching")
)]

pub mod broker;
pub mod config;
pub mod connection_table;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod order;
pub mod payload;
pub mod ring_buffer;
pub mod stats;
