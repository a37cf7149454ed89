//! The order service process: session table (C7), intake and processor
//! (C7-C8), and the single-threaded core that drives them.

pub mod core;
pub mod intake;
pub mod processor;
pub mod session;

pub use core::{OrderCore, ShutdownReason, Signals};
