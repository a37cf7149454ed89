//! Error taxonomy shared by the gateway and order service.
//!
//! Each family maps onto one of the recovery disciplines described in the
//! crate's design notes: framing and transport errors close only the
//! connection that triggered them; broker errors are logged and counted but
//! never kill the process; init errors are fatal and only ever surface
//! during startup.

use std::io;

/// Errors from decoding or encoding a single wire frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame's length fields are inconsistent with the data present.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    /// The frame names a message type outside the registered set.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// The payload could not be decoded as an instance of its named type.
    #[error("payload decode error: {0}")]
    PayloadDecodeError(String),
}

/// Errors from the per-connection ring-buffered framer.
#[derive(Debug, thiserror::Error)]
pub enum FramerError {
    /// The frame's declared length is outside the accepted range.
    #[error("invalid packet length")]
    PacketInvalid,
    /// A complete frame was extracted but failed to decode.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Errors from the fixed-capacity connection table.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    /// Every slot is currently occupied.
    #[error("connection table is full")]
    Full,
    /// A warm-restart snapshot's capacity does not match the table being
    /// restored into.
    #[error("snapshot capacity does not match table capacity")]
    SnapshotCapacityMismatch,
}

/// Errors from per-connection transport handling.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("client closed connection")]
    ClientClose,
    /// The connection exceeded its idle timeout.
    #[error("client connection timed out")]
    ClientTimeout,
    /// The outbound write queue exceeded its watermark.
    #[error("write buffer over watermark")]
    WriteBufferOver,
    /// A read was attempted on a slot with no buffered bytes.
    #[error("read buffer empty")]
    ReadBufferEmpty,
    /// The underlying socket returned an I/O error.
    #[error("socket io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker rejected or failed to durably store a produced record.
    #[error("produce failed: {0}")]
    ProduceError(String),
    /// The consumer loop encountered an error other than timeout or EOF.
    #[error("consume failed: {0}")]
    ConsumeError(String),
    /// The message being produced has no `client_id` field to stamp.
    #[error("message has no routing field")]
    MissingRoutingField,
}

/// Fatal errors that can only occur during process startup.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The startup advisory lock is held by another instance.
    #[error("startup lock already held")]
    LockHeld,
    /// The TCP listener could not bind to the configured address.
    #[error("failed to bind listener: {0}")]
    BindFailure(#[source] io::Error),
    /// The broker client could not be constructed.
    #[error("broker initialisation failed: {0}")]
    BrokerInitFailure(String),
    /// A required configuration key was missing or invalid.
    #[error("configuration error: {0}")]
    ConfigMissing(String),
}
