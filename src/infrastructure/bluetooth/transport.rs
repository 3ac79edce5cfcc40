//! Transport capability injected by the platform adapter.
//!
//! The core never touches a platform Bluetooth API. A [`Transport`] issues
//! characteristic writes and reads; their completions arrive asynchronously
//! through the [`DeviceSession`](super::session::DeviceSession) completion
//! entry points, on whatever thread the platform stack uses for callbacks.

use thiserror::Error;

/// Logical endpoints on the device, one per GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Command traffic (deliver/transmit).
    Command,
    /// 4-byte clock timestamp.
    Clock,
    /// Request/response traffic and OTA frames.
    Request,
}

/// Whether the device confirms the write at the ATT layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Acknowledged,
    Unacknowledged,
}

/// Errors surfaced by the transport and the serializer built on it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No usable connection for this session (never connected, or torn down).
    #[error("transport unavailable")]
    TransportUnavailable,
    /// The transport refused to accept the write.
    #[error("transport rejected the write")]
    WriteRejected,
    /// The transport refused to accept the read.
    #[error("transport rejected the read")]
    ReadRejected,
    /// Reserved for callers that layer a deadline on top; never produced
    /// inside the core.
    #[error("operation timed out")]
    Timeout,
    /// A queued step was skipped because an earlier step of the same
    /// sequence already failed.
    #[error("sequence aborted after an earlier failure")]
    SequenceAborted,
}

/// A connected GATT-like link.
///
/// `write` and `read` only *initiate* the operation; the adapter must report
/// the outcome through the session's `on_write_completed` /
/// `on_read_completed` callbacks. The core guarantees it never has more than
/// one initiation outstanding.
pub trait Transport: Send + Sync {
    fn write(&self, channel: Channel, payload: &[u8], mode: WriteMode) -> Result<(), LinkError>;
    fn read(&self, channel: Channel) -> Result<(), LinkError>;
}
