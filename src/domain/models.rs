//! Connector event model.
//!
//! Everything the core reports to its caller flows through one tagged event
//! stream: operation outcomes, OTA progress, unsolicited device
//! notifications, and connection state changes.

/// Connection state of the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// The kind of logical operation a caller submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Acknowledged command write on the command channel.
    Deliver,
    /// Unacknowledged, latency-sensitive write on the command channel.
    /// Jumps to the front of the queue.
    Transmit,
    /// Write on the request channel, optionally followed by a read.
    Request,
    /// 4-byte clock write on the clock channel.
    SetClock,
    /// Clock read on the clock channel.
    GetClock,
    /// OTA firmware update sequence on the request channel.
    UpdateFirmware,
}

/// Why an operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DeliverFailed,
    TransmitFailed,
    RequestFailed,
    ClockWriteFailed,
    ClockReadFailed,
    UpdateFailed,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeliverFailed => "deliver failed",
            Self::TransmitFailed => "transmit failed",
            Self::RequestFailed => "request failed",
            Self::ClockWriteFailed => "clock write failed",
            Self::ClockReadFailed => "clock read failed",
            Self::UpdateFailed => "firmware update failed",
        };
        f.write_str(s)
    }
}

/// Event emitted by the connector core.
///
/// Exactly one `Resolve` or `Reject` is emitted per submitted operation,
/// never zero and never more than one. `Progress` and `Notification` are
/// informational and carry no completion semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// An operation completed. `payload` carries read bytes for `GetClock`
    /// and responding `Request` operations, `None` for plain writes.
    Resolve {
        kind: OperationKind,
        payload: Option<Vec<u8>>,
    },
    /// An operation failed.
    Reject {
        kind: OperationKind,
        reason: RejectReason,
    },
    /// OTA progress in percent. `-1.0` is the start sentinel, emitted once
    /// before the reset step runs; numeric progress is `0.0..=100.0`.
    Progress(f32),
    /// Unsolicited push from the device, forwarded verbatim.
    Notification(Vec<u8>),
    /// The transport link went up or down.
    ConnectionState(ConnectionState),
}
