//! Response Dispatcher
//!
//! Maps low-level completion callbacks back to the logical operation that
//! caused them. Pure decision table over `(channel, success, pending
//! snapshot)`: the session applies gate bookkeeping first and then asks this
//! module which event, if any, to emit. Exactly one Resolve or Reject is
//! produced per initiating operation:
//!
//! - mid-payload frame confirmations emit nothing (only the final frame
//!   resolves),
//! - a request that expects a response resolves on the follow-up read, not
//!   on its write confirmation,
//! - OTA frame confirmations resolve only once the end frame (marked by
//!   `ota_ended`) is confirmed,
//! - failures reject immediately; the worker abandons the remaining frames
//!   without a second rejection.

use crate::domain::models::{ConnectorEvent, OperationKind, RejectReason};
use crate::infrastructure::bluetooth::queue::PendingSnapshot;
use crate::infrastructure::bluetooth::transport::Channel;

/// Decide the outcome of a confirmed or failed characteristic write.
pub fn dispatch_write_completion(
    channel: Channel,
    success: bool,
    snapshot: PendingSnapshot,
) -> Option<ConnectorEvent> {
    if !success {
        return snapshot.kind.and_then(reject_for_write);
    }
    if !snapshot.final_frame {
        return None;
    }

    match (channel, snapshot.kind?) {
        (Channel::Clock, OperationKind::SetClock) => Some(resolve(OperationKind::SetClock)),
        (Channel::Command, OperationKind::Deliver) => Some(resolve(OperationKind::Deliver)),
        (Channel::Command, OperationKind::Transmit) => Some(resolve(OperationKind::Transmit)),
        (Channel::Request, OperationKind::Request) => {
            // The read completion carries the resolution instead.
            if snapshot.expects_response {
                None
            } else {
                Some(resolve(OperationKind::Request))
            }
        }
        (Channel::Request, OperationKind::UpdateFirmware) => snapshot
            .ota_ended
            .then(|| resolve(OperationKind::UpdateFirmware)),
        _ => None,
    }
}

/// Decide the outcome of a characteristic read. `value` is `Some` for a
/// successful read and `None` for a transport-level failure.
pub fn dispatch_read_completion(
    channel: Channel,
    value: Option<Vec<u8>>,
    snapshot: PendingSnapshot,
) -> Option<ConnectorEvent> {
    match value {
        Some(bytes) => match channel {
            Channel::Clock => Some(ConnectorEvent::Resolve {
                kind: OperationKind::GetClock,
                payload: Some(bytes),
            }),
            Channel::Request => Some(ConnectorEvent::Resolve {
                kind: OperationKind::Request,
                payload: Some(bytes),
            }),
            Channel::Command => None,
        },
        None => match snapshot.kind? {
            OperationKind::GetClock => Some(ConnectorEvent::Reject {
                kind: OperationKind::GetClock,
                reason: RejectReason::ClockReadFailed,
            }),
            OperationKind::Request => Some(ConnectorEvent::Reject {
                kind: OperationKind::Request,
                reason: RejectReason::RequestFailed,
            }),
            _ => None,
        },
    }
}

/// The rejection reason matching a failed write of the given kind.
pub fn reject_for_write(kind: OperationKind) -> Option<ConnectorEvent> {
    let reason = match kind {
        OperationKind::Deliver => RejectReason::DeliverFailed,
        OperationKind::Transmit => RejectReason::TransmitFailed,
        OperationKind::Request => RejectReason::RequestFailed,
        OperationKind::SetClock => RejectReason::ClockWriteFailed,
        OperationKind::GetClock => return None,
        OperationKind::UpdateFirmware => RejectReason::UpdateFailed,
    };
    Some(ConnectorEvent::Reject { kind, reason })
}

/// The rejection reason matching a failed read of the given kind.
pub fn reject_for_read(kind: OperationKind) -> Option<ConnectorEvent> {
    let reason = match kind {
        OperationKind::GetClock => RejectReason::ClockReadFailed,
        OperationKind::Request => RejectReason::RequestFailed,
        _ => return None,
    };
    Some(ConnectorEvent::Reject { kind, reason })
}

fn resolve(kind: OperationKind) -> ConnectorEvent {
    ConnectorEvent::Resolve {
        kind,
        payload: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(kind: OperationKind) -> PendingSnapshot {
        PendingSnapshot {
            kind: Some(kind),
            expects_response: false,
            final_frame: true,
            ota_ended: false,
            reading: false,
        }
    }

    #[test]
    fn command_writes_resolve_by_kind() {
        let event =
            dispatch_write_completion(Channel::Command, true, snapshot(OperationKind::Deliver));
        assert_eq!(
            event,
            Some(ConnectorEvent::Resolve {
                kind: OperationKind::Deliver,
                payload: None
            })
        );

        let event =
            dispatch_write_completion(Channel::Command, true, snapshot(OperationKind::Transmit));
        assert_eq!(
            event,
            Some(ConnectorEvent::Resolve {
                kind: OperationKind::Transmit,
                payload: None
            })
        );
    }

    #[test]
    fn mid_payload_frames_emit_nothing() {
        let snapshot = PendingSnapshot {
            final_frame: false,
            ..snapshot(OperationKind::Deliver)
        };
        assert_eq!(dispatch_write_completion(Channel::Command, true, snapshot), None);
    }

    #[test]
    fn responding_request_waits_for_the_read() {
        let snapshot = PendingSnapshot {
            expects_response: true,
            ..snapshot(OperationKind::Request)
        };
        assert_eq!(dispatch_write_completion(Channel::Request, true, snapshot), None);

        // A fire-and-forget request resolves on the write itself.
        let event = dispatch_write_completion(
            Channel::Request,
            true,
            self::snapshot(OperationKind::Request),
        );
        assert_eq!(
            event,
            Some(ConnectorEvent::Resolve {
                kind: OperationKind::Request,
                payload: None
            })
        );
    }

    #[test]
    fn ota_writes_resolve_only_after_end_frame() {
        assert_eq!(
            dispatch_write_completion(
                Channel::Request,
                true,
                snapshot(OperationKind::UpdateFirmware)
            ),
            None
        );

        let ended = PendingSnapshot {
            ota_ended: true,
            ..snapshot(OperationKind::UpdateFirmware)
        };
        assert_eq!(
            dispatch_write_completion(Channel::Request, true, ended),
            Some(ConnectorEvent::Resolve {
                kind: OperationKind::UpdateFirmware,
                payload: None
            })
        );
    }

    #[test]
    fn write_failures_reject_by_kind() {
        let cases = [
            (OperationKind::Deliver, RejectReason::DeliverFailed),
            (OperationKind::Transmit, RejectReason::TransmitFailed),
            (OperationKind::Request, RejectReason::RequestFailed),
            (OperationKind::SetClock, RejectReason::ClockWriteFailed),
            (OperationKind::UpdateFirmware, RejectReason::UpdateFailed),
        ];
        for (kind, reason) in cases {
            let event = dispatch_write_completion(Channel::Command, false, snapshot(kind));
            assert_eq!(event, Some(ConnectorEvent::Reject { kind, reason }));
        }
    }

    #[test]
    fn clock_read_resolves_with_bytes() {
        let event = dispatch_read_completion(
            Channel::Clock,
            Some(vec![1, 2, 3, 4]),
            snapshot(OperationKind::GetClock),
        );
        assert_eq!(
            event,
            Some(ConnectorEvent::Resolve {
                kind: OperationKind::GetClock,
                payload: Some(vec![1, 2, 3, 4])
            })
        );
    }

    #[test]
    fn read_failures_reject_by_pending_kind() {
        let event = dispatch_read_completion(Channel::Clock, None, snapshot(OperationKind::GetClock));
        assert_eq!(
            event,
            Some(ConnectorEvent::Reject {
                kind: OperationKind::GetClock,
                reason: RejectReason::ClockReadFailed
            })
        );

        let event =
            dispatch_read_completion(Channel::Request, None, snapshot(OperationKind::Request));
        assert_eq!(
            event,
            Some(ConnectorEvent::Reject {
                kind: OperationKind::Request,
                reason: RejectReason::RequestFailed
            })
        );
    }
}
