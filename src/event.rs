//! Lifecycle and data events pushed to the application

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::Role;

/// Everything the manager reports to the outside world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    RoleChanged(Role),
    PeerIdentified(String),
    InboundFrame(Bytes),
    OutboundAck(Bytes),
    /// Dial failures, lost connections and failed writes
    Notice(String),
}

impl LinkEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::RoleChanged(_) => "role_changed",
            LinkEvent::PeerIdentified(_) => "peer_identified",
            LinkEvent::InboundFrame(_) => "inbound_frame",
            LinkEvent::OutboundAck(_) => "outbound_ack",
            LinkEvent::Notice(_) => "notice",
        }
    }

    /// One JSON object per event, tagged with [`kind`](Self::kind).
    /// Frame payloads are rendered as lossy UTF-8.
    pub fn to_json(&self) -> Value {
        match self {
            LinkEvent::RoleChanged(role) => json!({ "event": self.kind(), "role": role }),
            LinkEvent::PeerIdentified(name) => json!({ "event": self.kind(), "peer": name }),
            LinkEvent::InboundFrame(bytes) | LinkEvent::OutboundAck(bytes) => {
                json!({ "event": self.kind(), "data": String::from_utf8_lossy(bytes) })
            }
            LinkEvent::Notice(message) => json!({ "event": self.kind(), "message": message }),
        }
    }
}

/// Consumer of [`LinkEvent`]s.
///
/// `emit` is called while the transition lock is held, so implementations
/// must return immediately and never wait on the consumer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LinkEvent);
}

impl EventSink for mpsc::UnboundedSender<LinkEvent> {
    fn emit(&self, event: LinkEvent) {
        if self.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }
}

/// Create an unbounded event channel usable as a sink
pub fn channel() -> (mpsc::UnboundedSender<LinkEvent>, mpsc::UnboundedReceiver<LinkEvent>) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_preserves_order() {
        let (tx, mut rx) = channel();
        tx.emit(LinkEvent::Notice("first".into()));
        tx.emit(LinkEvent::RoleChanged(Role::Listening));

        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Notice("first".into()));
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::RoleChanged(Role::Listening));
    }

    #[test]
    fn test_json_rendering() {
        assert_eq!(
            LinkEvent::RoleChanged(Role::Connecting).to_json(),
            json!({ "event": "role_changed", "role": "connecting" })
        );
        assert_eq!(
            LinkEvent::PeerIdentified("bench".into()).to_json(),
            json!({ "event": "peer_identified", "peer": "bench" })
        );
        assert_eq!(
            LinkEvent::InboundFrame(Bytes::from_static(b"AB\n")).to_json(),
            json!({ "event": "inbound_frame", "data": "AB\n" })
        );
        assert_eq!(
            LinkEvent::OutboundAck(Bytes::from_static(b"hi\n")).to_json()["event"],
            "outbound_ack"
        );
        assert_eq!(
            LinkEvent::Notice("Unable to send data".into()).to_json(),
            json!({ "event": "notice", "message": "Unable to send data" })
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (tx, rx) = channel();
        drop(rx);
        tx.emit(LinkEvent::RoleChanged(Role::Idle));
    }
}
