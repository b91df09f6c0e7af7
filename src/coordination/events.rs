//! Presence events emitted by the lock and session managers.
//!
//! Delivery is best-effort and never blocks: lock and commit correctness
//! must not depend on whether anyone is listening. Sinks that cannot keep
//! up drop events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

/// Per-user activity state, as broadcast to editors in the same project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Editing,
    Idle,
    Offline,
}

/// What happened on the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PresenceEvent {
    LockAcquired {
        project: String,
        path: String,
        user_id: String,
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    LockReleased {
        project: String,
        path: String,
        user_id: String,
        at: DateTime<Utc>,
    },
    LockExpired {
        project: String,
        path: String,
        user_id: String,
        at: DateTime<Utc>,
    },
    SessionStarted {
        project: String,
        user_id: String,
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    SessionExpired {
        project: String,
        user_id: String,
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    PresenceChanged {
        project: String,
        user_id: String,
        state: PresenceState,
        at: DateTime<Utc>,
    },
}

/// Fire-and-forget event consumer. Implementations must return promptly;
/// the managers call `emit` while holding no locks but on hot paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PresenceEvent);
}

/// Discards everything; the default when no broadcast layer is attached.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, event: PresenceEvent) {
        trace!(?event, "presence event dropped (no sink attached)");
    }
}

/// Bridges events onto an unbounded tokio channel for an external
/// broadcast layer. Sending on an unbounded channel never blocks; events
/// for a dropped receiver are discarded.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<PresenceEvent>,
}

impl ChannelSink {
    pub fn new() -> (ChannelSink, tokio::sync::mpsc::UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PresenceEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Events serialize with a kind tag for wire consumers.
    #[test]
    fn test_event_serialization() {
        let event = PresenceEvent::LockReleased {
            project: "proj-7".to_string(),
            path: "maps/level.umap".to_string(),
            user_id: "u-1".to_string(),
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"lock_released\""));
    }

    /// ChannelSink delivers in order and never blocks the emitter.
    #[test]
    fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::new();
        for i in 0..3 {
            sink.emit(PresenceEvent::PresenceChanged {
                project: "p".to_string(),
                user_id: format!("u-{i}"),
                state: PresenceState::Editing,
                at: Utc::now(),
            });
        }
        for i in 0..3 {
            match rx.try_recv().unwrap() {
                PresenceEvent::PresenceChanged { user_id, .. } => {
                    assert_eq!(user_id, format!("u-{i}"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    /// Emitting into a closed channel is silently dropped.
    #[test]
    fn test_closed_channel_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(PresenceEvent::PresenceChanged {
            project: "p".to_string(),
            user_id: "u".to_string(),
            state: PresenceState::Offline,
            at: Utc::now(),
        });
    }
}
