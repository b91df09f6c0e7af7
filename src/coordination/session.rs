//! Ephemeral per-user sessions scoped to `(user, project)`.
//!
//! A session is the identity that locks and sync batches are attributed
//! to. It carries no credentials itself; authentication happens in an
//! outer layer and hands a validated user id to `start`. Sessions expire
//! after a configured idle TTL; expired sessions cannot acquire locks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::coordination::events::{EventSink, PresenceEvent, PresenceState};
use crate::errors::VcsError;

/// One live session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub project: String,
    pub state: PresenceState,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// In-memory session table. The id is stable for the session's lifetime;
/// activity refreshes `last_seen_at`, and the idle TTL is measured from
/// that.
pub struct SessionManager {
    sessions: DashMap<Uuid, Session>,
    config: SessionConfig,
    sink: Arc<dyn EventSink>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>) -> SessionManager {
        SessionManager {
            sessions: DashMap::new(),
            config,
            sink,
        }
    }

    fn idle_ttl(&self) -> Duration {
        Duration::seconds(self.config.idle_ttl_secs as i64)
    }

    /// Open a session for `(user, project)`, announcing it on the presence
    /// channel.
    pub fn start(&self, user_id: &str, user_name: &str, project: &str) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            project: project.to_string(),
            state: PresenceState::Online,
            started_at: now,
            last_seen_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        info!(user_id, project, session = %session.id, "session started");
        self.sink.emit(PresenceEvent::SessionStarted {
            project: project.to_string(),
            user_id: user_id.to_string(),
            session_id: session.id,
            at: now,
        });
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// True when the session exists and has been seen within the idle TTL.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.sessions
            .get(&id)
            .map(|s| s.last_seen_at + self.idle_ttl() > Utc::now())
            .unwrap_or(false)
    }

    /// Refresh the idle clock. Fails for unknown or already-expired ids so
    /// a client cannot resurrect a session the sweeper is about to drop.
    pub fn touch(&self, id: Uuid) -> Result<(), VcsError> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| VcsError::NotFound(format!("session {id}")))?;
        if entry.last_seen_at + self.idle_ttl() <= Utc::now() {
            return Err(VcsError::Unauthorized(format!("session {id} expired")));
        }
        entry.last_seen_at = Utc::now();
        Ok(())
    }

    /// Update the broadcast activity state; never blocks on delivery.
    pub fn set_state(&self, id: Uuid, state: PresenceState) -> Result<(), VcsError> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| VcsError::NotFound(format!("session {id}")))?;
        entry.state = state;
        entry.last_seen_at = Utc::now();
        let (project, user_id) = (entry.project.clone(), entry.user_id.clone());
        drop(entry);
        self.sink.emit(PresenceEvent::PresenceChanged {
            project,
            user_id,
            state,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Close a session explicitly (logout or CLI shutdown).
    pub fn end(&self, id: Uuid) -> Option<Session> {
        let session = self.sessions.remove(&id).map(|(_, s)| s);
        if let Some(session) = &session {
            debug!(session = %session.id, "session ended");
            self.sink.emit(PresenceEvent::PresenceChanged {
                project: session.project.clone(),
                user_id: session.user_id.clone(),
                state: PresenceState::Offline,
                at: Utc::now(),
            });
        }
        session
    }

    /// Drop sessions idle past the TTL, emitting an expiry event per drop.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = self.idle_ttl();
        let expired: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.last_seen_at + ttl <= now)
            .map(|s| s.clone())
            .collect();
        for session in &expired {
            self.sessions.remove(&session.id);
            self.sink.emit(PresenceEvent::SessionExpired {
                project: session.project.clone(),
                user_id: session.user_id.clone(),
                session_id: session.id,
                at: now,
            });
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "swept expired sessions");
        }
        expired.len()
    }

    /// Live sessions for one project, expired ones excluded.
    pub fn list(&self, project: &str) -> Vec<Session> {
        let now = Utc::now();
        let ttl = self.idle_ttl();
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.project == project && s.last_seen_at + ttl > now)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }
}
