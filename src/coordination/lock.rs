//! Distributed exclusive locks on `(project, path)` pairs.
//!
//! Binary assets cannot be merged, so teams serialize edits with locks
//! instead of resolving conflicts after the fact. The manager guarantees at
//! most one active exclusive lock per `(project, path)` across the cluster:
//! every acquire goes through the map's atomic entry upsert, which is the
//! single linearization point. Expired locks are treated as absent at
//! acquire time; a periodic sweep reclaims them eagerly and announces the
//! expiry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::coordination::events::{EventSink, PresenceEvent};
use crate::coordination::session::SessionManager;
use crate::errors::VcsError;

/// Exclusive is the only kind the engine takes; shared is accepted on the
/// wire for future read-pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Exclusive,
    Shared,
}

/// One active hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub project: String,
    pub path: String,
    pub user_id: String,
    pub user_name: String,
    pub session_id: Uuid,
    pub kind: LockKind,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Cluster-wide lock table. Lives in the coordination service process;
/// clients reach it through the sync surface.
pub struct LockManager {
    locks: DashMap<(String, String), Lock>,
    config: LockConfig,
    sessions: Arc<SessionManager>,
    sink: Arc<dyn EventSink>,
}

impl LockManager {
    pub fn new(
        config: LockConfig,
        sessions: Arc<SessionManager>,
        sink: Arc<dyn EventSink>,
    ) -> LockManager {
        LockManager {
            locks: DashMap::new(),
            config,
            sessions,
            sink,
        }
    }

    fn default_ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_secs as i64)
    }

    /// Atomic create-if-absent with TTL.
    ///
    /// - Absent or expired: the caller gets a fresh lock.
    /// - Held by the caller: refreshed, `expires_at` reset.
    /// - Held by someone else: `AlreadyHeld` naming the holder.
    ///
    /// Expired sessions cannot acquire; that guard runs before the upsert
    /// so a dead client can never extend its own hold.
    pub fn acquire(
        &self,
        project: &str,
        path: &str,
        user_id: &str,
        user_name: &str,
        session_id: Uuid,
        ttl: Option<Duration>,
    ) -> Result<Lock, VcsError> {
        if !self.sessions.is_active(session_id) {
            return Err(VcsError::Unauthorized(format!(
                "session {session_id} is not active"
            )));
        }

        let now = Utc::now();
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        let fresh = Lock {
            project: project.to_string(),
            path: path.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            session_id,
            kind: LockKind::Exclusive,
            acquired_at: now,
            expires_at: now + ttl,
        };

        let key = (project.to_string(), path.to_string());
        let acquired = match self.locks.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh.clone());
                fresh
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.is_expired_at(now) {
                    occupied.insert(fresh.clone());
                    fresh
                } else if current.user_id == user_id {
                    // Re-acquire by the holder refreshes the TTL.
                    let refreshed = Lock {
                        acquired_at: current.acquired_at,
                        ..fresh
                    };
                    occupied.insert(refreshed.clone());
                    refreshed
                } else {
                    return Err(VcsError::AlreadyHeld {
                        path: path.to_string(),
                        holder: current.user_name.clone(),
                    });
                }
            }
        };

        info!(project, path, user_id, "lock acquired");
        self.sink.emit(PresenceEvent::LockAcquired {
            project: project.to_string(),
            path: path.to_string(),
            user_id: user_id.to_string(),
            session_id,
            at: now,
        });
        Ok(acquired)
    }

    /// Release a lock held by `user_id`. `admin_override` bypasses the
    /// ownership check for operators and is logged as such.
    pub fn release(
        &self,
        project: &str,
        path: &str,
        user_id: &str,
        admin_override: bool,
    ) -> Result<(), VcsError> {
        let key = (project.to_string(), path.to_string());
        let removed = match self.locks.entry(key) {
            Entry::Vacant(_) => {
                return Err(VcsError::NotFound(format!("lock on {project}:{path}")));
            }
            Entry::Occupied(occupied) => {
                let current = occupied.get();
                if current.user_id != user_id && !admin_override {
                    return Err(VcsError::NotOwner {
                        path: path.to_string(),
                        holder: current.user_name.clone(),
                    });
                }
                if current.user_id != user_id {
                    warn!(
                        project,
                        path,
                        holder = current.user_id,
                        admin = user_id,
                        "administrative lock release"
                    );
                }
                occupied.remove()
            }
        };

        info!(project, path, user_id = removed.user_id, "lock released");
        self.sink.emit(PresenceEvent::LockReleased {
            project: project.to_string(),
            path: path.to_string(),
            user_id: removed.user_id,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Current holder, if the lock is active. Expired locks read as absent.
    pub fn get(&self, project: &str, path: &str) -> Option<Lock> {
        let key = (project.to_string(), path.to_string());
        self.locks
            .get(&key)
            .filter(|lock| !lock.is_expired_at(Utc::now()))
            .map(|lock| lock.clone())
    }

    /// All active locks for a project, sorted by path.
    pub fn list(&self, project: &str) -> Vec<Lock> {
        let now = Utc::now();
        let mut locks: Vec<Lock> = self
            .locks
            .iter()
            .filter(|entry| entry.project == project && !entry.is_expired_at(now))
            .map(|entry| entry.clone())
            .collect();
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        locks
    }

    /// Remove locks past their TTL, announcing each expiry.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(String, String, String)> = self
            .locks
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| {
                (
                    entry.project.clone(),
                    entry.path.clone(),
                    entry.user_id.clone(),
                )
            })
            .collect();
        for (project, path, user_id) in &expired {
            // Re-check under the entry lock: the holder may have refreshed
            // between the scan and the removal.
            let key = (project.clone(), path.clone());
            if let Entry::Occupied(occupied) = self.locks.entry(key) {
                if occupied.get().is_expired_at(now) {
                    occupied.remove();
                    self.sink.emit(PresenceEvent::LockExpired {
                        project: project.clone(),
                        path: path.clone(),
                        user_id: user_id.clone(),
                        at: now,
                    });
                }
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "swept expired locks");
        }
        expired.len()
    }
}
