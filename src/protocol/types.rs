//! Wire types for the sync protocol.
//!
//! Every request and response is a serde struct; JSON is the reference
//! encoding because humans inspect these payloads, while object bytes stay
//! opaque. Requests may carry an absolute deadline; a server that sees an
//! expired deadline answers `Timeout` without doing the work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;

/// Protocol error kinds, the subset of engine errors a remote surfaces.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing object {0} referenced by {1}")]
    MissingObject(String, String),

    #[error("Non-fast-forward push on branch {0}")]
    NonFastForward(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<VcsError> for SyncError {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::NotFound(msg) => SyncError::NotFound(msg),
            VcsError::MissingObject(hash, referrer) => SyncError::MissingObject(hash, referrer),
            VcsError::NonFastForward(branch) => SyncError::NonFastForward(branch),
            VcsError::Unauthorized(msg) => SyncError::Unauthorized(msg),
            VcsError::PermissionDenied(msg) => SyncError::PermissionDenied(msg),
            VcsError::Conflict(msg) => SyncError::Conflict(msg),
            VcsError::Timeout(msg) => SyncError::Timeout(msg),
            VcsError::InvalidArgument(msg) => SyncError::InvalidRequest(msg),
            VcsError::IO(err) => SyncError::Io(err),
            other => SyncError::Internal(other.to_string()),
        }
    }
}

/// One object's bytes on the wire: its kind plus the raw payload (not the
/// envelope; the receiver rebuilds the envelope to validate the hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub kind: ObjectType,
    pub data: Vec<u8>,
}

/// `POST objects/batch`: content-addressed bulk upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    pub project: String,
    pub user: String,
    pub session: Uuid,
    /// Objects keyed by their claimed hash; the server re-derives each
    /// hash before storing.
    pub objects: BTreeMap<ObjectHash, ObjectPayload>,
    /// Which workspace paths map to which uploaded blobs.
    #[serde(default)]
    pub file_map: BTreeMap<String, ObjectHash>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Per-batch upload outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Objects newly written by this batch.
    pub stored: usize,
    /// Objects the server already had.
    pub skipped: usize,
    /// Hash-mismatched objects, with reasons; none of these were stored.
    pub rejected: Vec<(ObjectHash, String)>,
}

/// `POST sync/<project>/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub project: String,
    pub branch: String,
    /// The head the client wants the branch to point at.
    pub head: ObjectHash,
    /// Every commit on the client's first-parent chain, newest first.
    pub local_commits: Vec<ObjectHash>,
    /// What the client believes the remote head is, for diagnostics.
    #[serde(default)]
    pub remote_head_claim: Option<ObjectHash>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub updated: bool,
    /// True when the remote holds commits the client lacks; the client
    /// must pull and retry.
    pub required_pull: bool,
    /// The commits the client is missing (set on required_pull).
    pub remote_commits: Vec<ObjectHash>,
    /// The commits the push introduced (set on updated).
    pub new_commits: Vec<ObjectHash>,
}

/// `POST sync/<project>/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub project: String,
    pub branch: String,
    pub local_commits: Vec<ObjectHash>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// A compact commit listing for pull/status responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub hash: ObjectHash,
    pub tree: ObjectHash,
    pub author_name: String,
    pub author_id: String,
    pub timestamp: i64,
    pub message: String,
}

/// One file version resolved from a pulled commit's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub path: String,
    pub hash: ObjectHash,
    /// The commit this version was resolved from.
    pub commit: ObjectHash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    /// Remote head after the pull, absent for an unborn branch.
    pub head: Option<ObjectHash>,
    /// Commits the client was missing, newest first.
    pub commits: Vec<CommitSummary>,
    /// Current file versions across the pulled commits, newest wins.
    pub files: Vec<FileVersion>,
}

/// `GET sync/<project>/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub project: String,
    pub branch: String,
    pub local_commits: Vec<ObjectHash>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Commits the client has that the remote lacks.
    pub ahead: Vec<ObjectHash>,
    /// Commits the remote has that the client lacks.
    pub behind: Vec<ObjectHash>,
}

impl StatusResponse {
    pub fn ahead_count(&self) -> usize {
        self.ahead.len()
    }

    pub fn behind_count(&self) -> usize {
        self.behind.len()
    }
}

/// Fail with `Timeout` when a request deadline has already passed.
pub fn check_deadline(deadline: Option<DateTime<Utc>>, op: &str) -> Result<(), SyncError> {
    match deadline {
        Some(deadline) if deadline <= Utc::now() => {
            Err(SyncError::Timeout(format!("{op} deadline passed")))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upload batches round-trip through JSON with hex hash keys.
    #[test]
    fn test_upload_batch_json() {
        let hash = ObjectHash::new(b"payload");
        let mut objects = BTreeMap::new();
        objects.insert(
            hash,
            ObjectPayload {
                kind: ObjectType::Blob,
                data: b"payload".to_vec(),
            },
        );
        let batch = UploadBatch {
            project: "proj-7".to_string(),
            user: "u-1".to_string(),
            session: Uuid::new_v4(),
            objects,
            file_map: BTreeMap::from([("a.txt".to_string(), hash)]),
            deadline: None,
        };
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains(&hash.to_string()));
        let back: UploadBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.objects[&hash].data, b"payload");
        assert_eq!(back.file_map["a.txt"], hash);
    }

    /// Engine errors map onto the protocol taxonomy.
    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            SyncError::from(VcsError::NonFastForward("main".to_string())),
            SyncError::NonFastForward(_)
        ));
        assert!(matches!(
            SyncError::from(VcsError::NothingStaged),
            SyncError::Internal(_)
        ));
    }

    /// Expired deadlines fail closed; absent and future ones pass.
    #[test]
    fn test_check_deadline() {
        assert!(check_deadline(None, "push").is_ok());
        assert!(check_deadline(Some(Utc::now() + chrono::Duration::seconds(60)), "push").is_ok());
        assert!(matches!(
            check_deadline(Some(Utc::now() - chrono::Duration::seconds(1)), "push"),
            Err(SyncError::Timeout(_))
        ));
    }
}
