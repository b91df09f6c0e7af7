//! HTTP transport mapping for the sync surface.
//!
//! This module is deliberately router-free: it provides the request-path
//! parsing, query handling, body shapes, and status-code mapping an
//! embedding HTTP server needs to expose the engine, without pulling a web
//! framework into the core. The concrete routing layer lives with the
//! deployment, not here.
//!
//! Reference mapping:
//!
//! ```text
//! HEAD   object/<hash>                      presence probe, 200/404
//! POST   objects/batch                      UploadBatch body
//! POST   locks/<project>/<path>             LockAcquireBody, 200/409
//! DELETE locks/<project>/<path>             200/403
//! POST   commits/<project>                  CommitCreateBody, 201
//! POST   sync/<project>/push|pull           PushRequest / PullRequest
//! GET    sync/<project>/status?branch=...   StatusRequest via query
//! GET    branches/<project>                 list
//! POST   branches/<project>                 BranchCreateBody
//! DELETE branches/<project>/<branch>        ?override=true for protected
//! PATCH  branches/<project>/<branch>        BranchPatchBody
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::protocol::types::SyncError;

/// JSON is the reference body encoding for every mapped route.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `POST locks/<project>/<path>` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockAcquireBody {
    pub user_id: String,
    pub user_name: String,
    pub session_id: Uuid,
    /// Override of the server's default TTL, in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// `DELETE locks/<project>/<path>` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockReleaseBody {
    pub user_id: String,
    #[serde(default)]
    pub admin_override: bool,
}

/// `POST commits/<project>` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitCreateBody {
    pub message: String,
    pub branch: String,
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub parent_commits: Vec<ObjectHash>,
}

/// `POST branches/<project>` body. Exactly one source must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCreateBody {
    pub name: String,
    #[serde(default)]
    pub from_commit: Option<ObjectHash>,
    #[serde(default)]
    pub from_branch: Option<String>,
}

/// `PATCH branches/<project>/<branch>` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchPatchBody {
    #[serde(default)]
    pub default: Option<bool>,
    #[serde(default)]
    pub protected: Option<bool>,
}

/// Parse `object/<hash>` into the probed hash.
pub fn parse_object_route(path: &str) -> Option<ObjectHash> {
    let hash = path.strip_prefix("object/")?;
    ObjectHash::from_str(hash).ok()
}

/// Parse `locks/<project>/<path>`; the asset path may itself contain
/// slashes.
pub fn parse_lock_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("locks/")?;
    let (project, asset_path) = rest.split_once('/')?;
    if project.is_empty() || asset_path.is_empty() {
        return None;
    }
    Some((project, asset_path))
}

/// Parse `sync/<project>/<op>` where op is push, pull, or status.
pub fn parse_sync_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("sync/")?;
    let (project, op) = rest.split_once('/')?;
    if project.is_empty() || !matches!(op, "push" | "pull" | "status") {
        return None;
    }
    Some((project, op))
}

/// Parse `commits/<project>`.
pub fn parse_commit_route(path: &str) -> Option<&str> {
    let project = path.strip_prefix("commits/")?;
    (!project.is_empty() && !project.contains('/')).then_some(project)
}

/// Parse `branches/<project>` or `branches/<project>/<branch>`; branch
/// names may contain slashes.
pub fn parse_branch_route(path: &str) -> Option<(&str, Option<&str>)> {
    let rest = path.strip_prefix("branches/")?;
    match rest.split_once('/') {
        Some((project, branch)) if !project.is_empty() && !branch.is_empty() => {
            Some((project, Some(branch)))
        }
        Some(_) => None,
        None if !rest.is_empty() => Some((rest, None)),
        None => None,
    }
}

/// Extract one query parameter's raw value.
pub fn get_query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Parse the comma-separated `local_commits` query form.
pub fn parse_commit_list(raw: &str) -> Result<Vec<ObjectHash>, SyncError> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            ObjectHash::from_str(s)
                .map_err(|e| SyncError::InvalidRequest(format!("local_commits: {e}")))
        })
        .collect()
}

/// Status code for protocol-level errors.
pub fn sync_status_code(err: &SyncError) -> u16 {
    match err {
        SyncError::NotFound(_) => 404,
        SyncError::MissingObject(_, _) => 409,
        SyncError::NonFastForward(_) => 409,
        SyncError::Conflict(_) => 409,
        SyncError::Unauthorized(_) => 401,
        SyncError::PermissionDenied(_) => 403,
        SyncError::Timeout(_) => 408,
        SyncError::InvalidRequest(_) => 400,
        SyncError::Io(_) | SyncError::Internal(_) => 500,
    }
}

/// Status code for engine errors surfaced by the lock and branch routes.
pub fn engine_status_code(err: &VcsError) -> u16 {
    match err {
        VcsError::NotFound(_) => 404,
        VcsError::AlreadyHeld { .. } => 409,
        VcsError::Conflict(_) | VcsError::NonFastForward(_) => 409,
        VcsError::NotOwner { .. } | VcsError::PermissionDenied(_) => 403,
        VcsError::Unauthorized(_) => 401,
        VcsError::Timeout(_) => 408,
        VcsError::InvalidArgument(_) => 400,
        _ => 500,
    }
}
