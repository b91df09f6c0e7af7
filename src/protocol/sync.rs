//! Server-side sync engine and the `RemoteSync` abstraction clients talk
//! through.
//!
//! The engine reconciles client commits, objects and refs with the
//! authoritative per-project repositories under the server's data root.
//! Push and pull on the same `(project, branch)` are serialized by an async
//! mutex; object uploads are idempotent by hash and run concurrently.
//! Clients must upload every referenced object before pushing: the engine
//! walks the new commits' trees and rejects pushes with absent objects.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::coordination::session::SessionManager;
use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::protocol::types::{
    CommitSummary, FileVersion, ObjectPayload, PullRequest, PullResponse, PushRequest,
    PushResponse, StatusRequest, StatusResponse, SyncError, UploadBatch, UploadResult,
    check_deadline,
};
use crate::storage::refs::RefStore;
use crate::storage::ObjectStore;

/// Client-facing sync surface. The in-process `SyncServer` implements it
/// directly; an HTTP client binding implements the same trait against the
/// wire mapping in `protocol::http`.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// `HEAD object/<hash>`: presence probe without payload transfer.
    async fn object_exists(&self, project: &str, hash: ObjectHash) -> Result<bool, SyncError>;

    /// Bulk probe; the result bitmap is aligned with the request order.
    async fn batch_exists(
        &self,
        project: &str,
        hashes: &[ObjectHash],
    ) -> Result<Vec<bool>, SyncError>;

    /// Hash-validated, idempotent bulk upload.
    async fn upload_objects(&self, batch: UploadBatch) -> Result<UploadResult, SyncError>;

    /// Download one object's kind and payload.
    async fn fetch_object(
        &self,
        project: &str,
        hash: ObjectHash,
    ) -> Result<ObjectPayload, SyncError>;

    async fn push(&self, request: PushRequest) -> Result<PushResponse, SyncError>;

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError>;

    async fn status(&self, request: StatusRequest) -> Result<StatusResponse, SyncError>;
}

/// One project's authoritative storage on the server.
pub struct ProjectRepo {
    store: ObjectStore,
    refs: RefStore,
}

impl ProjectRepo {
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }
}

/// The coordination-side sync engine. Projects are materialized lazily
/// under `data_root/<project>/`.
pub struct SyncServer {
    data_root: PathBuf,
    projects: DashMap<String, Arc<ProjectRepo>>,
    branch_locks: DashMap<(String, String), Arc<Mutex<()>>>,
    sessions: Arc<SessionManager>,
}

impl SyncServer {
    pub fn new(data_root: impl Into<PathBuf>, sessions: Arc<SessionManager>) -> SyncServer {
        SyncServer {
            data_root: data_root.into(),
            projects: DashMap::new(),
            branch_locks: DashMap::new(),
            sessions,
        }
    }

    /// Get or create a project repository. Project ids are single path
    /// segments; anything else is an invalid request.
    pub fn repo(&self, project: &str) -> Result<Arc<ProjectRepo>, SyncError> {
        if project.is_empty() || project.contains('/') || project == "." || project == ".." {
            return Err(SyncError::InvalidRequest(format!(
                "invalid project id `{project}`"
            )));
        }
        if let Some(repo) = self.projects.get(project) {
            return Ok(repo.clone());
        }
        let root = self.data_root.join(project);
        let store = ObjectStore::open(root.join("objects"), StoreConfig::default())
            .map_err(SyncError::from)?;
        let refs = RefStore::open(&root).map_err(SyncError::from)?;
        let repo = Arc::new(ProjectRepo { store, refs });
        self.projects.insert(project.to_string(), repo.clone());
        Ok(repo)
    }

    fn branch_guard(&self, project: &str, branch: &str) -> Arc<Mutex<()>> {
        self.branch_locks
            .entry((project.to_string(), branch.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The remote's first-parent chain for a branch, newest first. A break
    /// in the chain is corruption the operator must see, not an empty
    /// history.
    fn remote_chain(repo: &ProjectRepo, branch: &str) -> Result<Vec<ObjectHash>, SyncError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let Some(mut cursor) = repo.refs.read_branch(branch).map_err(SyncError::from)? else {
            return Ok(chain);
        };
        loop {
            if !seen.insert(cursor) {
                return Err(SyncError::Internal(format!(
                    "parent cycle at {cursor} on branch {branch}"
                )));
            }
            let commit = match repo.store.get_commit(&cursor) {
                Ok(commit) => commit,
                Err(VcsError::NotFound(_)) => {
                    return Err(SyncError::MissingObject(
                        cursor.to_string(),
                        format!("branch {branch}"),
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            chain.push(cursor);
            match commit.first_parent() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Branch listing for the CRUD surface.
    pub fn list_branches(
        &self,
        project: &str,
    ) -> Result<Vec<crate::storage::refs::RefRecord>, SyncError> {
        self.repo(project)?.refs.list().map_err(SyncError::from)
    }

    /// Create a branch from an explicit commit or from another branch's
    /// head. Exactly one source must be given, and the target commit must
    /// exist in the project's store.
    pub fn create_branch(
        &self,
        project: &str,
        body: &crate::protocol::http::BranchCreateBody,
    ) -> Result<(), SyncError> {
        let repo = self.repo(project)?;
        let target = match (&body.from_commit, &body.from_branch) {
            (Some(commit), None) => *commit,
            (None, Some(source)) => repo
                .refs
                .read_branch(source)
                .map_err(SyncError::from)?
                .ok_or_else(|| SyncError::NotFound(format!("branch {source}")))?,
            _ => {
                return Err(SyncError::InvalidRequest(
                    "exactly one of from_commit or from_branch is required".to_string(),
                ));
            }
        };
        if !repo.store.exists(&target) {
            return Err(SyncError::MissingObject(
                target.to_string(),
                format!("new branch {}", body.name),
            ));
        }
        repo.refs
            .create_branch(&body.name, target)
            .map_err(SyncError::from)
    }

    /// Delete a branch, honoring protection unless overridden.
    pub fn delete_branch(
        &self,
        project: &str,
        branch: &str,
        override_protection: bool,
    ) -> Result<(), SyncError> {
        self.repo(project)?
            .refs
            .delete_branch(branch, override_protection)
            .map_err(SyncError::from)
    }

    /// Patch default/protected flags on a branch.
    pub fn patch_branch(
        &self,
        project: &str,
        branch: &str,
        body: &crate::protocol::http::BranchPatchBody,
    ) -> Result<(), SyncError> {
        let repo = self.repo(project)?;
        if body.default == Some(false) {
            return Err(SyncError::InvalidRequest(
                "unset the default by marking another branch default".to_string(),
            ));
        }
        if body.default == Some(true) {
            repo.refs.set_default_branch(branch).map_err(SyncError::from)?;
        }
        if let Some(protected) = body.protected {
            repo.refs
                .set_protected(branch, protected)
                .map_err(SyncError::from)?;
        }
        Ok(())
    }

    /// Every object a set of commits references must already be on the
    /// server: the commit itself, its tree, and every blob in the tree.
    fn check_closure(repo: &ProjectRepo, commits: &[ObjectHash]) -> Result<(), SyncError> {
        for commit_hash in commits {
            let commit = match repo.store.get_commit(commit_hash) {
                Ok(commit) => commit,
                Err(VcsError::NotFound(_)) => {
                    return Err(SyncError::MissingObject(
                        commit_hash.to_string(),
                        "pushed history".to_string(),
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            let tree = match repo.store.get_tree(&commit.tree_id) {
                Ok(tree) => tree,
                Err(VcsError::NotFound(_)) => {
                    return Err(SyncError::MissingObject(
                        commit.tree_id.to_string(),
                        format!("commit {commit_hash}"),
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            for item in &tree.tree_items {
                if !repo.store.exists(&item.id) {
                    return Err(SyncError::MissingObject(
                        item.id.to_string(),
                        format!("tree {} entry {}", tree.id, item.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSync for SyncServer {
    async fn object_exists(&self, project: &str, hash: ObjectHash) -> Result<bool, SyncError> {
        Ok(self.repo(project)?.store.exists(&hash))
    }

    async fn batch_exists(
        &self,
        project: &str,
        hashes: &[ObjectHash],
    ) -> Result<Vec<bool>, SyncError> {
        let repo = self.repo(project)?;
        Ok(hashes.iter().map(|hash| repo.store.exists(hash)).collect())
    }

    async fn upload_objects(&self, batch: UploadBatch) -> Result<UploadResult, SyncError> {
        check_deadline(batch.deadline, "upload")?;
        if !self.sessions.is_active(batch.session) {
            return Err(SyncError::Unauthorized(format!(
                "session {} is not active",
                batch.session
            )));
        }
        let repo = self.repo(&batch.project)?;

        let mut result = UploadResult::default();
        for (claimed, payload) in &batch.objects {
            let actual = ObjectHash::from_type_and_data(payload.kind, &payload.data);
            if actual != *claimed {
                warn!(%claimed, %actual, "rejected upload with mismatched hash");
                result
                    .rejected
                    .push((*claimed, format!("content hashes to {actual}")));
                continue;
            }
            if repo.store.exists(claimed) {
                result.skipped += 1;
                continue;
            }
            repo.store
                .store_bytes(&payload.data, payload.kind)
                .map_err(SyncError::from)?;
            result.stored += 1;
        }

        // The file map is advisory attribution for the batch; the object
        // store remains the single authority on content.
        if !batch.file_map.is_empty() {
            debug!(
                project = %batch.project,
                user = %batch.user,
                files = batch.file_map.len(),
                "upload batch file map received"
            );
        }

        info!(
            project = %batch.project,
            stored = result.stored,
            skipped = result.skipped,
            rejected = result.rejected.len(),
            "upload batch processed"
        );
        Ok(result)
    }

    async fn fetch_object(
        &self,
        project: &str,
        hash: ObjectHash,
    ) -> Result<ObjectPayload, SyncError> {
        let repo = self.repo(project)?;
        let (kind, data, _) = repo.store.get_raw(&hash).map_err(SyncError::from)?;
        Ok(ObjectPayload { kind, data })
    }

    async fn push(&self, request: PushRequest) -> Result<PushResponse, SyncError> {
        check_deadline(request.deadline, "push")?;
        let repo = self.repo(&request.project)?;
        let guard = self.branch_guard(&request.project, &request.branch);
        let _serialized = guard.lock().await;

        let remote = Self::remote_chain(&repo, &request.branch)?;
        let local_set: HashSet<ObjectHash> = request.local_commits.iter().copied().collect();

        // Commits present remotely but unknown to the client mean the
        // branch diverged; the client must pull first.
        let conflicts: Vec<ObjectHash> = remote
            .iter()
            .filter(|hash| !local_set.contains(hash))
            .copied()
            .collect();
        if !conflicts.is_empty() {
            info!(
                project = %request.project,
                branch = %request.branch,
                conflicts = conflicts.len(),
                "push requires pull"
            );
            return Ok(PushResponse {
                updated: false,
                required_pull: true,
                remote_commits: conflicts,
                new_commits: Vec::new(),
            });
        }

        let remote_set: HashSet<ObjectHash> = remote.iter().copied().collect();
        let new: Vec<ObjectHash> = request
            .local_commits
            .iter()
            .filter(|hash| !remote_set.contains(hash))
            .copied()
            .collect();
        if new.is_empty() {
            return Ok(PushResponse::default());
        }

        if !request.local_commits.first().is_some_and(|h| *h == request.head) {
            return Err(SyncError::InvalidRequest(
                "push head must be the newest local commit".to_string(),
            ));
        }
        Self::check_closure(&repo, &new)?;

        repo.refs
            .write_branch(&request.branch, request.head)
            .map_err(SyncError::from)?;

        info!(
            project = %request.project,
            branch = %request.branch,
            head = %request.head,
            new = new.len(),
            "push accepted"
        );
        Ok(PushResponse {
            updated: true,
            required_pull: false,
            remote_commits: Vec::new(),
            new_commits: new,
        })
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError> {
        check_deadline(request.deadline, "pull")?;
        let repo = self.repo(&request.project)?;
        let guard = self.branch_guard(&request.project, &request.branch);
        let _serialized = guard.lock().await;

        let remote = Self::remote_chain(&repo, &request.branch)?;
        let local_set: HashSet<ObjectHash> = request.local_commits.iter().copied().collect();
        let new: Vec<ObjectHash> = remote
            .iter()
            .filter(|hash| !local_set.contains(hash))
            .copied()
            .collect();

        let mut commits = Vec::with_capacity(new.len());
        let mut files: Vec<FileVersion> = Vec::new();
        let mut seen_paths = HashSet::new();
        for hash in &new {
            let commit = repo.store.get_commit(hash).map_err(SyncError::from)?;
            let tree = repo.store.get_tree(&commit.tree_id).map_err(SyncError::from)?;
            // Walking newest-to-oldest, the first version seen per path is
            // the current one.
            for item in &tree.tree_items {
                if seen_paths.insert(item.name.clone()) {
                    files.push(FileVersion {
                        path: item.name.clone(),
                        hash: item.id,
                        commit: *hash,
                    });
                }
            }
            commits.push(CommitSummary {
                hash: *hash,
                tree: commit.tree_id,
                author_name: commit.author.name.clone(),
                author_id: commit.author.user_id.clone(),
                timestamp: commit.author.timestamp,
                message: commit.message.clone(),
            });
        }

        debug!(
            project = %request.project,
            branch = %request.branch,
            new = commits.len(),
            "pull resolved"
        );
        Ok(PullResponse {
            head: remote.first().copied(),
            commits,
            files,
        })
    }

    async fn status(&self, request: StatusRequest) -> Result<StatusResponse, SyncError> {
        check_deadline(request.deadline, "status")?;
        let repo = self.repo(&request.project)?;

        let remote = Self::remote_chain(&repo, &request.branch)?;
        let remote_set: HashSet<ObjectHash> = remote.iter().copied().collect();
        let local_set: HashSet<ObjectHash> = request.local_commits.iter().copied().collect();

        Ok(StatusResponse {
            ahead: request
                .local_commits
                .iter()
                .filter(|hash| !remote_set.contains(hash))
                .copied()
                .collect(),
            behind: remote
                .iter()
                .filter(|hash| !local_set.contains(hash))
                .copied()
                .collect(),
        })
    }
}
