//! Client driver: batch orchestration on top of the workspace.
//!
//! The driver owns the client side of the sync data flow: stat-based change
//! detection through the index, hashing and local blob storage on a bounded
//! worker pool, existence probing so only missing objects cross the wire,
//! batched uploads, and the push/pull handshake. It also maps engine errors
//! to process exit codes for the thin CLI above it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc;

use chrono::Utc;
use futures::future::try_join_all;
use threadpool::ThreadPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ClientConfig, StoreConfig, SyncConfig};
use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::protocol::sync::RemoteSync;
use crate::protocol::types::{
    FileVersion, ObjectPayload, PullRequest, PushRequest, PushResponse, StatusRequest,
    StatusResponse, SyncError, UploadBatch,
};
use crate::workspace::commit::{CommitResult, CommitSpec, list_commits};
use crate::workspace::{AddReport, VCS_DIR, Workspace};

/// Upper bound on how much history the driver replays into sync requests.
const HISTORY_LIMIT: usize = 10_000;

/// Who this driver acts as.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub user_id: String,
    pub user_name: String,
    pub session_id: Uuid,
}

/// Outcome of applying a pull.
#[derive(Debug, Default, Clone)]
pub struct PullReport {
    /// Remote head the local branch now points at, if any.
    pub head: Option<ObjectHash>,
    /// Commits fetched and stored locally.
    pub new_commits: usize,
    /// File versions the pulled commits introduced.
    pub files: Vec<FileVersion>,
}

/// The client-side orchestration layer.
pub struct ClientDriver {
    workspace: Workspace,
    identity: ClientIdentity,
    config: ClientConfig,
    sync_config: SyncConfig,
    /// Shared handle for worker threads; same directory as the workspace
    /// store, the store itself is stateless.
    shared_store: Arc<crate::storage::ObjectStore>,
}

impl ClientDriver {
    pub fn new(
        workspace: Workspace,
        identity: ClientIdentity,
        config: ClientConfig,
        sync_config: SyncConfig,
    ) -> Result<ClientDriver, VcsError> {
        let objects_dir = workspace.root().join(VCS_DIR).join("objects");
        let shared_store = Arc::new(crate::storage::ObjectStore::open(
            objects_dir,
            StoreConfig::default(),
        )?);
        Ok(ClientDriver {
            workspace,
            identity,
            config,
            sync_config,
            shared_store,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    fn deadline(&self) -> Option<chrono::DateTime<Utc>> {
        Some(Utc::now() + chrono::Duration::seconds(self.sync_config.request_timeout_secs as i64))
    }

    /// Parallel add: stat-filter on the calling thread, then hash and store
    /// changed files on the worker pool, then fold the results back into
    /// the index in one pass.
    pub fn add(&mut self, paths: &[String]) -> Result<AddReport, VcsError> {
        let changed: HashSet<String> = self
            .workspace
            .index()
            .get_changed(paths)?
            .into_iter()
            .collect();

        let mut report = AddReport::default();
        for path in paths {
            if !changed.contains(path) {
                report.unchanged.push(path.clone());
            }
        }
        if changed.is_empty() {
            return Ok(report);
        }

        let pool = ThreadPool::new(self.config.effective_workers());
        let (tx, rx) = mpsc::channel::<(String, Result<ObjectHash, VcsError>)>();
        for path in &changed {
            let tx = tx.clone();
            let store = self.shared_store.clone();
            let abs = self.workspace.root().join(path);
            let path = path.clone();
            pool.execute(move || {
                let result = std::fs::read(&abs)
                    .map_err(|e| VcsError::from_io(e, &abs.display().to_string()))
                    .and_then(|content| {
                        let blob = Blob::from_content_bytes(content);
                        store.store_object(&blob).map(|_| blob.id)
                    });
                // A dropped receiver means the driver already failed; the
                // worker result is moot.
                let _ = tx.send((path, result));
            });
        }
        drop(tx);

        let mut first_error = None;
        for (path, result) in rx {
            match result {
                Ok(hash) => {
                    self.workspace.index_mut().update_entry(&path, hash)?;
                    report.added.push((path, hash));
                }
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }
        pool.join();
        if let Some(err) = first_error {
            return Err(err);
        }

        report.added.sort_by(|a, b| a.0.cmp(&b.0));
        self.workspace.index().save()?;
        debug!(
            added = report.added.len(),
            unchanged = report.unchanged.len(),
            "add finished"
        );
        Ok(report)
    }

    /// Commit the staged index on the current branch.
    pub fn commit(&mut self, message: &str) -> Result<CommitResult, VcsError> {
        let branch = self.workspace.current_branch()?;
        let project = self.workspace.project().to_string();
        let spec = CommitSpec::new(
            &project,
            &branch,
            message,
            &self.identity.user_name,
            &self.identity.user_id,
        );
        self.workspace.commit(&spec)
    }

    /// The local first-parent chain, newest first.
    fn local_chain(&self, branch: &str) -> Result<Vec<ObjectHash>, VcsError> {
        Ok(
            list_commits(self.workspace.store(), self.workspace.refs(), branch, HISTORY_LIMIT)?
                .into_iter()
                .map(|commit| commit.id)
                .collect(),
        )
    }

    /// Every object the chain references: commits, their trees, and the
    /// tree's blobs, deduplicated.
    fn chain_closure(&self, chain: &[ObjectHash]) -> Result<Vec<ObjectHash>, VcsError> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        for commit_hash in chain {
            let commit = self.workspace.store().get_commit(commit_hash)?;
            let tree = self.workspace.store().get_tree(&commit.tree_id)?;
            for item in &tree.tree_items {
                if seen.insert(item.id) {
                    ordered.push(item.id);
                }
            }
            if seen.insert(commit.tree_id) {
                ordered.push(commit.tree_id);
            }
            if seen.insert(*commit_hash) {
                ordered.push(*commit_hash);
            }
        }
        Ok(ordered)
    }

    /// Upload every object the remote is missing, in size-bounded batches.
    async fn upload_missing(
        &self,
        remote: &dyn RemoteSync,
        candidates: &[ObjectHash],
    ) -> Result<usize, VcsError> {
        let present = remote
            .batch_exists(self.workspace.project(), candidates)
            .await
            .map_err(sync_to_engine)?;
        let missing: Vec<ObjectHash> = candidates
            .iter()
            .zip(present)
            .filter_map(|(hash, there)| (!there).then_some(*hash))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut uploaded = 0;
        let mut batch: BTreeMap<ObjectHash, ObjectPayload> = BTreeMap::new();
        let mut batch_bytes = 0usize;
        for hash in missing {
            let (kind, data, _) = self.workspace.store().get_raw(&hash)?;
            batch_bytes += data.len();
            batch.insert(hash, ObjectPayload { kind, data });
            if batch_bytes >= self.sync_config.upload_batch_bytes {
                uploaded += self.flush_batch(remote, std::mem::take(&mut batch)).await?;
                batch_bytes = 0;
            }
        }
        if !batch.is_empty() {
            uploaded += self.flush_batch(remote, batch).await?;
        }
        Ok(uploaded)
    }

    async fn flush_batch(
        &self,
        remote: &dyn RemoteSync,
        objects: BTreeMap<ObjectHash, ObjectPayload>,
    ) -> Result<usize, VcsError> {
        let file_map: BTreeMap<String, ObjectHash> = self
            .workspace
            .index()
            .entries()
            .filter(|entry| objects.contains_key(&entry.hash))
            .map(|entry| (entry.path.clone(), entry.hash))
            .collect();
        let count = objects.len();
        let result = remote
            .upload_objects(UploadBatch {
                project: self.workspace.project().to_string(),
                user: self.identity.user_id.clone(),
                session: self.identity.session_id,
                objects,
                file_map,
                deadline: self.deadline(),
            })
            .await
            .map_err(sync_to_engine)?;
        if let Some((hash, reason)) = result.rejected.first() {
            return Err(VcsError::ObjectCorrupt(hash.to_string(), reason.clone()));
        }
        debug!(
            stored = result.stored,
            skipped = result.skipped,
            "upload batch flushed"
        );
        Ok(count)
    }

    /// Push the current branch: probe, upload missing objects, then ask the
    /// server to advance the ref. A diverged remote surfaces as
    /// `NonFastForward` so the driver exits with the dedicated code.
    pub async fn push(&mut self, remote: &dyn RemoteSync) -> Result<PushResponse, VcsError> {
        let branch = self.workspace.current_branch()?;
        let chain = self.local_chain(&branch)?;
        let head = *chain
            .first()
            .ok_or_else(|| VcsError::NotFound(format!("branch {branch} has no commits")))?;

        let closure = self.chain_closure(&chain)?;
        let uploaded = self.upload_missing(remote, &closure).await?;

        let response = remote
            .push(PushRequest {
                project: self.workspace.project().to_string(),
                branch: branch.clone(),
                head,
                local_commits: chain,
                remote_head_claim: None,
                deadline: self.deadline(),
            })
            .await
            .map_err(sync_to_engine)?;

        if response.required_pull {
            return Err(VcsError::NonFastForward(branch));
        }
        info!(
            %branch,
            uploaded,
            new_commits = response.new_commits.len(),
            "push finished"
        );
        Ok(response)
    }

    /// Pull the current branch: fetch missing commits with their trees and
    /// blobs, then fast-forward the local ref to the remote head.
    pub async fn pull(&mut self, remote: &dyn RemoteSync) -> Result<PullReport, VcsError> {
        let branch = self.workspace.current_branch()?;
        let chain = self.local_chain(&branch)?;

        let response = remote
            .pull(PullRequest {
                project: self.workspace.project().to_string(),
                branch: branch.clone(),
                local_commits: chain.clone(),
                deadline: self.deadline(),
            })
            .await
            .map_err(sync_to_engine)?;

        let Some(remote_head) = response.head else {
            return Ok(PullReport::default());
        };

        // Materialize each new commit with its tree and any blobs we lack;
        // blobs of one tree download concurrently.
        for summary in &response.commits {
            self.fetch_into_store(remote, summary.hash).await?;
            let commit = self.workspace.store().get_commit(&summary.hash)?;
            self.fetch_into_store(remote, commit.tree_id).await?;
            let tree = self.workspace.store().get_tree(&commit.tree_id)?;
            try_join_all(
                tree.tree_items
                    .iter()
                    .map(|item| self.fetch_into_store(remote, item.id)),
            )
            .await?;
        }

        // Fast-forward only: the remote head must descend from our head.
        if let Some(local_head) = chain.first() {
            if !self.descends_from(remote_head, *local_head)? {
                return Err(VcsError::NonFastForward(branch));
            }
        }
        self.workspace.refs().write_branch(&branch, remote_head)?;

        info!(
            %branch,
            new_commits = response.commits.len(),
            "pull finished"
        );
        Ok(PullReport {
            head: Some(remote_head),
            new_commits: response.commits.len(),
            files: response.files,
        })
    }

    /// Ahead/behind counts against the remote.
    pub async fn status(&self, remote: &dyn RemoteSync) -> Result<StatusResponse, VcsError> {
        let branch = self.workspace.current_branch()?;
        remote
            .status(StatusRequest {
                project: self.workspace.project().to_string(),
                branch,
                local_commits: self.local_chain(&self.workspace.current_branch()?)?,
                deadline: self.deadline(),
            })
            .await
            .map_err(sync_to_engine)
    }

    /// Log lines for the terminal: colored short hash plus summary.
    pub fn format_log(&self, limit: usize) -> Result<Vec<String>, VcsError> {
        let branch = self.workspace.current_branch()?;
        let commits = list_commits(self.workspace.store(), self.workspace.refs(), &branch, limit)?;
        Ok(commits
            .iter()
            .map(|commit| {
                format!(
                    "{} {} ({})",
                    commit.id.to_color_str(),
                    commit.summary(),
                    commit.author.name
                )
            })
            .collect())
    }

    async fn fetch_into_store(
        &self,
        remote: &dyn RemoteSync,
        hash: ObjectHash,
    ) -> Result<(), VcsError> {
        if self.workspace.store().exists(&hash) {
            return Ok(());
        }
        let payload = remote
            .fetch_object(self.workspace.project(), hash)
            .await
            .map_err(sync_to_engine)?;
        let info = self
            .workspace
            .store()
            .store_bytes(&payload.data, payload.kind)?;
        if info.hash != hash {
            return Err(VcsError::ObjectCorrupt(
                hash.to_string(),
                format!("fetched content hashes to {}", info.hash),
            ));
        }
        Ok(())
    }

    /// Walk first parents from `descendant` looking for `ancestor`.
    fn descends_from(
        &self,
        descendant: ObjectHash,
        ancestor: ObjectHash,
    ) -> Result<bool, VcsError> {
        let mut cursor = Some(descendant);
        let mut hops = 0;
        while let Some(hash) = cursor {
            if hash == ancestor {
                return Ok(true);
            }
            hops += 1;
            if hops > HISTORY_LIMIT {
                return Ok(false);
            }
            cursor = match self.workspace.store().get_commit(&hash) {
                Ok(commit) => commit.first_parent(),
                Err(VcsError::NotFound(_)) => None,
                Err(err) => return Err(err),
            };
        }
        Ok(false)
    }
}

/// Collapse protocol errors back into the engine taxonomy the driver and
/// its exit codes speak.
fn sync_to_engine(err: SyncError) -> VcsError {
    match err {
        SyncError::NotFound(msg) => VcsError::NotFound(msg),
        SyncError::MissingObject(hash, referrer) => VcsError::MissingObject(hash, referrer),
        SyncError::NonFastForward(branch) => VcsError::NonFastForward(branch),
        SyncError::Unauthorized(msg) => VcsError::Unauthorized(msg),
        SyncError::PermissionDenied(msg) => VcsError::PermissionDenied(msg),
        SyncError::Conflict(msg) => VcsError::Conflict(msg),
        SyncError::Timeout(msg) => VcsError::Timeout(msg),
        SyncError::InvalidRequest(msg) => VcsError::InvalidArgument(msg),
        SyncError::Io(err) => VcsError::IO(err),
        SyncError::Internal(msg) => VcsError::IO(std::io::Error::other(msg)),
    }
}

/// Exit code for a finished driver operation.
pub fn exit_code<T>(result: &Result<T, VcsError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    }
}
