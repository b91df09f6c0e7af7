//! The commit engine: turns the working index into durable tree and commit
//! objects and advances a branch ref.
//!
//! The tree snapshots every tracked entry (the index is the full picture of
//! the workspace); staged entries gate whether there is anything to commit
//! and are the ones flipped back to unstaged afterwards. Failure after the
//! tree or commit object is stored but before the ref rename leaves orphan
//! objects behind; they are harmless and reclaimed by the unreferenced
//! sweep. The ref rename is the single linearization point.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::index::WorkingIndex;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::storage::refs::RefStore;
use crate::storage::ObjectStore;

/// Callers must not supply timestamps further ahead of the wall clock than
/// this skew allowance.
const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// Everything `create_commit` needs besides the stores.
#[derive(Debug, Clone)]
pub struct CommitSpec {
    pub project: String,
    pub branch: String,
    pub message: String,
    pub author_name: String,
    pub author_id: String,
    pub metadata: BTreeMap<String, String>,
    /// Parents to record instead of the current branch head. The sync
    /// layer uses this when replaying remote commits.
    pub parent_override: Option<Vec<ObjectHash>>,
    /// Skip the fast-forward check on the ref update.
    pub force: bool,
    /// Commit time; defaults to now. Bounded future skew is enforced.
    pub timestamp: Option<i64>,
}

impl CommitSpec {
    pub fn new(project: &str, branch: &str, message: &str, author_name: &str, author_id: &str) -> CommitSpec {
        CommitSpec {
            project: project.to_string(),
            branch: branch.to_string(),
            message: message.to_string(),
            author_name: author_name.to_string(),
            author_id: author_id.to_string(),
            metadata: BTreeMap::new(),
            parent_override: None,
            force: false,
            timestamp: None,
        }
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub commit_hash: ObjectHash,
    pub tree_hash: ObjectHash,
    /// Number of files in the committed tree.
    pub entry_count: usize,
}

/// Build tree + commit objects from the index and advance the branch ref.
///
/// Steps: collect staged entries (`NothingStaged` when none), build and
/// store the snapshot tree, build and store the commit, advance
/// `refs/heads/<branch>` (fast-forward checked unless `force`), then
/// unstage the committed entries and persist the index.
pub fn create_commit(
    store: &ObjectStore,
    refs: &RefStore,
    index: &mut WorkingIndex,
    spec: &CommitSpec,
) -> Result<CommitResult, VcsError> {
    let staged: Vec<String> = index
        .staged_entries()
        .iter()
        .map(|e| e.path.clone())
        .collect();
    if staged.is_empty() {
        return Err(VcsError::NothingStaged);
    }

    let timestamp = resolve_timestamp(spec.timestamp)?;

    // Snapshot tree over every tracked entry, ordered by path bytes.
    let items: Vec<TreeItem> = index
        .entries()
        .map(|entry| TreeItem::new(TreeItemMode::Blob, entry.hash, entry.path.clone()))
        .collect();
    let tree = Tree::from_tree_items(items)?;
    store.store_object(&tree)?;
    debug!(tree = %tree.id, entries = tree.tree_items.len(), "tree stored");

    let current_head = refs.read_branch(&spec.branch)?;
    let parents = match &spec.parent_override {
        Some(parents) => parents.clone(),
        None => current_head.into_iter().collect(),
    };

    let author = Signature::new(
        SignatureKind::Author,
        &spec.author_name,
        &spec.author_id,
        timestamp,
    );
    let committer = Signature::new(
        SignatureKind::Committer,
        &spec.author_name,
        &spec.author_id,
        timestamp,
    );
    let commit = Commit::new(
        author,
        committer,
        tree.id,
        parents.clone(),
        &spec.project,
        &spec.branch,
        spec.metadata.clone(),
        &spec.message,
    )?;
    store.store_object(&commit)?;

    // The ref update is the linearization point. A branch that moved since
    // we read it, to a commit we do not descend from, is a non-fast-forward.
    if let Some(head) = refs.read_branch(&spec.branch)? {
        if !parents.contains(&head) && !spec.force {
            return Err(VcsError::NonFastForward(spec.branch.clone()));
        }
    }
    refs.write_branch(&spec.branch, commit.id)?;

    index.mark_unstaged(&staged);
    index.save()?;

    info!(
        commit = %commit.id,
        branch = %spec.branch,
        files = tree.tree_items.len(),
        "commit created"
    );
    Ok(CommitResult {
        commit_hash: commit.id,
        tree_hash: tree.id,
        entry_count: tree.tree_items.len(),
    })
}

fn resolve_timestamp(supplied: Option<i64>) -> Result<i64, VcsError> {
    let now = Utc::now().timestamp();
    match supplied {
        None => Ok(now),
        Some(ts) if ts > now + MAX_FUTURE_SKEW_SECS => Err(VcsError::InvalidArgument(format!(
            "commit timestamp {ts} is more than {MAX_FUTURE_SKEW_SECS}s in the future"
        ))),
        Some(ts) => Ok(ts),
    }
}

/// Read one commit object.
pub fn get_commit(store: &ObjectStore, hash: &ObjectHash) -> Result<Commit, VcsError> {
    store.get_commit(hash)
}

/// Read one tree object.
pub fn get_tree(store: &ObjectStore, hash: &ObjectHash) -> Result<Tree, VcsError> {
    store.get_tree(hash)
}

/// Current head of a branch, `NotFound` when unborn.
pub fn get_branch_head(refs: &RefStore, branch: &str) -> Result<ObjectHash, VcsError> {
    refs.read_branch(branch)?
        .ok_or_else(|| VcsError::NotFound(format!("branch {branch}")))
}

/// Walk the first-parent chain from the branch head, newest first, up to
/// `limit` commits. A parent that is missing from the store is corruption
/// worth surfacing, not an end-of-history marker.
pub fn list_commits(
    store: &ObjectStore,
    refs: &RefStore,
    branch: &str,
    limit: usize,
) -> Result<Vec<Commit>, VcsError> {
    let mut commits = Vec::new();
    let Some(mut cursor) = refs.read_branch(branch)? else {
        return Ok(commits);
    };
    while commits.len() < limit {
        let commit = match store.get_commit(&cursor) {
            Ok(commit) => commit,
            Err(VcsError::NotFound(_)) => {
                return Err(VcsError::MissingObject(
                    cursor.to_string(),
                    format!("history of branch {branch}"),
                ));
            }
            Err(err) => return Err(err),
        };
        let next = commit.first_parent();
        commits.push(commit);
        match next {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    Ok(commits)
}
