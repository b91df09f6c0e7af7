//! Client-side workspace: the `.vcs` directory, its object store, working
//! index and refs, and the add/commit surface the driver builds on.
//!
//! Ownership is unidirectional: the workspace owns the store, index and
//! refs; the commit engine borrows them for the duration of one operation
//! and holds no back-references.

pub mod commit;
pub mod driver;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::StoreConfig;
use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::index::WorkingIndex;
use crate::internal::object::blob::Blob;
use crate::storage::refs::{BOOTSTRAP_DEFAULT_BRANCH, RefStore};
use crate::storage::ObjectStore;

/// Name of the metadata directory at the workspace root.
pub const VCS_DIR: &str = ".vcs";

/// Walk upward from `start` until a directory containing `.vcs` is found.
pub fn discover(start: &Path) -> Result<PathBuf, VcsError> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(VCS_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }
    Err(VcsError::NotFound(format!(
        "no {VCS_DIR} directory above {}",
        start.display()
    )))
}

/// An opened workspace. Paths handed to `add` are relative to `root`.
pub struct Workspace {
    root: PathBuf,
    project: String,
    store: ObjectStore,
    index: WorkingIndex,
    refs: RefStore,
}

/// Outcome of one `add` walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddReport {
    /// Paths hashed and recorded this run, with their blob hashes.
    pub added: Vec<(String, ObjectHash)>,
    /// Paths whose stat fingerprint was clean; not rehashed.
    pub unchanged: Vec<String>,
}

impl Workspace {
    /// Create the `.vcs` layout in `root` and open the result. The HEAD
    /// points at the bootstrap default branch until a commit is made.
    pub fn init(root: impl Into<PathBuf>, project: &str) -> Result<Workspace, VcsError> {
        let root = root.into();
        let vcs = root.join(VCS_DIR);
        std::fs::create_dir_all(&vcs)
            .map_err(|e| VcsError::from_io(e, &vcs.display().to_string()))?;
        std::fs::write(vcs.join("PROJECT"), format!("{project}\n"))
            .map_err(|e| VcsError::from_io(e, project))?;

        let refs = RefStore::open(&vcs)?;
        refs.set_head_branch(BOOTSTRAP_DEFAULT_BRANCH)?;
        let index = WorkingIndex::new(&root, vcs.join("index"));
        index.save()?;

        info!(root = %root.display(), project, "workspace initialized");
        Self::open(&root)
    }

    /// Open the workspace containing `start` (itself or an ancestor).
    pub fn open(start: &Path) -> Result<Workspace, VcsError> {
        let root = discover(start)?;
        let vcs = root.join(VCS_DIR);
        let project = std::fs::read_to_string(vcs.join("PROJECT"))
            .map_err(|_| VcsError::NotFound("workspace PROJECT file".to_string()))?
            .trim()
            .to_string();
        let store = ObjectStore::open(vcs.join("objects"), StoreConfig::default())?;
        let index = WorkingIndex::load_or_default(&root, vcs.join("index"))?;
        let refs = RefStore::open(&vcs)?;
        Ok(Workspace {
            root,
            project,
            store,
            index,
            refs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn index(&self) -> &WorkingIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut WorkingIndex {
        &mut self.index
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Split borrows for the commit engine: store and refs read-only, the
    /// index mutable.
    pub fn engine_parts(&mut self) -> (&ObjectStore, &RefStore, &mut WorkingIndex) {
        (&self.store, &self.refs, &mut self.index)
    }

    /// Run the commit engine against this workspace.
    pub fn commit(&mut self, spec: &commit::CommitSpec) -> Result<commit::CommitResult, VcsError> {
        let (store, refs, index) = self.engine_parts();
        commit::create_commit(store, refs, index, spec)
    }

    /// The branch HEAD names, or the default branch when detached.
    pub fn current_branch(&self) -> Result<String, VcsError> {
        match self.refs.read_head()? {
            crate::storage::refs::HeadState::Branch(branch) => Ok(branch),
            crate::storage::refs::HeadState::Detached(_) => self.refs.default_branch(),
        }
    }

    /// Stat-check each path, hash and store the changed ones as blobs, and
    /// refresh their index entries. Unchanged paths are skipped without
    /// rehashing; re-added identical content dedups in the store.
    pub fn add(&mut self, paths: &[impl AsRef<str>]) -> Result<AddReport, VcsError> {
        let mut report = AddReport::default();
        for path in paths {
            let path = path.as_ref();
            if !self.index.needs_update(path)? {
                report.unchanged.push(path.to_string());
                continue;
            }
            let abs = self.root.join(path);
            let content = std::fs::read(&abs)
                .map_err(|e| VcsError::from_io(e, &abs.display().to_string()))?;
            let blob = Blob::from_content_bytes(content);
            self.store.store_object(&blob)?;
            self.index.update_entry(path, blob.id)?;
            report.added.push((path.to_string(), blob.id));
        }
        self.index.save()?;
        Ok(report)
    }

    /// Drop a path from tracking. The on-disk file is left alone.
    pub fn remove(&mut self, path: &str) -> Result<bool, VcsError> {
        let removed = self.index.remove_entry(path);
        if removed {
            self.index.save()?;
        }
        Ok(removed)
    }
}
