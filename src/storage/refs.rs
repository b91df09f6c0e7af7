//! Named refs: branch and tag pointers plus the `HEAD` indirection.
//!
//! Layout under a repository root:
//!
//! ```text
//! HEAD                  "ref: refs/heads/<branch>" or a raw commit hash
//! refs/heads/<branch>   hex commit hash + newline
//! refs/tags/<tag>       hex commit hash + newline
//! refs/meta.json        default-branch marker and protected set
//! ```
//!
//! Every write is temp-then-rename; the rename is the linearization point
//! for the branch. The default-branch marker takes precedence over the
//! bootstrap name `main`, which is only used before a project records a
//! marker.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::VcsError;
use crate::hash::ObjectHash;

/// Bootstrap default used when a project has no marker yet.
pub const BOOTSTRAP_DEFAULT_BRANCH: &str = "main";

/// Ref namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

/// One ref with its flags, as listed over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub name: String,
    pub kind: RefKind,
    pub target: ObjectHash,
    pub is_default: bool,
    pub is_protected: bool,
}

/// Where `HEAD` points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    Branch(String),
    Detached(ObjectHash),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RefMeta {
    default: Option<String>,
    #[serde(default)]
    protected: BTreeSet<String>,
}

/// Filesystem-backed ref store for one repository (a client workspace's
/// `.vcs` directory or one project directory on the server).
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<RefStore, VcsError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("refs").join("heads"))
            .map_err(|e| VcsError::from_io(e, &root.display().to_string()))?;
        std::fs::create_dir_all(root.join("refs").join("tags"))
            .map_err(|e| VcsError::from_io(e, &root.display().to_string()))?;
        Ok(RefStore { root })
    }

    fn head_path(&self) -> PathBuf {
        self.root.join("HEAD")
    }

    fn branch_path(&self, branch: &str) -> Result<PathBuf, VcsError> {
        Ok(self.root.join("refs").join("heads").join(checked_name(branch)?))
    }

    fn tag_path(&self, tag: &str) -> Result<PathBuf, VcsError> {
        Ok(self.root.join("refs").join("tags").join(checked_name(tag)?))
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join("refs").join("meta.json")
    }

    fn read_meta(&self) -> Result<RefMeta, VcsError> {
        match std::fs::read(self.meta_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| VcsError::InvalidArgument(format!("refs meta: {e}"))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RefMeta::default()),
            Err(err) => Err(VcsError::IO(err)),
        }
    }

    fn write_meta(&self, meta: &RefMeta) -> Result<(), VcsError> {
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| VcsError::InvalidArgument(format!("refs meta: {e}")))?;
        atomic_write(&self.meta_path(), &bytes)
    }

    /// `HEAD` content: a branch indirection or a detached hash.
    pub fn read_head(&self) -> Result<HeadState, VcsError> {
        let raw = std::fs::read_to_string(self.head_path())
            .map_err(|_| VcsError::NotFound("HEAD".to_string()))?;
        let raw = raw.trim();
        if let Some(branch) = raw.strip_prefix("ref: refs/heads/") {
            Ok(HeadState::Branch(branch.to_string()))
        } else {
            let hash = ObjectHash::from_str(raw)
                .map_err(|e| VcsError::InvalidArgument(format!("HEAD: {e}")))?;
            Ok(HeadState::Detached(hash))
        }
    }

    pub fn set_head_branch(&self, branch: &str) -> Result<(), VcsError> {
        checked_name(branch)?;
        atomic_write(
            &self.head_path(),
            format!("ref: refs/heads/{branch}\n").as_bytes(),
        )
    }

    pub fn set_head_detached(&self, hash: ObjectHash) -> Result<(), VcsError> {
        atomic_write(&self.head_path(), format!("{hash}\n").as_bytes())
    }

    /// Current hash of a branch, or None when it has no commits yet.
    pub fn read_branch(&self, branch: &str) -> Result<Option<ObjectHash>, VcsError> {
        read_ref_file(&self.branch_path(branch)?)
    }

    /// Point a branch at a commit. The caller is responsible for
    /// fast-forward checks; this is the raw linearization primitive.
    pub fn write_branch(&self, branch: &str, hash: ObjectHash) -> Result<(), VcsError> {
        let path = self.branch_path(branch)?;
        atomic_write(&path, format!("{hash}\n").as_bytes())?;
        info!(branch, %hash, "branch ref advanced");
        Ok(())
    }

    /// Create a branch pointing at `target`. Fails when it already exists.
    pub fn create_branch(&self, branch: &str, target: ObjectHash) -> Result<(), VcsError> {
        if self.read_branch(branch)?.is_some() {
            return Err(VcsError::Conflict(format!("branch `{branch}` exists")));
        }
        self.write_branch(branch, target)
    }

    /// Delete a branch. Protected branches require `override_protection`,
    /// and the default branch can never be deleted.
    pub fn delete_branch(&self, branch: &str, override_protection: bool) -> Result<(), VcsError> {
        let meta = self.read_meta()?;
        if self.default_branch()? == branch {
            return Err(VcsError::PermissionDenied(format!(
                "`{branch}` is the default branch"
            )));
        }
        if meta.protected.contains(branch) && !override_protection {
            return Err(VcsError::PermissionDenied(format!(
                "`{branch}` is protected"
            )));
        }
        let path = self.branch_path(branch)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(VcsError::NotFound(format!("branch {branch}")))
            }
            Err(err) => Err(VcsError::IO(err)),
        }
    }

    pub fn read_tag(&self, tag: &str) -> Result<Option<ObjectHash>, VcsError> {
        read_ref_file(&self.tag_path(tag)?)
    }

    pub fn write_tag(&self, tag: &str, hash: ObjectHash) -> Result<(), VcsError> {
        atomic_write(&self.tag_path(tag)?, format!("{hash}\n").as_bytes())
    }

    pub fn delete_tag(&self, tag: &str) -> Result<(), VcsError> {
        match std::fs::remove_file(self.tag_path(tag)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(VcsError::NotFound(format!("tag {tag}")))
            }
            Err(err) => Err(VcsError::IO(err)),
        }
    }

    /// The default-branch marker, falling back to the bootstrap name when
    /// the project has not recorded one.
    pub fn default_branch(&self) -> Result<String, VcsError> {
        Ok(self
            .read_meta()?
            .default
            .unwrap_or_else(|| BOOTSTRAP_DEFAULT_BRANCH.to_string()))
    }

    /// Mark `branch` as the project default. At most one ref is default.
    pub fn set_default_branch(&self, branch: &str) -> Result<(), VcsError> {
        if self.read_branch(branch)?.is_none() {
            return Err(VcsError::NotFound(format!("branch {branch}")));
        }
        let mut meta = self.read_meta()?;
        meta.default = Some(branch.to_string());
        self.write_meta(&meta)
    }

    pub fn set_protected(&self, branch: &str, protected: bool) -> Result<(), VcsError> {
        let mut meta = self.read_meta()?;
        if protected {
            meta.protected.insert(branch.to_string());
        } else {
            meta.protected.remove(branch);
        }
        self.write_meta(&meta)
    }

    /// All branches and tags with their flags.
    pub fn list(&self) -> Result<Vec<RefRecord>, VcsError> {
        let meta = self.read_meta()?;
        let default = self.default_branch()?;
        let mut records = Vec::new();

        for (kind, dir) in [
            (RefKind::Branch, self.root.join("refs").join("heads")),
            (RefKind::Tag, self.root.join("refs").join("tags")),
        ] {
            let mut names = Vec::new();
            collect_ref_names(&dir, &dir, &mut names)?;
            names.sort();
            for name in names {
                let target = match kind {
                    RefKind::Branch => self.read_branch(&name)?,
                    RefKind::Tag => self.read_tag(&name)?,
                };
                let Some(target) = target else { continue };
                records.push(RefRecord {
                    is_default: kind == RefKind::Branch && name == default,
                    is_protected: kind == RefKind::Branch && meta.protected.contains(&name),
                    name,
                    kind,
                    target,
                });
            }
        }
        Ok(records)
    }
}

/// Reject path-escaping or empty ref names.
fn checked_name(name: &str) -> Result<&str, VcsError> {
    if name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(VcsError::InvalidArgument(format!("invalid ref name `{name}`")));
    }
    Ok(name)
}

fn read_ref_file(path: &Path) -> Result<Option<ObjectHash>, VcsError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let hash = ObjectHash::from_str(raw.trim())
                .map_err(|e| VcsError::InvalidArgument(format!("ref file: {e}")))?;
            Ok(Some(hash))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(VcsError::IO(err)),
    }
}

/// Temp-then-rename in the target's directory.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), VcsError> {
    let parent = path
        .parent()
        .ok_or_else(|| VcsError::InvalidArgument(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| VcsError::from_io(e, &parent.display().to_string()))?;
    let tmp = path.with_file_name(format!(
        "{}.tmp-{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&tmp, bytes).map_err(|e| VcsError::from_io(e, &tmp.display().to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| VcsError::from_io(e, &path.display().to_string()))?;
    Ok(())
}

/// Recursive walk collecting slash-joined ref names relative to `base`.
fn collect_ref_names(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), VcsError> {
    let iter = match std::fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(VcsError::IO(err)),
    };
    for entry in iter {
        let entry = entry.map_err(VcsError::IO)?;
        let path = entry.path();
        if entry.file_type().map_err(VcsError::IO)?.is_dir() {
            collect_ref_names(base, &path, out)?;
        } else {
            let name = path
                .strip_prefix(base)
                .expect("walked path is under base")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            if name == "meta.json" || name.contains(".tmp-") {
                continue;
            }
            out.push(name);
        }
    }
    Ok(())
}
