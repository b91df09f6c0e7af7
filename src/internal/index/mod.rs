//! Durable per-workspace index of tracked files with a stat cache for fast
//! change detection.
//!
//! The index answers "did this file change since the last add" without
//! rehashing multi-gigabyte assets: it compares the filesystem's
//! `(size, mtime-sec, mtime-nsec, inode, mode)` fingerprint against the one
//! recorded when the file was last hashed. Inode is optional; entries
//! recorded without one (or platforms that lack one) fall back to the
//! remaining fields.
//!
//! On-disk layout (all integers big-endian):
//!
//! ```text
//! header:  magic "GVCS" | u32 version | u32 entry count | 32-byte SHA-256
//!          checksum of the entry payload
//! entry:   u32 path len | path bytes | 32-byte hash | u64 size
//!          | i64 mtime sec | u32 mtime nsec | u64 inode | u32 mode
//!          | i64 created sec | u32 created nsec
//!          | i64 updated sec | u32 updated nsec | u8 staged
//! ```
//!
//! Entries are sorted ascending by path bytes. Writers follow the
//! single-writer discipline; cross-process mutation requires a re-load
//! first.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::VcsError;
use crate::hash::{HASH_SIZE, ObjectHash};
use crate::utils::read_bytes;

/// 4-byte magic at offset zero.
pub const INDEX_MAGIC: &[u8; 4] = b"GVCS";
/// Current format version.
pub const INDEX_VERSION: u32 = 2;

/// Whole seconds plus nanoseconds, the resolution the format stores for
/// mtime and bookkeeping timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn now() -> Timespec {
        let now = Utc::now();
        Timespec {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos(),
        }
    }
}

/// The stat tuple compared to detect unchanged files without hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime: Timespec,
    pub inode: u64,
    pub mode: u32,
}

impl Fingerprint {
    /// Stat `abs_path` and capture its fingerprint.
    pub fn from_path(abs_path: &Path) -> std::io::Result<Fingerprint> {
        let meta = std::fs::metadata(abs_path)?;
        Ok(Self::from_metadata(&meta))
    }

    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Fingerprint {
        use std::os::unix::fs::MetadataExt;
        Fingerprint {
            size: meta.len(),
            mtime: Timespec {
                sec: meta.mtime(),
                nsec: meta.mtime_nsec() as u32,
            },
            inode: meta.ino(),
            mode: meta.mode(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Fingerprint {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| Timespec {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos(),
            })
            .unwrap_or_default();
        Fingerprint {
            size: meta.len(),
            mtime,
            inode: 0,
            mode: if meta.permissions().readonly() {
                0o100444
            } else {
                0o100644
            },
        }
    }

    /// Compare two fingerprints, skipping the inode when either side lacks
    /// one.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        if self.size != other.size || self.mtime != other.mtime || self.mode != other.mode {
            return false;
        }
        self.inode == 0 || other.inode == 0 || self.inode == other.inode
    }
}

/// One tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Workspace-relative path.
    pub path: String,
    /// Content hash of the last recorded version.
    pub hash: ObjectHash,
    pub size: u64,
    pub mtime: Timespec,
    pub inode: u64,
    pub mode: u32,
    pub created_at: Timespec,
    pub updated_at: Timespec,
    pub staged: bool,
}

impl IndexEntry {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            size: self.size,
            mtime: self.mtime,
            inode: self.inode,
            mode: self.mode,
        }
    }
}

/// In-memory view of the index file, keyed by path. `BTreeMap` keeps the
/// iteration order equal to the on-disk order.
#[derive(Debug)]
pub struct WorkingIndex {
    /// Workspace root; entry paths are resolved against it for stat calls.
    root: PathBuf,
    /// Location of the binary index file.
    file_path: PathBuf,
    entries: BTreeMap<String, IndexEntry>,
}

impl WorkingIndex {
    /// An empty index for a fresh workspace.
    pub fn new(root: impl Into<PathBuf>, file_path: impl Into<PathBuf>) -> WorkingIndex {
        WorkingIndex {
            root: root.into(),
            file_path: file_path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the index file, or start empty when it does not exist yet.
    pub fn load_or_default(
        root: impl Into<PathBuf>,
        file_path: impl Into<PathBuf>,
    ) -> Result<WorkingIndex, VcsError> {
        let mut index = WorkingIndex::new(root, file_path);
        match std::fs::read(&index.file_path) {
            Ok(bytes) => {
                index.entries = parse_index(&bytes)?;
                Ok(index)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(index),
            Err(err) => Err(VcsError::IO(err)),
        }
    }

    /// Re-read the on-disk state, discarding in-memory entries. Required
    /// before mutating when another process may have written the file.
    pub fn load(&mut self) -> Result<(), VcsError> {
        let bytes = std::fs::read(&self.file_path).map_err(VcsError::IO)?;
        self.entries = parse_index(&bytes)?;
        Ok(())
    }

    /// Persist atomically: serialize, write to a temp file, rename over the
    /// index path. After success the on-disk bytes equal the in-memory
    /// state.
    pub fn save(&self) -> Result<(), VcsError> {
        let bytes = serialize_index(&self.entries)?;
        let tmp = self.file_path.with_extension("tmp");
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VcsError::from_io(e, &parent.display().to_string()))?;
        }
        std::fs::write(&tmp, &bytes)
            .map_err(|e| VcsError::from_io(e, &tmp.display().to_string()))?;
        std::fs::rename(&tmp, &self.file_path)
            .map_err(|e| VcsError::from_io(e, &self.file_path.display().to_string()))?;
        debug!(entries = self.entries.len(), "index saved");
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_entry(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    /// Entries awaiting commit.
    pub fn staged_entries(&self) -> Vec<&IndexEntry> {
        self.entries.values().filter(|e| e.staged).collect()
    }

    /// Stat the path and compare against the cached fingerprint. True when
    /// the path is untracked, missing, or any fingerprint field differs.
    pub fn needs_update(&self, path: &str) -> Result<bool, VcsError> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(true);
        };
        match Fingerprint::from_path(&self.root.join(path)) {
            Ok(current) => Ok(!entry.fingerprint().matches(&current)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(VcsError::IO(err)),
        }
    }

    /// One stat per path; the map preserves the query set.
    pub fn batch_needs_update(
        &self,
        paths: &[impl AsRef<str>],
    ) -> Result<BTreeMap<String, bool>, VcsError> {
        let mut result = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            result.insert(path.to_string(), self.needs_update(path)?);
        }
        Ok(result)
    }

    /// Convenience filter over `batch_needs_update`.
    pub fn get_changed(&self, paths: &[impl AsRef<str>]) -> Result<Vec<String>, VcsError> {
        Ok(self
            .batch_needs_update(paths)?
            .into_iter()
            .filter_map(|(path, changed)| changed.then_some(path))
            .collect())
    }

    /// Record a fresh hash and stat fingerprint for `path`, staging it.
    /// `created_at` is preserved across updates of the same path.
    pub fn update_entry(&mut self, path: &str, hash: ObjectHash) -> Result<(), VcsError> {
        let fingerprint = Fingerprint::from_path(&self.root.join(path)).map_err(VcsError::IO)?;
        let now = Timespec::now();
        let created_at = self
            .entries
            .get(path)
            .map(|e| e.created_at)
            .unwrap_or(now);
        self.entries.insert(
            path.to_string(),
            IndexEntry {
                path: path.to_string(),
                hash,
                size: fingerprint.size,
                mtime: fingerprint.mtime,
                inode: fingerprint.inode,
                mode: fingerprint.mode,
                created_at,
                updated_at: now,
                staged: true,
            },
        );
        Ok(())
    }

    pub fn batch_update_entries(
        &mut self,
        updates: &BTreeMap<String, ObjectHash>,
    ) -> Result<(), VcsError> {
        for (path, hash) in updates {
            self.update_entry(path, *hash)?;
        }
        Ok(())
    }

    pub fn remove_entry(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn mark_staged(&mut self, paths: &[impl AsRef<str>]) {
        for path in paths {
            if let Some(entry) = self.entries.get_mut(path.as_ref()) {
                entry.staged = true;
            }
        }
    }

    pub fn mark_unstaged(&mut self, paths: &[impl AsRef<str>]) {
        for path in paths {
            if let Some(entry) = self.entries.get_mut(path.as_ref()) {
                entry.staged = false;
            }
        }
    }
}

fn write_timespec(out: &mut Vec<u8>, ts: Timespec) -> std::io::Result<()> {
    out.write_i64::<BigEndian>(ts.sec)?;
    out.write_u32::<BigEndian>(ts.nsec)?;
    Ok(())
}

fn read_timespec(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Timespec> {
    Ok(Timespec {
        sec: cursor.read_i64::<BigEndian>()?,
        nsec: cursor.read_u32::<BigEndian>()?,
    })
}

/// Serialize entries into the full file image, checksum included.
fn serialize_index(entries: &BTreeMap<String, IndexEntry>) -> Result<Vec<u8>, VcsError> {
    let mut payload = Vec::new();
    for entry in entries.values() {
        payload.write_u32::<BigEndian>(entry.path.len() as u32)?;
        payload.write_all(entry.path.as_bytes())?;
        payload.write_all(entry.hash.as_ref())?;
        payload.write_u64::<BigEndian>(entry.size)?;
        write_timespec(&mut payload, entry.mtime)?;
        payload.write_u64::<BigEndian>(entry.inode)?;
        payload.write_u32::<BigEndian>(entry.mode)?;
        write_timespec(&mut payload, entry.created_at)?;
        write_timespec(&mut payload, entry.updated_at)?;
        payload.write_u8(entry.staged as u8)?;
    }

    let checksum = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(4 + 4 + 4 + HASH_SIZE + payload.len());
    out.write_all(INDEX_MAGIC)?;
    out.write_u32::<BigEndian>(INDEX_VERSION)?;
    out.write_u32::<BigEndian>(entries.len() as u32)?;
    out.write_all(checksum.as_ref())?;
    out.write_all(&payload)?;
    Ok(out)
}

/// Parse and verify a full file image.
fn parse_index(bytes: &[u8]) -> Result<BTreeMap<String, IndexEntry>, VcsError> {
    let mut cursor = Cursor::new(bytes);

    let magic = read_bytes(&mut cursor, 4)
        .map_err(|_| VcsError::IndexCorrupt("file shorter than header".to_string()))?;
    if magic != INDEX_MAGIC {
        return Err(VcsError::IndexCorrupt(format!(
            "bad magic {:02x?}",
            &magic[..]
        )));
    }
    let version = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| VcsError::IndexCorrupt("truncated header".to_string()))?;
    if version != INDEX_VERSION {
        return Err(VcsError::IndexCorrupt(format!(
            "unsupported version {version}"
        )));
    }
    let count = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| VcsError::IndexCorrupt("truncated header".to_string()))?;
    let mut checksum = [0u8; HASH_SIZE];
    cursor
        .read_exact(&mut checksum)
        .map_err(|_| VcsError::IndexCorrupt("truncated checksum".to_string()))?;

    let payload = &bytes[cursor.position() as usize..];
    let actual: [u8; HASH_SIZE] = Sha256::digest(payload).into();
    if actual != checksum {
        return Err(VcsError::IndexCorrupt("checksum mismatch".to_string()));
    }

    let mut cursor = Cursor::new(payload);
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let entry = parse_entry(&mut cursor)
            .map_err(|e| VcsError::IndexCorrupt(format!("truncated entry: {e}")))?;
        entries.insert(entry.path.clone(), entry);
    }
    if cursor.position() as usize != payload.len() {
        return Err(VcsError::IndexCorrupt(
            "trailing bytes after last entry".to_string(),
        ));
    }
    Ok(entries)
}

fn parse_entry(cursor: &mut Cursor<&[u8]>) -> std::io::Result<IndexEntry> {
    let path_len = cursor.read_u32::<BigEndian>()? as usize;
    let path_bytes = read_bytes(cursor, path_len)?;
    let path = String::from_utf8(path_bytes)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "path not UTF-8"))?;
    let mut hash_bytes = [0u8; HASH_SIZE];
    cursor.read_exact(&mut hash_bytes)?;
    let size = cursor.read_u64::<BigEndian>()?;
    let mtime = read_timespec(cursor)?;
    let inode = cursor.read_u64::<BigEndian>()?;
    let mode = cursor.read_u32::<BigEndian>()?;
    let created_at = read_timespec(cursor)?;
    let updated_at = read_timespec(cursor)?;
    let staged = cursor.read_u8()? != 0;
    Ok(IndexEntry {
        path,
        hash: ObjectHash(hash_bytes),
        size,
        mtime,
        inode,
        mode,
        created_at,
        updated_at,
        staged,
    })
}
