//! Content-addressed object storage with transparent zlib compression and
//! deduplication.
//!
//! Objects live under `objects/<hh>/<62-hex-tail>` where `hh` is the first
//! two hex characters of the SHA-256 envelope hash. The fanout keeps any
//! single directory bounded and matches the layout other content-addressed
//! tools recognize. Hashing always covers the uncompressed envelope
//! `<kind> <size>\0<payload>`, so two clients with different compression
//! settings produce identical hashes.
//!
//! Writes are write-temp-then-rename; the rename is the commit point.
//! Concurrent stores of the same content race benignly to the same final
//! path. Temp files orphaned by crashes are invisible to `exists` and are
//! swept on startup.

pub mod refs;

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use chrono::{DateTime, Utc};
use flate2::{Compression, write::ZlibEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;
use crate::internal::zlib::stream::inflate::ReadBoxed;

/// Metadata returned by `store` and `get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub hash: ObjectHash,
    pub kind: ObjectType,
    /// Uncompressed payload size.
    pub size: u64,
    /// Bytes on disk after zlib.
    pub compressed_size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Aggregate counters for `stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub object_count: u64,
    pub logical_bytes: u64,
    pub compressed_bytes: u64,
}

/// A directory-backed object store. Cheap to clone paths around; all
/// methods take `&self`, the filesystem provides the concurrency story.
pub struct ObjectStore {
    root: PathBuf,
    config: StoreConfig,
}

impl ObjectStore {
    /// Open (and create if needed) a store rooted at `root`, sweeping
    /// crash-orphaned temp files when the config asks for it.
    pub fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<ObjectStore, VcsError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| VcsError::from_io(e, &root.display().to_string()))?;
        let store = ObjectStore { root, config };
        if store.config.sweep_temp_on_startup {
            let swept = store.sweep_temp_files()?;
            if swept > 0 {
                warn!(swept, "removed orphan temp files from object store");
            }
        }
        Ok(store)
    }

    /// Final path for a hash: two-character shard, 62-character tail.
    pub fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        let (shard, tail) = hash.to_fanout();
        self.root.join(shard).join(tail)
    }

    /// Store the payload read from `reader` under `kind`. Idempotent by
    /// hash: when the final path already exists the write is skipped and
    /// the existing object's info is returned.
    pub fn store(&self, reader: &mut impl Read, kind: ObjectType) -> Result<ObjectInfo, VcsError> {
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).map_err(VcsError::IO)?;
        self.store_bytes(&payload, kind)
    }

    /// Store an in-memory payload under `kind`.
    pub fn store_bytes(&self, payload: &[u8], kind: ObjectType) -> Result<ObjectInfo, VcsError> {
        let hash = ObjectHash::from_type_and_data(kind, payload);
        let final_path = self.object_path(&hash);

        if final_path.exists() {
            // Deduplicated: same content was stored before.
            let compressed_size = std::fs::metadata(&final_path).map_err(VcsError::IO)?.len();
            return Ok(ObjectInfo {
                hash,
                kind,
                size: payload.len() as u64,
                compressed_size,
                stored_at: Utc::now(),
            });
        }

        let shard_dir = final_path.parent().expect("object path has a shard dir");
        std::fs::create_dir_all(shard_dir)
            .map_err(|e| VcsError::from_io(e, &shard_dir.display().to_string()))?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(kind.to_bytes())
            .and_then(|_| encoder.write_all(b" "))
            .and_then(|_| encoder.write_all(payload.len().to_string().as_bytes()))
            .and_then(|_| encoder.write_all(b"\x00"))
            .and_then(|_| encoder.write_all(payload))
            .map_err(|e| VcsError::from_io(e, &final_path.display().to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| VcsError::from_io(e, &final_path.display().to_string()))?;

        // Unique temp name per writer; two stores of the same content both
        // rename onto the same final path and the second rename is a no-op.
        let tmp_path = final_path.with_file_name(format!(
            "{}.tmp-{}",
            final_path.file_name().unwrap().to_string_lossy(),
            Uuid::new_v4().simple()
        ));
        {
            let mut tmp = std::fs::File::create(&tmp_path)
                .map_err(|e| VcsError::from_io(e, &tmp_path.display().to_string()))?;
            tmp.write_all(&compressed)
                .map_err(|e| VcsError::from_io(e, &tmp_path.display().to_string()))?;
            if self.config.fsync_objects {
                tmp.sync_all()
                    .map_err(|e| VcsError::from_io(e, &tmp_path.display().to_string()))?;
            }
        }
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| VcsError::from_io(e, &final_path.display().to_string()))?;

        debug!(%hash, %kind, size = payload.len(), "object stored");
        Ok(ObjectInfo {
            hash,
            kind,
            size: payload.len() as u64,
            compressed_size: compressed.len() as u64,
            stored_at: Utc::now(),
        })
    }

    /// Store a typed object.
    pub fn store_object(&self, object: &impl ObjectTrait) -> Result<ObjectInfo, VcsError> {
        self.store_bytes(&object.to_data()?, object.get_type())
    }

    /// Read an object expected to be of `kind`. The payload is inflated,
    /// the envelope re-hashed, and any mismatch (bytes or kind) surfaces as
    /// `ObjectCorrupt`.
    pub fn get(&self, hash: &ObjectHash, kind: ObjectType) -> Result<Vec<u8>, VcsError> {
        let (actual_kind, payload, _) = self.get_raw(hash)?;
        if actual_kind != kind {
            return Err(VcsError::ObjectCorrupt(
                hash.to_string(),
                format!("expected kind `{kind}`, found `{actual_kind}`"),
            ));
        }
        Ok(payload)
    }

    /// Read an object of any kind, returning `(kind, payload, info)`.
    pub fn get_raw(
        &self,
        hash: &ObjectHash,
    ) -> Result<(ObjectType, Vec<u8>, ObjectInfo), VcsError> {
        let path = self.object_path(hash);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcsError::NotFound(format!("object {hash}")));
            }
            Err(err) => return Err(VcsError::IO(err)),
        };
        let compressed_size = file.metadata().map_err(VcsError::IO)?.len();

        let mut reader = ReadBoxed::new_unhashed(BufReader::new(file));
        let mut envelope = Vec::new();
        reader
            .read_to_end(&mut envelope)
            .map_err(|e| VcsError::ObjectCorrupt(hash.to_string(), e.to_string()))?;

        let (kind, size, payload_start) = parse_envelope_header(&envelope)
            .map_err(|msg| VcsError::ObjectCorrupt(hash.to_string(), msg))?;
        let payload = &envelope[payload_start..];
        if payload.len() as u64 != size {
            return Err(VcsError::ObjectCorrupt(
                hash.to_string(),
                format!("declared size {size}, payload is {}", payload.len()),
            ));
        }

        let actual = ObjectHash::new(&envelope);
        if actual != *hash {
            return Err(VcsError::ObjectCorrupt(
                hash.to_string(),
                format!("content hashes to {actual}"),
            ));
        }

        let info = ObjectInfo {
            hash: *hash,
            kind,
            size,
            compressed_size,
            stored_at: Utc::now(),
        };
        Ok((kind, payload.to_vec(), info))
    }

    /// Typed readers used by the commit engine and the sync server.
    pub fn get_blob(&self, hash: &ObjectHash) -> Result<Blob, VcsError> {
        let payload = self.get(hash, ObjectType::Blob)?;
        Blob::from_bytes(&payload, *hash)
    }

    pub fn get_tree(&self, hash: &ObjectHash) -> Result<Tree, VcsError> {
        let payload = self.get(hash, ObjectType::Tree)?;
        Tree::from_bytes(&payload, *hash)
    }

    pub fn get_commit(&self, hash: &ObjectHash) -> Result<Commit, VcsError> {
        let payload = self.get(hash, ObjectType::Commit)?;
        Commit::from_bytes(&payload, *hash)
    }

    /// Path-existence probe; no decompression, ignores temp files.
    pub fn exists(&self, hash: &ObjectHash) -> bool {
        self.object_path(hash).exists()
    }

    /// Bulk probe, one syscall per hash.
    pub fn batch_exists(&self, hashes: &[ObjectHash]) -> HashMap<ObjectHash, bool> {
        hashes
            .iter()
            .map(|hash| (*hash, self.exists(hash)))
            .collect()
    }

    /// Decompress and re-hash one object without returning its payload.
    pub fn verify(&self, hash: &ObjectHash) -> Result<(), VcsError> {
        self.get_raw(hash).map(|_| ())
    }

    /// Walk the fanout and aggregate counters. Logical sizes come from the
    /// envelope headers, so only the first bytes of each object are
    /// inflated.
    pub fn stats(&self) -> Result<StoreStats, VcsError> {
        let mut stats = StoreStats::default();
        for entry in self.walk_objects()? {
            let (path, compressed_size) = entry;
            stats.object_count += 1;
            stats.compressed_bytes += compressed_size;
            stats.logical_bytes += self.read_logical_size(&path)?;
        }
        Ok(stats)
    }

    /// Delete crash-orphaned temp files anywhere in the fanout.
    pub fn sweep_temp_files(&self) -> Result<u64, VcsError> {
        let mut swept = 0;
        for shard in read_dir_or_empty(&self.root)? {
            let shard = shard.map_err(VcsError::IO)?;
            if !shard.file_type().map_err(VcsError::IO)?.is_dir() {
                continue;
            }
            for file in read_dir_or_empty(&shard.path())? {
                let file = file.map_err(VcsError::IO)?;
                if file.file_name().to_string_lossy().contains(".tmp-") {
                    std::fs::remove_file(file.path()).map_err(VcsError::IO)?;
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }

    /// Delete objects whose hashes are not in `live`. Callers compute the
    /// live set by walking refs, commits, trees, and index entries; the
    /// store itself has no notion of reachability.
    pub fn sweep_unreferenced(
        &self,
        live: &std::collections::HashSet<ObjectHash>,
    ) -> Result<u64, VcsError> {
        let mut swept = 0;
        for (path, _) in self.walk_objects()? {
            let name = format!(
                "{}{}",
                path.parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            );
            let Ok(hash) = name.parse::<ObjectHash>() else {
                continue;
            };
            if !live.contains(&hash) {
                std::fs::remove_file(&path).map_err(VcsError::IO)?;
                swept += 1;
                debug!(%hash, "swept unreferenced object");
            }
        }
        Ok(swept)
    }

    /// All `(path, compressed_size)` pairs in the fanout, temp files
    /// excluded.
    fn walk_objects(&self) -> Result<Vec<(PathBuf, u64)>, VcsError> {
        let mut objects = Vec::new();
        for shard in read_dir_or_empty(&self.root)? {
            let shard = shard.map_err(VcsError::IO)?;
            if !shard.file_type().map_err(VcsError::IO)?.is_dir() {
                continue;
            }
            for file in read_dir_or_empty(&shard.path())? {
                let file = file.map_err(VcsError::IO)?;
                if file.file_name().to_string_lossy().contains(".tmp-") {
                    continue;
                }
                let meta = file.metadata().map_err(VcsError::IO)?;
                if meta.is_file() {
                    objects.push((file.path(), meta.len()));
                }
            }
        }
        Ok(objects)
    }

    /// Inflate just enough of an object to read its declared payload size.
    fn read_logical_size(&self, path: &Path) -> Result<u64, VcsError> {
        let file = std::fs::File::open(path).map_err(VcsError::IO)?;
        let mut reader = ReadBoxed::new_unhashed(BufReader::new(file));
        let mut head = [0u8; 64];
        let mut filled = 0;
        while filled < head.len() {
            let n = reader
                .read(&mut head[filled..])
                .map_err(|e| VcsError::ObjectCorrupt(path.display().to_string(), e.to_string()))?;
            if n == 0 {
                break;
            }
            filled += n;
            if head[..filled].contains(&0) {
                break;
            }
        }
        let (_, size, _) = parse_envelope_header(&head[..filled])
            .map_err(|msg| VcsError::ObjectCorrupt(path.display().to_string(), msg))?;
        Ok(size)
    }
}

/// Split `<kind> <size>\0…`, returning the kind, declared size, and the
/// payload offset.
fn parse_envelope_header(envelope: &[u8]) -> Result<(ObjectType, u64, usize), String> {
    let nul = envelope
        .find_byte(0)
        .ok_or_else(|| "no NUL in envelope header".to_string())?;
    let header = &envelope[..nul];
    let space = header
        .find_byte(b' ')
        .ok_or_else(|| "no space in envelope header".to_string())?;
    let kind = ObjectType::from_bytes_name(&header[..space]).map_err(|e| e.to_string())?;
    let size = header[space + 1..]
        .to_str()
        .map_err(|_| "size is not UTF-8".to_string())?
        .parse::<u64>()
        .map_err(|_| "size is not a number".to_string())?;
    Ok((kind, size, nul + 1))
}

/// `read_dir` that treats a missing directory as empty.
fn read_dir_or_empty(
    path: &Path,
) -> Result<Box<dyn Iterator<Item = std::io::Result<std::fs::DirEntry>>>, VcsError> {
    match std::fs::read_dir(path) {
        Ok(iter) => Ok(Box::new(iter)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
        Err(err) => Err(VcsError::IO(err)),
    }
}
