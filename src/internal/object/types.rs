//! Object kind enumeration shared by the store, the commit engine and the
//! sync protocol.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::VcsError;

/// The three content-addressed object kinds.
///
/// * `Blob`: opaque bytes of a file's content.
/// * `Tree`: ordered directory listing of `(mode, name, hash)` entries.
/// * `Commit`: a history node referencing one tree and zero or more parents.
/// * `Tag`: a named, immutable pointer used by the ref store for releases.
///
/// The kind name is the first token of the canonical envelope
/// `<kind> <size>\0<payload>`, so conversions to and from the byte name are
/// part of the on-disk format.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
        }
    }
}

impl ObjectType {
    /// The kind name as envelope header bytes.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
        }
    }

    /// Parses a string representation of an object kind.
    pub fn from_string(s: &str) -> Result<ObjectType, VcsError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(VcsError::InvalidObject(format!(
                "`{s}` is not a valid object kind"
            ))),
        }
    }

    /// Parses the kind token of an envelope header.
    pub fn from_bytes_name(name: &[u8]) -> Result<ObjectType, VcsError> {
        match name {
            BLOB_OBJECT_TYPE => Ok(ObjectType::Blob),
            TREE_OBJECT_TYPE => Ok(ObjectType::Tree),
            COMMIT_OBJECT_TYPE => Ok(ObjectType::Commit),
            TAG_OBJECT_TYPE => Ok(ObjectType::Tag),
            _ => Err(VcsError::InvalidObject(format!(
                "`{}` is not a valid object kind",
                String::from_utf8_lossy(name)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Kind names must round-trip through both string and byte forms.
    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ObjectType::Blob,
            ObjectType::Tree,
            ObjectType::Commit,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_string(&kind.to_string()).unwrap(), kind);
            assert_eq!(ObjectType::from_bytes_name(kind.to_bytes()).unwrap(), kind);
        }
    }

    /// Unknown kind names are rejected.
    #[test]
    fn test_unknown_kind() {
        assert!(ObjectType::from_string("packfile").is_err());
        assert!(ObjectType::from_bytes_name(b"snapshot").is_err());
    }
}
