//! The Commit object records one published state of a project's assets: the
//! tree it snapshots, the parent commits it extends, who made it and when,
//! which project and branch it belongs to, and a free-form metadata map for
//! pipeline annotations (build numbers, review ids).
//!
//! Canonical payload is a text header block, one field per line in a fixed
//! order (`tree`, `parent`*, `author`, `committer`, `project`, `branch`,
//! metadata), then a blank line and the message. The header order is part of
//! the hash, so serialization is deterministic.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::VcsError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// A history node. `parent_commit_ids` is ordered; the first parent is the
/// merge base used by history traversal.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub project: String,
    pub branch: String,
    /// Free-form annotations; a BTreeMap keeps serialization (and therefore
    /// the hash) independent of insertion order.
    pub metadata: BTreeMap<String, String>,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "project {} branch {}", self.project, self.branch)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        project: &str,
        branch: &str,
        metadata: BTreeMap<String, String>,
        message: &str,
    ) -> Result<Commit, VcsError> {
        if message.trim().is_empty() {
            return Err(VcsError::InvalidArgument(
                "commit message must not be empty".to_string(),
            ));
        }
        for (key, value) in &metadata {
            if key.is_empty()
                || key.contains([' ', '\n'])
                || RESERVED_FIELDS.contains(&key.as_str())
            {
                return Err(VcsError::InvalidArgument(format!(
                    "invalid metadata key `{key}`"
                )));
            }
            if value.contains('\n') {
                return Err(VcsError::InvalidArgument(format!(
                    "metadata value for `{key}` must be a single line"
                )));
            }
        }
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            project: project.to_string(),
            branch: branch.to_string(),
            metadata,
            message: message.to_string(),
        };
        commit.id = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data()?);
        Ok(commit)
    }

    /// First line of the message, for log listings.
    pub fn summary(&self) -> &str {
        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or(&self.message)
    }

    /// First parent, if any; the traversal spine of `list_commits`.
    pub fn first_parent(&self) -> Option<ObjectHash> {
        self.parent_commit_ids.first().copied()
    }
}

/// Header field names are single tokens; anything not recognized before the
/// blank line is treated as a metadata pair. Metadata keys may not shadow
/// the reserved fields.
const FIELD_TREE: &str = "tree";
const FIELD_PARENT: &str = "parent";
const FIELD_AUTHOR: &str = "author";
const FIELD_COMMITTER: &str = "committer";
const FIELD_PROJECT: &str = "project";
const FIELD_BRANCH: &str = "branch";
const RESERVED_FIELDS: [&str; 6] = [
    FIELD_TREE,
    FIELD_PARENT,
    FIELD_AUTHOR,
    FIELD_COMMITTER,
    FIELD_PROJECT,
    FIELD_BRANCH,
];

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, VcsError>
    where
        Self: Sized,
    {
        let invalid = |msg: String| VcsError::InvalidObject(format!("invalid commit: {msg}"));

        let blank = data
            .find(b"\n\n")
            .ok_or_else(|| invalid("no blank line before message".to_string()))?;
        let header = &data[..blank];
        let message = data[blank + 2..]
            .to_str()
            .map_err(|_| invalid("message is not UTF-8".to_string()))?
            .to_string();

        let mut tree_id = None;
        let mut parent_commit_ids = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut project = None;
        let mut branch = None;
        let mut metadata = BTreeMap::new();

        for line in header.lines() {
            let line_str = line
                .to_str()
                .map_err(|_| invalid("header line is not UTF-8".to_string()))?;
            let (field, value) = line_str
                .split_once(' ')
                .ok_or_else(|| invalid(format!("malformed header line `{line_str}`")))?;
            match field {
                FIELD_TREE => {
                    tree_id = Some(ObjectHash::from_str(value).map_err(invalid)?);
                }
                FIELD_PARENT => {
                    parent_commit_ids.push(ObjectHash::from_str(value).map_err(invalid)?);
                }
                FIELD_AUTHOR => {
                    author = Some(Signature::from_data(line.to_vec())?);
                }
                FIELD_COMMITTER => {
                    committer = Some(Signature::from_data(line.to_vec())?);
                }
                FIELD_PROJECT => {
                    project = Some(value.to_string());
                }
                FIELD_BRANCH => {
                    branch = Some(value.to_string());
                }
                key => {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Commit {
            id: hash,
            tree_id: tree_id.ok_or_else(|| invalid("missing tree".to_string()))?,
            parent_commit_ids,
            author: author.ok_or_else(|| invalid("missing author".to_string()))?,
            committer: committer.ok_or_else(|| invalid("missing committer".to_string()))?,
            project: project.ok_or_else(|| invalid("missing project".to_string()))?,
            branch: branch.ok_or_else(|| invalid("missing branch".to_string()))?,
            metadata,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        self.message.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, VcsError> {
        let mut data = Vec::new();

        data.extend_from_slice(b"tree ");
        data.extend_from_slice(self.tree_id.to_string().as_bytes());
        data.push(b'\n');

        for parent in &self.parent_commit_ids {
            data.extend_from_slice(b"parent ");
            data.extend_from_slice(parent.to_string().as_bytes());
            data.push(b'\n');
        }

        data.extend_from_slice(&self.author.to_data()?);
        data.push(b'\n');
        data.extend_from_slice(&self.committer.to_data()?);
        data.push(b'\n');

        data.extend_from_slice(b"project ");
        data.extend_from_slice(self.project.as_bytes());
        data.push(b'\n');
        data.extend_from_slice(b"branch ");
        data.extend_from_slice(self.branch.as_bytes());
        data.push(b'\n');

        for (key, value) in &self.metadata {
            data.extend_from_slice(key.as_bytes());
            data.push(b' ');
            data.extend_from_slice(value.as_bytes());
            data.push(b'\n');
        }

        data.push(b'\n');
        data.extend_from_slice(self.message.as_bytes());

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::signature::SignatureKind;

    fn signature(kind: SignatureKind) -> Signature {
        Signature::new(kind, "Jane Doe", "u-1138", 1712345678)
    }

    fn basic_commit() -> Commit {
        Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![],
            "proj-7",
            "main",
            BTreeMap::new(),
            "init",
        )
        .unwrap()
    }

    /// A root commit round-trips through its canonical payload.
    #[test]
    fn test_root_commit_round_trip() {
        let commit = basic_commit();
        let data = commit.to_data().unwrap();
        let parsed = Commit::from_bytes(&data, commit.id).unwrap();
        assert_eq!(parsed.tree_id, commit.tree_id);
        assert!(parsed.parent_commit_ids.is_empty());
        assert_eq!(parsed.project, "proj-7");
        assert_eq!(parsed.branch, "main");
        assert_eq!(parsed.message, "init");
        assert_eq!(parsed.object_hash().unwrap(), commit.id);
    }

    /// Multi-parent commits keep parent order; the first is the merge base.
    #[test]
    fn test_multi_parent_order() {
        let p1 = ObjectHash::new(b"p1");
        let p2 = ObjectHash::new(b"p2");
        let commit = Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![p1, p2],
            "proj-7",
            "main",
            BTreeMap::new(),
            "merge",
        )
        .unwrap();
        let parsed = Commit::from_bytes(&commit.to_data().unwrap(), commit.id).unwrap();
        assert_eq!(parsed.parent_commit_ids, vec![p1, p2]);
        assert_eq!(parsed.first_parent(), Some(p1));
    }

    /// Metadata lines parse back as a map and hash deterministically.
    #[test]
    fn test_metadata_round_trip() {
        let mut metadata = BTreeMap::new();
        metadata.insert("build".to_string(), "1932".to_string());
        metadata.insert("review".to_string(), "cr-88".to_string());
        let commit = Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![],
            "proj-7",
            "main",
            metadata.clone(),
            "tagged build",
        )
        .unwrap();
        let parsed = Commit::from_bytes(&commit.to_data().unwrap(), commit.id).unwrap();
        assert_eq!(parsed.metadata, metadata);
    }

    /// Empty messages are rejected at construction.
    #[test]
    fn test_empty_message_rejected() {
        let result = Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![],
            "proj-7",
            "main",
            BTreeMap::new(),
            "  \n",
        );
        assert!(result.is_err());
    }

    /// Metadata keys shadowing reserved header fields are rejected.
    #[test]
    fn test_reserved_metadata_key_rejected() {
        let mut metadata = BTreeMap::new();
        metadata.insert("parent".to_string(), "sneaky".to_string());
        let result = Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![],
            "proj-7",
            "main",
            metadata,
            "msg",
        );
        assert!(result.is_err());
    }

    /// Messages keep embedded newlines intact.
    #[test]
    fn test_multiline_message() {
        let commit = Commit::new(
            signature(SignatureKind::Author),
            signature(SignatureKind::Committer),
            ObjectHash::new(b"tree"),
            vec![],
            "proj-7",
            "main",
            BTreeMap::new(),
            "retopo cave mesh\n\ndropped LOD3, it never rendered",
        )
        .unwrap();
        let parsed = Commit::from_bytes(&commit.to_data().unwrap(), commit.id).unwrap();
        assert_eq!(parsed.summary(), "retopo cave mesh");
        assert!(parsed.message.contains("LOD3"));
    }

    /// A payload without a tree field is invalid.
    #[test]
    fn test_missing_tree_rejected() {
        let data = b"author Jane <u1> 1 +0000\ncommitter Jane <u1> 1 +0000\nproject p\nbranch main\n\nmsg";
        assert!(Commit::from_bytes(data, ObjectHash::default()).is_err());
    }
}
