//! The Tree object lists the file versions that make up one commit. Each
//! entry pairs a mode and a workspace-relative name with the hash of the
//! blob (or nested tree) holding the content. Entries are sorted ascending
//! by name bytes, so two indexes with the same contents serialize to the
//! same tree hash regardless of insertion order.

use std::cmp::Ordering;
use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::VcsError;
use crate::hash::{HASH_SIZE, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// Entry mode bits, stored as the ASCII octal token of the wire format.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeItemMode {
    /// Regular file (`100644`), the only mode the commit engine emits.
    Blob,
    /// Executable file (`100755`), accepted on read for foreign trees.
    BlobExecutable,
    /// Nested tree (`40000`), accepted on read for hierarchical trees.
    Tree,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            TreeItemMode::Blob => "100644",
            TreeItemMode::BlobExecutable => "100755",
            TreeItemMode::Tree => "40000",
        };
        write!(f, "{mode}")
    }
}

impl TreeItemMode {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Tree => b"40000",
        }
    }

    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, VcsError> {
        match mode {
            b"100644" | b"644" => Ok(TreeItemMode::Blob),
            b"100755" | b"755" => Ok(TreeItemMode::BlobExecutable),
            b"40000" | b"040000" => Ok(TreeItemMode::Tree),
            _ => Err(VcsError::InvalidObject(format!(
                "`{}` is not a valid tree item mode",
                String::from_utf8_lossy(mode)
            ))),
        }
    }

    /// Numeric mode bits for the index fingerprint.
    pub fn mode_bits(self) -> u32 {
        match self {
            TreeItemMode::Blob => 0o100644,
            TreeItemMode::BlobExecutable => 0o100755,
            TreeItemMode::Tree => 0o040000,
        }
    }
}

/// One `(mode, name, hash)` record of a tree payload.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Wire form: `mode SP name NUL hash-bytes`.
    pub fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.mode.to_bytes());
        data.extend_from_slice(b" ");
        data.extend_from_slice(self.name.as_bytes());
        data.extend_from_slice(b"\x00");
        data.extend_from_slice(self.id.as_ref());
        data
    }
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.mode, self.id, self.name)
    }
}

/// A full directory listing under the envelope prefix `tree <size>\0`.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Type: Tree")?;
        for item in &self.tree_items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from items, sorting by name bytes and rejecting
    /// duplicates and empty listings.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, VcsError> {
        if tree_items.is_empty() {
            return Err(VcsError::InvalidObject(
                "tree must contain at least one entry".to_string(),
            ));
        }
        tree_items.sort_by(|a, b| compare_names(&a.name, &b.name));
        for pair in tree_items.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(VcsError::InvalidObject(format!(
                    "duplicate tree entry `{}`",
                    pair[0].name
                )));
            }
        }

        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// Look up an entry by exact name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

/// Strict byte ordering, not locale ordering.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, VcsError>
    where
        Self: Sized,
    {
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let mode_end = rest
                .find_byte(b' ')
                .ok_or(VcsError::InvalidObject("tree entry without mode".to_string()))?;
            let mode = TreeItemMode::from_bytes(&rest[..mode_end])?;

            let name_end = rest[mode_end + 1..]
                .find_byte(b'\x00')
                .ok_or(VcsError::InvalidObject("tree entry without name".to_string()))?
                + mode_end
                + 1;
            let name = rest[mode_end + 1..name_end]
                .to_str()
                .map_err(|_| VcsError::InvalidObject("tree entry name is not UTF-8".to_string()))?
                .to_string();

            let hash_end = name_end + 1 + HASH_SIZE;
            if rest.len() < hash_end {
                return Err(VcsError::InvalidObject(
                    "tree entry truncated before hash".to_string(),
                ));
            }
            let id = ObjectHash::from_bytes(&rest[name_end + 1..hash_end])
                .map_err(VcsError::InvalidObject)?;

            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[hash_end..];
        }

        if tree_items.is_empty() {
            return Err(VcsError::InvalidObject("tree has no entries".to_string()));
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items.iter().map(|i| i.to_data().len()).sum()
    }

    fn to_data(&self) -> Result<Vec<u8>, VcsError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend_from_slice(&item.to_data());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, content: &[u8]) -> TreeItem {
        TreeItem::new(
            TreeItemMode::Blob,
            ObjectHash::from_type_and_data(ObjectType::Blob, content),
            name.to_string(),
        )
    }

    /// Tree hashes must not depend on insertion order.
    #[test]
    fn test_deterministic_hash() {
        let a = Tree::from_tree_items(vec![item("a.txt", b"a"), item("b.txt", b"b")]).unwrap();
        let b = Tree::from_tree_items(vec![item("b.txt", b"b"), item("a.txt", b"a")]).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.tree_items[0].name, "a.txt");
    }

    /// Parse must invert serialization.
    #[test]
    fn test_round_trip() {
        let tree = Tree::from_tree_items(vec![
            item("maps/level 01.umap", b"level"),
            item("textures/ground.png", b"png"),
        ])
        .unwrap();
        let data = tree.to_data().unwrap();
        let parsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(parsed.tree_items, tree.tree_items);
    }

    /// Names sort by raw bytes, not locale.
    #[test]
    fn test_byte_ordering() {
        let tree =
            Tree::from_tree_items(vec![item("Z.txt", b"z"), item("a.txt", b"a")]).unwrap();
        // 'Z' (0x5a) sorts before 'a' (0x61).
        assert_eq!(tree.tree_items[0].name, "Z.txt");
    }

    /// Unicode names survive the NUL-delimited encoding.
    #[test]
    fn test_unicode_names() {
        let tree = Tree::from_tree_items(vec![item("地形.mesh", b"m"), item("sky.png", b"s")])
            .unwrap();
        let parsed = Tree::from_bytes(&tree.to_data().unwrap(), tree.id).unwrap();
        assert!(parsed.find("地形.mesh").is_some());
    }

    /// Duplicate names are a structural error.
    #[test]
    fn test_duplicate_names_rejected() {
        let result = Tree::from_tree_items(vec![item("a.txt", b"1"), item("a.txt", b"2")]);
        assert!(result.is_err());
    }

    /// Empty trees are rejected; commits always carry at least one entry.
    #[test]
    fn test_empty_rejected() {
        assert!(Tree::from_tree_items(Vec::new()).is_err());
    }

    /// Truncated payloads surface as InvalidObject, not panics.
    #[test]
    fn test_truncated_payload() {
        let tree = Tree::from_tree_items(vec![item("a.txt", b"a")]).unwrap();
        let data = tree.to_data().unwrap();
        assert!(Tree::from_bytes(&data[..data.len() - 5], tree.id).is_err());
    }
}
