//! Property tests over the canonical formats: envelope hashing, object
//! store round-trips, tree determinism, signature and index codecs.

use std::collections::BTreeMap;
use std::str::FromStr;

use quickcheck::{TestResult, quickcheck};
use rand::Rng;

use asset_vcs::{
    config::StoreConfig,
    hash::ObjectHash,
    internal::{
        index::WorkingIndex,
        object::{
            ObjectTrait,
            signature::{Signature, SignatureKind},
            tree::{Tree, TreeItem, TreeItemMode},
            types::ObjectType,
        },
    },
    storage::ObjectStore,
};

quickcheck! {
    /// hash(kind, payload) is SHA-256 of the literal envelope bytes.
    fn prop_envelope_hash(data: Vec<u8>) -> bool {
        let mut envelope = Vec::new();
        envelope.extend_from_slice(b"blob ");
        envelope.extend_from_slice(data.len().to_string().as_bytes());
        envelope.push(0);
        envelope.extend_from_slice(&data);
        ObjectHash::from_type_and_data(ObjectType::Blob, &data) == ObjectHash::new(&envelope)
    }

    /// store(x); get(x) returns exactly x, and a repeat store writes no
    /// second object.
    fn prop_store_round_trip(data: Vec<u8>) -> bool {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path().join("objects"), StoreConfig::default()).unwrap();
        let info = store.store_bytes(&data, ObjectType::Blob).unwrap();
        let again = store.store_bytes(&data, ObjectType::Blob).unwrap();
        let payload = store.get(&info.hash, ObjectType::Blob).unwrap();
        payload == data
            && again.hash == info.hash
            && store.stats().unwrap().object_count == 1
    }

    /// Tree hashes are insertion-order independent.
    fn prop_tree_order_independent(names: Vec<String>) -> TestResult {
        let mut unique: Vec<String> = names
            .into_iter()
            .filter(|n| !n.is_empty() && !n.contains('\0'))
            .collect();
        unique.sort();
        unique.dedup();
        if unique.is_empty() {
            return TestResult::discard();
        }

        let items: Vec<TreeItem> = unique
            .iter()
            .map(|name| {
                TreeItem::new(
                    TreeItemMode::Blob,
                    ObjectHash::from_type_and_data(ObjectType::Blob, name.as_bytes()),
                    name.clone(),
                )
            })
            .collect();
        let mut reversed = items.clone();
        reversed.reverse();

        let a = Tree::from_tree_items(items).unwrap();
        let b = Tree::from_tree_items(reversed).unwrap();
        TestResult::from_bool(a.id == b.id)
    }

    /// Trees round-trip through their canonical payload.
    fn prop_tree_round_trip(names: Vec<String>) -> TestResult {
        let mut unique: Vec<String> = names
            .into_iter()
            .filter(|n| !n.is_empty() && !n.contains('\0'))
            .collect();
        unique.sort();
        unique.dedup();
        if unique.is_empty() {
            return TestResult::discard();
        }

        let items: Vec<TreeItem> = unique
            .iter()
            .map(|name| {
                TreeItem::new(TreeItemMode::Blob, ObjectHash::new(name.as_bytes()), name.clone())
            })
            .collect();
        let tree = Tree::from_tree_items(items).unwrap();
        let parsed = Tree::from_bytes(&tree.to_data().unwrap(), tree.id).unwrap();
        TestResult::from_bool(parsed.tree_items == tree.tree_items)
    }

    /// Signature lines round-trip when the fields are representable.
    fn prop_signature_round_trip(name: String, id: String, ts: i64) -> TestResult {
        if name.contains(['<', '>', '\n']) || name.starts_with(' ') || name.ends_with(' ') {
            return TestResult::discard();
        }
        if name.is_empty() || id.is_empty() || id.contains(['<', '>', ' ', '\n']) {
            return TestResult::discard();
        }
        let sig = Signature::new(SignatureKind::Author, &name, &id, ts);
        match Signature::from_data(sig.to_data().unwrap()) {
            Ok(parsed) => TestResult::from_bool(parsed == sig),
            Err(_) => TestResult::failed(),
        }
    }

    /// Hex display of a hash parses back to the same value.
    fn prop_hash_hex_round_trip(data: Vec<u8>) -> bool {
        let hash = ObjectHash::new(&data);
        ObjectHash::from_str(&hash.to_string()) == Ok(hash)
    }
}

/// The index file format round-trips entries created from real files.
#[test]
fn index_round_trip_with_many_entries() {
    let dir = tempfile::tempdir().unwrap();
    let index_file = dir.path().join("index");
    let mut index = WorkingIndex::new(dir.path(), &index_file);

    for i in 0..50 {
        let path = format!("assets/batch {i:02}/mesh_{i}.fbx");
        let full = dir.path().join(&path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, format!("mesh payload {i}")).unwrap();
        index
            .update_entry(&path, ObjectHash::new(path.as_bytes()))
            .unwrap();
    }
    index.save().unwrap();

    let loaded = WorkingIndex::load_or_default(dir.path(), &index_file).unwrap();
    assert_eq!(loaded.len(), 50);
    for entry in loaded.entries() {
        assert_eq!(entry.hash, ObjectHash::new(entry.path.as_bytes()));
        assert!(entry.staged);
        assert!(!loaded.needs_update(&entry.path).unwrap());
    }
}

/// A multi-megabyte random asset survives the compressed round-trip and
/// dedups against itself.
#[test]
fn random_large_blob_round_trip() {
    let mut data = vec![0u8; 3 * 1024 * 1024];
    rand::rng().fill_bytes(&mut data);

    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::open(dir.path().join("objects"), StoreConfig::default()).unwrap();
    let info = store.store_bytes(&data, ObjectType::Blob).unwrap();
    assert_eq!(info.size, data.len() as u64);

    let payload = store.get(&info.hash, ObjectType::Blob).unwrap();
    assert_eq!(payload, data);

    store.store_bytes(&data, ObjectType::Blob).unwrap();
    assert_eq!(store.stats().unwrap().object_count, 1);
}

/// Commits round-trip with metadata maps of arbitrary shape.
#[test]
fn commit_metadata_round_trip() {
    use asset_vcs::internal::object::commit::Commit;

    let mut metadata = BTreeMap::new();
    metadata.insert("build".to_string(), "2024.08.01".to_string());
    metadata.insert("perforce-migration".to_string(), "cl 181212".to_string());

    let commit = Commit::new(
        Signature::new(SignatureKind::Author, "Jane Doe", "u-1138", 1712345678),
        Signature::new(SignatureKind::Committer, "Jane Doe", "u-1138", 1712345678),
        ObjectHash::new(b"tree"),
        vec![ObjectHash::new(b"parent")],
        "proj-7",
        "main",
        metadata.clone(),
        "imported from legacy depot",
    )
    .unwrap();

    let parsed = Commit::from_bytes(&commit.to_data().unwrap(), commit.id).unwrap();
    assert_eq!(parsed.metadata, metadata);
    assert_eq!(parsed.object_hash().unwrap(), commit.id);
}
