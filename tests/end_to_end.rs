//! Integration tests that drive the full add/commit/sync/lock flow across a
//! client workspace and an in-process sync server, covering the scenario
//! values the engine guarantees (stable blob hashes, stat-cache skips, lock
//! conflicts, non-fast-forward pushes, probe-driven uploads, and corruption
//! detection).

use std::path::Path;
use std::sync::Arc;

use asset_vcs::{
    config::{ClientConfig, SessionConfig, SyncConfig},
    coordination::{events::NullSink, lock::LockManager, session::SessionManager},
    errors::VcsError,
    hash::ObjectHash,
    internal::object::types::ObjectType,
    protocol::sync::{RemoteSync, SyncServer},
    workspace::{
        Workspace,
        driver::{ClientDriver, ClientIdentity, exit_code},
    },
};
use asset_vcs::config::LockConfig;

struct Rig {
    _server_dir: tempfile::TempDir,
    server: SyncServer,
    sessions: Arc<SessionManager>,
    locks: LockManager,
}

fn rig() -> Rig {
    let server_dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionManager::new(
        SessionConfig::default(),
        Arc::new(NullSink),
    ));
    let locks = LockManager::new(LockConfig::default(), sessions.clone(), Arc::new(NullSink));
    let server = SyncServer::new(server_dir.path().join("data"), sessions.clone());
    Rig {
        _server_dir: server_dir,
        server,
        sessions,
        locks,
    }
}

fn client(rig: &Rig, dir: &Path, project: &str, user_id: &str, user_name: &str) -> ClientDriver {
    let session = rig.sessions.start(user_id, user_name, project);
    let workspace = Workspace::init(dir, project).unwrap();
    ClientDriver::new(
        workspace,
        ClientIdentity {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            session_id: session.id,
        },
        ClientConfig::default(),
        SyncConfig::default(),
    )
    .unwrap()
}

fn write_file(root: &Path, path: &str, content: &[u8]) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

/// Scenario 1: init and first commit. One blob with the canonical envelope
/// hash, the branch ref at the commit, and a single-entry tree.
#[test]
fn init_and_first_commit() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    let mut driver = client(&rig, dir.path(), "P", "u-1", "Jane");

    write_file(dir.path(), "a.txt", b"hello\n");
    driver.add(&["a.txt".to_string()]).unwrap();
    let result = driver.commit("init").unwrap();

    // Exactly one blob, with the canonical SHA-256 of `blob 6\0hello\n`.
    let expected_blob = ObjectHash::new(b"blob 6\x00hello\n");
    assert!(driver.workspace().store().exists(&expected_blob));

    // refs/heads/main holds the commit hash.
    assert_eq!(
        driver.workspace().refs().read_branch("main").unwrap(),
        Some(result.commit_hash)
    );

    // The tree has one (100644, a.txt, blob) entry.
    let tree = driver.workspace().store().get_tree(&result.tree_hash).unwrap();
    assert_eq!(tree.tree_items.len(), 1);
    assert_eq!(tree.tree_items[0].name, "a.txt");
    assert_eq!(tree.tree_items[0].id, expected_blob);
    assert_eq!(tree.tree_items[0].mode.mode_bits(), 0o100644);
}

/// Scenario 2: the stat cache skips unchanged files, and a touch that does
/// not change content rehashes to the same blob without a new object.
#[test]
fn stat_cache_skip() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    let mut driver = client(&rig, dir.path(), "P", "u-1", "Jane");

    write_file(dir.path(), "a.txt", b"hello\n");
    driver.add(&["a.txt".to_string()]).unwrap();
    driver.commit("init").unwrap();

    let clean = driver
        .workspace()
        .index()
        .batch_needs_update(&["a.txt"])
        .unwrap();
    assert_eq!(clean.get("a.txt"), Some(&false));

    // Touch: rewrite identical bytes, advancing mtime.
    std::thread::sleep(std::time::Duration::from_millis(20));
    write_file(dir.path(), "a.txt", b"hello\n");
    let touched = driver
        .workspace()
        .index()
        .batch_needs_update(&["a.txt"])
        .unwrap();
    assert_eq!(touched.get("a.txt"), Some(&true));

    let objects_before = driver.workspace().store().stats().unwrap().object_count;
    let report = driver.add(&["a.txt".to_string()]).unwrap();
    assert_eq!(report.added[0].1, ObjectHash::new(b"blob 6\x00hello\n"));
    let objects_after = driver.workspace().store().stats().unwrap().object_count;
    assert_eq!(objects_before, objects_after);
}

/// Scenario 3: lock conflict. B is refused while A holds, and acquires
/// after A releases.
#[test]
fn lock_conflict() {
    let rig = rig();
    let a = rig.sessions.start("u-a", "Alice", "P");
    let b = rig.sessions.start("u-b", "Ben", "P");

    rig.locks
        .acquire("P", "level.umap", "u-a", "Alice", a.id, None)
        .unwrap();
    match rig
        .locks
        .acquire("P", "level.umap", "u-b", "Ben", b.id, None)
    {
        Err(VcsError::AlreadyHeld { holder, path }) => {
            assert_eq!(holder, "Alice");
            assert_eq!(path, "level.umap");
        }
        other => panic!("expected AlreadyHeld, got {other:?}"),
    }

    rig.locks.release("P", "level.umap", "u-a", false).unwrap();
    let lock = rig
        .locks
        .acquire("P", "level.umap", "u-b", "Ben", b.id, None)
        .unwrap();
    assert_eq!(lock.user_id, "u-b");
}

/// Scenario 4: non-fast-forward push. X and Y both start at C0; X pushes
/// C1, then Y's C2 is told to pull and the remote ref stays at C1.
#[tokio::test]
async fn non_fast_forward_push() {
    let rig = rig();
    let x_dir = tempfile::tempdir().unwrap();
    let y_dir = tempfile::tempdir().unwrap();
    let mut x = client(&rig, x_dir.path(), "P", "u-x", "Xavier");
    let mut y = client(&rig, y_dir.path(), "P", "u-y", "Yann");

    // Shared base C0, created by X and pulled by Y.
    write_file(x_dir.path(), "a.txt", b"c0");
    x.add(&["a.txt".to_string()]).unwrap();
    let c0 = x.commit("c0").unwrap();
    x.push(&rig.server).await.unwrap();
    y.pull(&rig.server).await.unwrap();

    // X commits and pushes C1.
    write_file(x_dir.path(), "a.txt", b"c1");
    x.add(&["a.txt".to_string()]).unwrap();
    let c1 = x.commit("c1").unwrap();
    x.push(&rig.server).await.unwrap();

    // Y commits C2 on top of C0 and tries to push.
    write_file(y_dir.path(), "a.txt", b"c2");
    y.add(&["a.txt".to_string()]).unwrap();
    let c2 = y.commit("c2").unwrap();
    assert_eq!(
        y.workspace()
            .store()
            .get_commit(&c2.commit_hash)
            .unwrap()
            .parent_commit_ids,
        vec![c0.commit_hash]
    );

    let result = y.push(&rig.server).await;
    assert!(matches!(result, Err(VcsError::NonFastForward(_))));
    assert_eq!(exit_code(&result), 4);

    // The remote branch still points at C1.
    assert_eq!(
        rig.server.repo("P").unwrap().refs().read_branch("main").unwrap(),
        Some(c1.commit_hash)
    );
}

/// Scenario 5: the existence probe keeps known objects off the wire; a
/// batch with one known and one new hash grows the server by exactly one.
#[tokio::test]
async fn probe_saves_bandwidth() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    let mut driver = client(&rig, dir.path(), "P", "u-1", "Jane");

    write_file(dir.path(), "a.txt", b"shared asset");
    driver.add(&["a.txt".to_string()]).unwrap();
    driver.commit("seed").unwrap();
    driver.push(&rig.server).await.unwrap();

    let known = ObjectHash::from_type_and_data(ObjectType::Blob, b"shared asset");
    let fresh = ObjectHash::from_type_and_data(ObjectType::Blob, b"brand new");
    assert_eq!(
        rig.server.batch_exists("P", &[known, fresh]).await.unwrap(),
        vec![true, false]
    );

    let before = rig.server.repo("P").unwrap().store().stats().unwrap().object_count;
    let mut objects = std::collections::BTreeMap::new();
    objects.insert(
        fresh,
        asset_vcs::protocol::types::ObjectPayload {
            kind: ObjectType::Blob,
            data: b"brand new".to_vec(),
        },
    );
    let session = rig.sessions.start("u-1", "Jane", "P");
    rig.server
        .upload_objects(asset_vcs::protocol::types::UploadBatch {
            project: "P".to_string(),
            user: "u-1".to_string(),
            session: session.id,
            objects,
            file_map: Default::default(),
            deadline: None,
        })
        .await
        .unwrap();
    let after = rig.server.repo("P").unwrap().store().stats().unwrap().object_count;
    assert_eq!(after - before, 1);
}

/// Scenario 6: corruption detection. A flipped object byte fails get with
/// ObjectCorrupt, a flipped index checksum fails load with IndexCorrupt,
/// and both map to exit code 5.
#[test]
fn corruption_detection() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    let mut driver = client(&rig, dir.path(), "P", "u-1", "Jane");

    write_file(dir.path(), "a.txt", b"precious level data");
    driver.add(&["a.txt".to_string()]).unwrap();
    driver.commit("init").unwrap();

    // Flip a byte in the stored blob.
    let blob = ObjectHash::from_type_and_data(ObjectType::Blob, b"precious level data");
    let object_path = dir
        .path()
        .join(".vcs/objects")
        .join(blob.to_string()[..2].to_string())
        .join(&blob.to_string()[2..]);
    let mut bytes = std::fs::read(&object_path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x40;
    std::fs::write(&object_path, &bytes).unwrap();

    let read: Result<_, VcsError> = driver.workspace().store().get_raw(&blob);
    assert!(matches!(read, Err(VcsError::ObjectCorrupt(_, _))));
    assert_eq!(exit_code(&read), 5);

    // Flip a byte inside the index checksum field.
    let index_path = dir.path().join(".vcs/index");
    let mut index_bytes = std::fs::read(&index_path).unwrap();
    index_bytes[14] ^= 0xff;
    std::fs::write(&index_path, &index_bytes).unwrap();

    let reloaded: Result<_, VcsError> = Workspace::open(dir.path()).and_then(|ws| {
        ws.index()
            .get_entry("a.txt")
            .cloned()
            .ok_or_else(|| VcsError::NotFound("a.txt".to_string()))
    });
    // Workspace::open loads the index and must surface the corruption.
    assert!(matches!(reloaded, Err(VcsError::IndexCorrupt(_))));
    assert_eq!(exit_code(&reloaded), 5);
}

/// Two clients round-trip history through the server: push from one,
/// pull into the other, then extend and push back.
#[tokio::test]
async fn two_client_collaboration() {
    let rig = rig();
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();
    let mut a = client(&rig, a_dir.path(), "P", "u-a", "Alice");
    let mut b = client(&rig, b_dir.path(), "P", "u-b", "Ben");

    write_file(a_dir.path(), "maps/forest.umap", b"forest v1");
    write_file(a_dir.path(), "maps/cave.umap", b"cave v1");
    a.add(&["maps/forest.umap".to_string(), "maps/cave.umap".to_string()])
        .unwrap();
    a.commit("level pass").unwrap();
    a.push(&rig.server).await.unwrap();

    let pulled = b.pull(&rig.server).await.unwrap();
    assert_eq!(pulled.new_commits, 1);
    assert_eq!(pulled.files.len(), 2);

    write_file(b_dir.path(), "maps/cave.umap", b"cave v2");
    b.add(&["maps/cave.umap".to_string()]).unwrap();
    b.commit("cave rework").unwrap();
    b.push(&rig.server).await.unwrap();

    let report = a.pull(&rig.server).await.unwrap();
    assert_eq!(report.new_commits, 1);
    assert_eq!(report.files[0].path, "maps/cave.umap");
    assert_eq!(
        report.files[0].hash,
        ObjectHash::from_type_and_data(ObjectType::Blob, b"cave v2")
    );

    // Both clients and the server agree on the head.
    let head = rig.server.repo("P").unwrap().refs().read_branch("main").unwrap();
    assert_eq!(a.workspace().refs().read_branch("main").unwrap(), head);
    assert_eq!(b.workspace().refs().read_branch("main").unwrap(), head);
}

/// The sequential-push invariant: after pushing c1..cn with no concurrent
/// writer, the remote head observes the last commit.
#[tokio::test]
async fn sequential_pushes_observe_last() {
    let rig = rig();
    let dir = tempfile::tempdir().unwrap();
    let mut driver = client(&rig, dir.path(), "P", "u-1", "Jane");

    let mut last = None;
    for i in 0..5 {
        write_file(dir.path(), "a.txt", format!("rev {i}").as_bytes());
        driver.add(&["a.txt".to_string()]).unwrap();
        let commit = driver.commit(&format!("rev {i}")).unwrap();
        driver.push(&rig.server).await.unwrap();
        last = Some(commit.commit_hash);
    }
    assert_eq!(
        rig.server.repo("P").unwrap().refs().read_branch("main").unwrap(),
        last
    );
}

/// Unicode and spaced paths survive add, commit, push, and pull intact.
#[tokio::test]
async fn unicode_paths_round_trip() {
    let rig = rig();
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();
    let mut a = client(&rig, a_dir.path(), "P", "u-a", "Alice");
    let mut b = client(&rig, b_dir.path(), "P", "u-b", "Ben");

    let path = "art/地形 maps/丘 hills.mesh";
    write_file(a_dir.path(), path, b"mesh data");
    a.add(&[path.to_string()]).unwrap();
    a.commit("terrain").unwrap();
    a.push(&rig.server).await.unwrap();

    let pulled = b.pull(&rig.server).await.unwrap();
    assert_eq!(pulled.files.len(), 1);
    assert_eq!(pulled.files[0].path, path);
}
