//! End-to-end convergence through the full pipeline

use twinsync_core::domain::{ActionKind, SyncMode};
use twinsync_sync::engine::LocationStatus;
use twinsync_sync::filesystem::TRASH_DIR_NAME;
use twinsync_sync::tree_store::TreeStore;

use crate::common::{harness, set_mtime};

#[tokio::test]
async fn test_first_cycle_uploads_folders_before_files() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("docs/notes/todo.txt", b"buy milk", 100_000);
    h.write_local("top.txt", b"top", 100_000);

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.done_count(ActionKind::UploadToRemote), 4);
    assert!(h.remote.contains("docs"));
    assert!(h.remote.contains("docs/notes"));
    assert_eq!(h.remote.file("docs/notes/todo.txt").unwrap().size, 8);
    assert!(h.remote.contains("top.txt"));

    let again = h.cycle().await;
    assert_eq!(again.total_done(), 0);
}

#[tokio::test]
async fn test_folder_rename_schedules_single_remote_rename() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a/f.txt", b"0123456789", 100_000);
    h.cycle().await;
    let uploads = h.remote.uploads();
    let file_identity = h.remote.file("a/f.txt").unwrap().identity;

    std::fs::rename(h.local_path("a"), h.local_path("b")).unwrap();
    let report = h.cycle().await;

    assert_eq!(report.done, vec![(ActionKind::RenameInRemote, 1)]);
    assert_eq!(h.remote.uploads(), uploads);
    assert!(!h.remote.contains("a"));
    assert!(!h.remote.contains("a/f.txt"));
    assert_eq!(h.remote.file("b/f.txt").unwrap().identity, file_identity);

    // The saved baseline has the descendant under its new path on both sides.
    let saved = TreeStore::new(&h.data_dir)
        .load(&h.id(), SyncMode::TwoWay)
        .await
        .unwrap();
    for tree in [&saved.local, &saved.remote] {
        assert!(!tree.contains("a/f.txt"));
        assert_eq!(tree.files["b/f.txt"].size, 10);
        tree.check_invariant().unwrap();
    }
    assert_eq!(saved.remote.files["b/f.txt"].identity, file_identity);

    assert_eq!(h.cycle().await.total_done(), 0);
}

#[tokio::test]
async fn test_newer_side_wins_and_ties_do_nothing() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("x.txt", b"v1", 100_000);
    h.cycle().await;

    // Local edit is newer
    h.write_local("x.txt", b"local v2", 300_000);
    h.remote.edit_file("x.txt", b"remote v2", 200_000);
    let report = h.cycle().await;
    assert_eq!(report.done, vec![(ActionKind::UploadToRemote, 1)]);
    assert_eq!(h.remote.file("x.txt").unwrap().last_modified, 300_000);

    // Remote edit is newer
    h.write_local("x.txt", b"local v3", 400_000);
    h.remote.edit_file("x.txt", b"remote v3", 500_000);
    let report = h.cycle().await;
    assert_eq!(report.done, vec![(ActionKind::DownloadFromRemote, 1)]);
    assert_eq!(std::fs::read(h.local_path("x.txt")).unwrap(), b"remote v3");

    // Same timestamp on both sides
    h.write_local("x.txt", b"local v4", 600_000);
    h.remote.edit_file("x.txt", b"remote v4", 600_000);
    let report = h.cycle().await;
    assert_eq!(report.total_done(), 0);
    assert_eq!(std::fs::read(h.local_path("x.txt")).unwrap(), b"local v4");
}

#[tokio::test]
async fn test_cloud_to_local_never_uploads() {
    let h = harness(SyncMode::CloudToLocal).await;
    h.write_local("mine.txt", b"local only", 100_000);
    h.remote.put_file("shared/theirs.txt", b"from remote", 150_000);

    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::UploadToRemote), 0);
    assert_eq!(report.done_count(ActionKind::DownloadFromRemote), 2);
    assert_eq!(
        std::fs::read(h.local_path("shared/theirs.txt")).unwrap(),
        b"from remote"
    );
    assert!(!h.remote.contains("mine.txt"));

    set_mtime(&h.local_path("mine.txt"), 200_000);
    assert_eq!(h.cycle().await.total_done(), 0);
    assert!(!h.remote.contains("mine.txt"));
}

#[tokio::test]
async fn test_remote_delete_is_mirrored_to_local_trash() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("old.txt", b"stale", 100_000);
    h.write_local("keep.txt", b"fresh", 100_000);
    h.cycle().await;

    h.remote.remove("old.txt");
    let report = h.cycle().await;

    assert_eq!(report.done, vec![(ActionKind::DeleteInLocal, 1)]);
    assert!(!h.local_path("old.txt").exists());
    assert!(h.local_path("keep.txt").exists());
    assert!(h.root.join(TRASH_DIR_NAME).join("old.txt").exists());
    assert_eq!(h.cycle().await.total_done(), 0);
}

#[tokio::test]
async fn test_local_delete_loses_to_remote_edit() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("report.txt", b"draft", 100_000);
    h.cycle().await;

    std::fs::remove_file(h.local_path("report.txt")).unwrap();
    h.remote.edit_file("report.txt", b"final", 200_000);
    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::DeleteInRemote), 0);
    assert_eq!(report.done_count(ActionKind::DownloadFromRemote), 1);
    assert_eq!(std::fs::read(h.local_path("report.txt")).unwrap(), b"final");
}

#[tokio::test]
async fn test_ignored_paths_resurface_once_unignored() {
    let h = harness(SyncMode::TwoWay).await;
    h.settings.set_ignore_text(&h.id(), "*.log\n").await.unwrap();
    h.write_local("debug.log", b"noise", 100_000);
    h.write_local("data.txt", b"signal", 100_000);

    let report = h.cycle().await;
    assert_eq!(report.done, vec![(ActionKind::UploadToRemote, 1)]);
    assert_eq!(report.ignored, 1);
    assert!(!h.remote.contains("debug.log"));

    h.settings.set_ignore_text(&h.id(), "").await.unwrap();
    let report = h.cycle().await;
    assert_eq!(report.done, vec![(ActionKind::UploadToRemote, 1)]);
    assert!(h.remote.contains("debug.log"));
}

#[tokio::test]
async fn test_selective_sync_keeps_folder_out() {
    let h = harness(SyncMode::TwoWay).await;
    h.settings
        .set_selective_sync(&h.id(), &["private".to_string()])
        .await
        .unwrap();
    h.write_local("private/secret.txt", b"shh", 100_000);
    h.write_local("public.txt", b"hello", 100_000);

    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::UploadToRemote), 1);
    assert!(!h.remote.contains("private"));
    assert!(!h.remote.contains("private/secret.txt"));
}
