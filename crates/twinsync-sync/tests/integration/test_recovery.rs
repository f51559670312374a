//! Crash recovery through the done-task journal

use std::io::Write;

use twinsync_core::domain::{
    ActionKind, DoneTask, ItemKind, PathTask, RelocateTask, SyncMode, Task, TaskItem,
};
use twinsync_core::ports::{ILocalFileOps, IRemoteFileOps};
use twinsync_sync::engine::{LocationStatus, SkipReason};
use twinsync_sync::filesystem::LocalFileSystemAdapter;
use twinsync_sync::journal::DoneTaskJournal;
use twinsync_sync::tree_store::TreeStore;

use crate::common::{harness, Harness};

/// Renames `a.txt` to `c.txt` on both sides as a crashed cycle would have,
/// and returns the journal record it left behind
async fn crashed_rename(h: &Harness) -> DoneTask {
    let remote_entry = h.remote.file("a.txt").unwrap();
    std::fs::rename(h.local_path("a.txt"), h.local_path("c.txt")).unwrap();
    let local = LocalFileSystemAdapter::new()
        .stat(&h.local_path("c.txt"))
        .await
        .unwrap()
        .unwrap();
    h.remote
        .rename(&remote_entry.identity, ItemKind::File, "c.txt")
        .await
        .unwrap();

    let task = RelocateTask::new("a.txt", "c.txt", TaskItem::File(remote_entry))
        .with_origin(local.identity);
    DoneTask::new(h.id(), Task::RenameInRemote(task), None)
}

fn journal(h: &Harness) -> DoneTaskJournal {
    DoneTaskJournal::for_location(&h.data_dir, &h.id())
}

#[tokio::test]
async fn test_journal_replay_schedules_no_redundant_tasks() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"payload", 100_000);
    h.cycle().await;
    let uploads = h.remote.uploads();

    let done = crashed_rename(&h).await;
    journal(&h).append(&done).await.unwrap();

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.total_done(), 0);
    assert_eq!(h.remote.uploads(), uploads);
    assert!(h.remote.contains("c.txt"));
    assert!(journal(&h).load().await.unwrap().is_empty());
    assert!(!journal(&h).path().exists());

    let saved = TreeStore::new(&h.data_dir)
        .load(&h.id(), SyncMode::TwoWay)
        .await
        .unwrap();
    assert!(saved.local.contains("c.txt") && !saved.local.contains("a.txt"));
    assert!(saved.remote.contains("c.txt") && !saved.remote.contains("a.txt"));
}

#[tokio::test]
async fn test_torn_tail_and_short_lines_are_skipped() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"payload", 100_000);
    h.cycle().await;

    let done = crashed_rename(&h).await;
    let path = journal(&h).path().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", serde_json::to_string(&done).unwrap()).unwrap();
    writeln!(file, "{{}}").unwrap();
    write!(file, "{{\"location\":\"{}\",\"ta", h.id()).unwrap();
    drop(file);

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.total_done(), 0);
    assert!(!h.engine.issues().has_critical().await.unwrap());
}

#[tokio::test]
async fn test_corrupt_journal_blocks_sync_until_cleared() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"payload", 100_000);
    h.cycle().await;

    let done = crashed_rename(&h).await;
    let path = journal(&h).path().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        format!(
            "this is not a record\n{}\n",
            serde_json::to_string(&done).unwrap()
        ),
    )
    .unwrap();

    let report = h.cycle().await;
    assert!(matches!(report.status, LocationStatus::Failed(_)));
    let issues = h.engine.issues().list().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert!(issues[0].is_critical());
    assert_eq!(issues[0].location, Some(h.id()));
    assert_eq!(issues[0].path, h.root.display().to_string());

    let report = h.cycle().await;
    assert_eq!(report.status, LocationStatus::Skipped(SkipReason::CriticalIssue));

    // Operator repairs the journal and acknowledges the issue
    std::fs::write(&path, format!("{}\n", serde_json::to_string(&done).unwrap())).unwrap();
    h.engine.issues().clear().await.unwrap();
    let report = h.cycle().await;
    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.total_done(), 0);
}

#[tokio::test]
async fn test_replayed_upload_is_not_redone_in_any_pushing_mode() {
    for mode in [SyncMode::TwoWay, SyncMode::LocalToCloud, SyncMode::LocalBackup] {
        let h = harness(mode).await;
        h.write_local("a.txt", b"v1", 100_000);
        h.cycle().await;

        // Edited locally, uploaded, then the process died before saving
        h.write_local("a.txt", b"version two", 300_000);
        let local = h.local_entry("a.txt").await;
        let uploaded = h.remote.put_file("a.txt", b"version two", 300_000);
        let done = DoneTask::new(
            h.id(),
            Task::UploadToRemote(PathTask::new("a.txt", TaskItem::File(local))),
            Some(TaskItem::File(uploaded)),
        );
        journal(&h).append(&done).await.unwrap();
        let uploads = h.remote.uploads();

        let report = h.cycle().await;

        assert_eq!(report.total_done(), 0, "{mode:?}");
        assert_eq!(h.remote.uploads(), uploads, "{mode:?}");
        let saved = TreeStore::new(&h.data_dir).load(&h.id(), mode).await.unwrap();
        assert_eq!(saved.local.files["a.txt"].last_modified, 300_000, "{mode:?}");
    }
}

#[tokio::test]
async fn test_replayed_download_is_not_redone_in_any_pulling_mode() {
    for mode in [SyncMode::TwoWay, SyncMode::CloudToLocal, SyncMode::CloudBackup] {
        let h = harness(mode).await;
        h.remote.put_file("a.txt", b"v1", 100_000);
        h.cycle().await;

        // Edited remotely, downloaded, then the process died before saving
        h.remote.edit_file("a.txt", b"version two", 300_000);
        h.write_local("a.txt", b"version two", 300_000);
        let remote = h.remote.file("a.txt").unwrap();
        let local = h.local_entry("a.txt").await;
        let done = DoneTask::new(
            h.id(),
            Task::DownloadFromRemote(PathTask::new("a.txt", TaskItem::File(remote))),
            Some(TaskItem::File(local)),
        );
        journal(&h).append(&done).await.unwrap();
        let downloads = h.remote.downloads();

        let report = h.cycle().await;

        assert_eq!(report.total_done(), 0, "{mode:?}");
        assert_eq!(h.remote.downloads(), downloads, "{mode:?}");
        let saved = TreeStore::new(&h.data_dir).load(&h.id(), mode).await.unwrap();
        assert_eq!(saved.remote.files["a.txt"].last_modified, 300_000, "{mode:?}");
    }
}

#[tokio::test]
async fn test_replayed_remote_delete_is_not_redone() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"payload", 100_000);
    h.write_local("b.txt", b"payload", 100_000);
    h.cycle().await;

    std::fs::remove_file(h.local_path("a.txt")).unwrap();
    let trashed = h.remote.file("a.txt").unwrap();
    h.remote.remove("a.txt");
    let done = DoneTask::new(
        h.id(),
        Task::DeleteInRemote(PathTask::new("a.txt", TaskItem::File(trashed))),
        None,
    );
    journal(&h).append(&done).await.unwrap();

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.total_done(), 0);
    assert!(h.remote.contains("b.txt"));
    let saved = TreeStore::new(&h.data_dir)
        .load(&h.id(), SyncMode::TwoWay)
        .await
        .unwrap();
    assert!(!saved.local.contains("a.txt") && !saved.remote.contains("a.txt"));
}

#[tokio::test]
async fn test_replayed_local_move_is_not_redone() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("x/a.txt", b"payload", 100_000);
    h.write_local("y/keep.txt", b"keep", 100_000);
    h.cycle().await;

    // Moved remotely by another client, mirrored locally, then the crash
    let remote = h.remote.file("x/a.txt").unwrap();
    h.remote.move_to("x/a.txt", "y");
    let local = h.local_entry("x/a.txt").await;
    std::fs::rename(h.local_path("x/a.txt"), h.local_path("y/a.txt")).unwrap();
    let task = RelocateTask::new("x/a.txt", "y/a.txt", TaskItem::File(local))
        .with_origin(remote.identity);
    journal(&h)
        .append(&DoneTask::new(h.id(), Task::MoveInLocal(task), None))
        .await
        .unwrap();

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.total_done(), 0);
    assert!(h.local_path("y/a.txt").exists());
    assert!(!h.local_path("x/a.txt").exists());
    assert!(h.remote.contains("y/a.txt"));
}

#[tokio::test]
async fn test_locked_source_is_rescanned_and_retried_next_cycle() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"first", 100_000);
    h.write_local("b.txt", b"second", 100_000);
    h.remote.lock_uploads(1);

    let report = h.cycle().await;
    assert_eq!(report.status, LocationStatus::Synced);
    assert_eq!(report.abandoned, 1);
    assert!(report.resync);
    assert_eq!(report.done_count(ActionKind::UploadToRemote), 1);
    assert!(!h.engine.issues().has_critical().await.unwrap());

    // The abandoned upload is planned again from a fresh scan
    let report = h.cycle().await;
    assert_eq!(report.abandoned, 0);
    assert!(!report.resync);
    assert_eq!(report.done, vec![(ActionKind::UploadToRemote, 1)]);
    assert!(h.remote.contains("a.txt"));
    assert!(h.remote.contains("b.txt"));

    assert_eq!(h.cycle().await.total_done(), 0);
}
