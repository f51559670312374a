//! Engine-level behavior: cycle exclusivity, guards, limits, cadence loop

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use twinsync_core::config::ConfigBuilder;
use twinsync_core::domain::{ActionKind, SyncLocation, SyncMode};
use twinsync_core::ports::{CyclePhase, SyncEvent};
use twinsync_sync::engine::{CycleOutcome, LocationStatus, SkipReason};

use crate::common::{harness, harness_with};

#[tokio::test]
async fn test_second_trigger_while_running_is_busy() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"hello", 100_000);
    h.remote.hold_listings();

    let first = h.engine.run_cycle();
    let second = async {
        while h.remote.listings() == 0 {
            tokio::task::yield_now().await;
        }
        let outcome = h.engine.run_cycle().await.unwrap();
        h.remote.release_listings();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(second, CycleOutcome::Busy);
    match first.unwrap() {
        CycleOutcome::Completed(reports) => {
            assert_eq!(reports[0].done_count(ActionKind::UploadToRemote), 1)
        }
        CycleOutcome::Busy => panic!("first cycle must run"),
    }
    assert_eq!(h.remote.listings(), 1);
}

#[tokio::test]
async fn test_paused_location_and_global_pause_skip() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"hello", 100_000);

    let mut paused = h.location.clone();
    paused.paused = true;
    h.settings.upsert_location(paused).await.unwrap();
    assert_eq!(
        h.cycle().await.status,
        LocationStatus::Skipped(SkipReason::Paused)
    );

    h.settings.upsert_location(h.location.clone()).await.unwrap();
    h.settings.set_paused(true).await.unwrap();
    assert_eq!(
        h.cycle().await.status,
        LocationStatus::Skipped(SkipReason::GloballyPaused)
    );
    assert_eq!(h.remote.listings(), 0);

    h.settings.set_paused(false).await.unwrap();
    assert_eq!(h.cycle().await.done_count(ActionKind::UploadToRemote), 1);
}

#[tokio::test]
async fn test_offline_skips_without_listing() {
    let h = harness(SyncMode::TwoWay).await;
    h.remote.set_online(false);

    let report = h.cycle().await;

    assert_eq!(report.status, LocationStatus::Skipped(SkipReason::Offline));
    assert_eq!(h.remote.listings(), 0);
}

#[tokio::test]
async fn test_remote_root_gone_clears_binding() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"hello", 100_000);
    h.cycle().await;

    h.remote.set_root_gone(true);
    let report = h.cycle().await;
    assert_eq!(
        report.status,
        LocationStatus::Skipped(SkipReason::RemoteRootGone)
    );

    let locations = h.settings.locations().await.unwrap();
    assert!(locations[0].remote.is_none());
    assert!(!h.data_dir.join("state").join(format!("{}.json", h.id())).exists());
    assert!(!h.engine.issues().has_critical().await.unwrap());

    let report = h.cycle().await;
    assert_eq!(report.status, LocationStatus::Skipped(SkipReason::Unbound));
}

#[tokio::test]
async fn test_unusable_root_blocks_every_location() {
    let h = harness(SyncMode::TwoWay).await;
    h.write_local("a.txt", b"hello", 100_000);
    let broken = SyncLocation::new(
        h.root.with_file_name("missing"),
        h.location.remote.clone().unwrap(),
    );
    h.settings
        .save_locations(&[broken.clone(), h.location.clone()])
        .await
        .unwrap();

    let reports = match h.engine.run_cycle().await.unwrap() {
        CycleOutcome::Completed(reports) => reports,
        CycleOutcome::Busy => panic!("cycle unexpectedly busy"),
    };

    assert_eq!(reports[0].location, broken.id);
    assert_eq!(
        reports[0].status,
        LocationStatus::Skipped(SkipReason::SmokeTestFailed)
    );
    assert_eq!(
        reports[1].status,
        LocationStatus::Skipped(SkipReason::CriticalIssue)
    );
    let issues = h.engine.issues().list().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].location, Some(broken.id));

    // The halt holds for every location until the issue is cleared
    h.cycle().await;
    assert_eq!(h.remote.listings(), 0);
    h.settings.save_locations(&[h.location.clone()]).await.unwrap();
    h.engine.issues().clear_by_location(&broken.id).await.unwrap();
    assert_eq!(h.cycle().await.done_count(ActionKind::UploadToRemote), 1);
}

#[tokio::test]
async fn test_upload_concurrency_ceiling() {
    let h = harness_with(SyncMode::TwoWay, ConfigBuilder::new().max_uploads(2).max_tasks(4)).await;
    for i in 0..6 {
        h.write_local(&format!("file{i}.txt"), b"content", 100_000);
    }
    h.remote.set_delay(Duration::from_millis(30));

    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::UploadToRemote), 6);
    assert!(h.remote.uploading.peak() <= 2);
    assert!(h.remote.uploading.peak() >= 1);
}

#[tokio::test]
async fn test_download_concurrency_ceiling() {
    let h = harness_with(
        SyncMode::TwoWay,
        ConfigBuilder::new().max_downloads(2).max_tasks(4),
    )
    .await;
    for i in 0..6 {
        h.remote.put_file(&format!("file{i}.txt"), b"content", 100_000);
    }
    h.remote.set_delay(Duration::from_millis(30));

    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::DownloadFromRemote), 6);
    assert!(h.remote.downloading.peak() <= 2);
    assert!(h.remote.downloading.peak() >= 1);
    assert_eq!(std::fs::read(h.local_path("file5.txt")).unwrap(), b"content");
}

#[tokio::test]
async fn test_total_task_ceiling_covers_deletes_and_uploads() {
    let h = harness_with(
        SyncMode::TwoWay,
        ConfigBuilder::new()
            .max_uploads(2)
            .max_downloads(2)
            .max_tasks(3),
    )
    .await;
    for i in 0..6 {
        h.write_local(&format!("old{i}.txt"), b"old", 100_000);
    }
    h.cycle().await;

    for i in 0..6 {
        std::fs::remove_file(h.local_path(&format!("old{i}.txt"))).unwrap();
        h.write_local(&format!("new{i}.txt"), b"new", 200_000);
    }
    h.remote.set_delay(Duration::from_millis(30));
    let report = h.cycle().await;

    assert_eq!(report.done_count(ActionKind::DeleteInRemote), 6);
    assert_eq!(report.done_count(ActionKind::UploadToRemote), 6);
    assert!(h.remote.busy.peak() <= 3);
    assert!(h.remote.trashing.peak() >= 2);
    assert!(h.remote.uploading.peak() <= 2);
}

#[tokio::test]
async fn test_cycle_phases_are_emitted_in_order() {
    let h = harness(SyncMode::TwoWay).await;
    h.cycle().await;

    let phases: Vec<CyclePhase> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::Cycle { location, phase } if location == h.id() => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            CyclePhase::Init,
            CyclePhase::GetTrees,
            CyclePhase::GetDeltas,
            CyclePhase::ConsumeDeltas,
            CyclePhase::ConsumeTasks,
            CyclePhase::Cleanup,
        ]
    );
}

#[tokio::test]
async fn test_run_loop_stops_on_cancellation() {
    let h = harness_with(SyncMode::TwoWay, ConfigBuilder::new().sync_interval_secs(3600)).await;
    let shutdown = CancellationToken::new();

    let stopper = async {
        while h.remote.listings() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
    };
    tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(h.engine.run(shutdown.clone()), stopper)
    })
    .await
    .unwrap();

    assert_eq!(h.remote.listings(), 1);
}
