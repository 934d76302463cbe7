//! Background eviction of stale snapshots.
//!
//! Periodically reconciles the snapshot directory against the session cache:
//! any snapshot whose user has no live cache entry is deleted, along with
//! leftover partial downloads and files whose owner is unknown.

use crate::cache::SessionCache;
use crate::locks::UserLocks;
use crate::snapshot::SnapshotStore;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub retained: usize,
    pub skipped_busy: usize,
    pub orphans_removed: usize,
    pub failed: usize,
}

/// Periodic snapshot sweeper.
pub struct EvictionScheduler {
    cache: SessionCache,
    snapshots: SnapshotStore,
    locks: UserLocks,
    interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionScheduler {
    pub fn new(
        cache: SessionCache,
        snapshots: SnapshotStore,
        locks: UserLocks,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            snapshots,
            locks,
            interval,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the sweep loop. The first sweep runs one interval from now.
    ///
    /// Calling `start` on a running scheduler is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let cache = self.cache.clone();
        let snapshots = self.snapshots.clone();
        let locks = self.locks.clone();
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(interval_secs = interval.as_secs(), "Eviction scheduler started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        tracing::info!("Eviction scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = sweep(&cache, &snapshots, &locks).await;
                        tracing::debug!(?report, "Eviction sweep finished");
                    }
                }
            }
        }));
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// A sweep already in progress runs to completion first.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Eviction task ended abnormally");
            }
        }
    }

    /// Run a single reconciliation pass now.
    pub async fn sweep_once(&self) -> SweepReport {
        sweep(&self.cache, &self.snapshots, &self.locks).await
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn sweep(cache: &SessionCache, snapshots: &SnapshotStore, locks: &UserLocks) -> SweepReport {
    let mut report = SweepReport::default();

    let scan = match snapshots.scan().await {
        Ok(scan) => scan,
        Err(e) => {
            tracing::error!(dir = %snapshots.dir().display(), error = %e, "Failed to list snapshots");
            report.failed += 1;
            return report;
        }
    };

    for user_id in scan.users {
        report.scanned += 1;

        // Holding the turn lock keeps a concurrent chat from downloading a
        // snapshot we are about to delete.
        let Some(_guard) = locks.try_lock(&user_id) else {
            tracing::debug!(user_id = %user_id, "Skipping busy session");
            report.skipped_busy += 1;
            continue;
        };

        if cache.is_live(&user_id).await {
            report.retained += 1;
            continue;
        }

        match snapshots.delete(&user_id).await {
            Ok(_) => {
                tracing::info!(user_id = %user_id, "Evicted stale snapshot");
                report.deleted += 1;
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to evict snapshot");
                report.failed += 1;
            }
        }
    }

    for path in scan.orphans {
        match snapshots.remove_orphan(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed orphaned snapshot file");
                report.orphans_removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned snapshot file");
                report.failed += 1;
            }
        }
    }

    if report.deleted > 0 || report.orphans_removed > 0 || report.failed > 0 {
        tracing::info!(
            scanned = report.scanned,
            deleted = report.deleted,
            retained = report.retained,
            skipped_busy = report.skipped_busy,
            orphans_removed = report.orphans_removed,
            failed = report.failed,
            "Eviction sweep"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::QaState;
    use qa_common::config::ExpiryMode;
    use serde_json::json;
    use tempfile::tempdir;

    fn fixture(dir: &std::path::Path) -> (SessionCache, SnapshotStore, UserLocks) {
        (
            SessionCache::new(Duration::from_secs(600), ExpiryMode::Strict),
            SnapshotStore::new(dir).unwrap(),
            UserLocks::new(),
        )
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_stale_snapshots() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());

        for user in ["a", "b", "c", "d", "e"] {
            snapshots.save(user, &QaState::new(json!({}))).await.unwrap();
        }
        cache.put("b", QaState::new(json!({}))).await;
        cache.put("d", QaState::new(json!({}))).await;

        let scheduler = EvictionScheduler::new(cache, snapshots.clone(), locks, Duration::from_secs(600));
        let report = scheduler.sweep_once().await;

        assert_eq!(report.scanned, 5);
        assert_eq!(report.deleted, 3);
        assert_eq!(report.retained, 2);
        assert_eq!(snapshots.list().await.unwrap(), vec!["b".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_skips_busy_users() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        snapshots.save("u1", &QaState::new(json!({}))).await.unwrap();

        let guard = locks.lock("u1").await;
        let scheduler = EvictionScheduler::new(cache, snapshots.clone(), locks.clone(), Duration::from_secs(600));

        let report = scheduler.sweep_once().await;
        assert_eq!(report.skipped_busy, 1);
        assert!(snapshots.exists("u1").await);

        drop(guard);
        let report = scheduler.sweep_once().await;
        assert_eq!(report.deleted, 1);
        assert!(!snapshots.exists("u1").await);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_cache_entries() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(Duration::from_millis(20), ExpiryMode::Strict);
        let snapshots = SnapshotStore::new(dir.path()).unwrap();
        snapshots.save("u1", &QaState::new(json!({}))).await.unwrap();
        cache.put("u1", QaState::new(json!({}))).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        let scheduler = EvictionScheduler::new(cache, snapshots.clone(), UserLocks::new(), Duration::from_secs(600));
        assert_eq!(scheduler.sweep_once().await.deleted, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_partial_downloads() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        let part = crate::object_store::part_path(&snapshots.path_for("u1"));
        std::fs::write(&part, b"{\"hist").unwrap();

        let scheduler = EvictionScheduler::new(cache, snapshots, locks, Duration::from_secs(600));
        let report = scheduler.sweep_once().await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, 1);
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_partial_download_of_busy_user() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        let part = crate::object_store::part_path(&snapshots.path_for("u1"));
        std::fs::write(&part, b"{").unwrap();

        let _guard = locks.lock("u1").await;
        let scheduler = EvictionScheduler::new(cache, snapshots, locks.clone(), Duration::from_secs(600));

        assert_eq!(scheduler.sweep_once().await.skipped_busy, 1);
        assert!(part.exists());
    }

    #[tokio::test]
    async fn test_sweep_long_ids_and_orphans() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        let live = "l".repeat(300);
        let stale = "s".repeat(300);
        snapshots.save(&live, &QaState::new(json!({}))).await.unwrap();
        snapshots.save(&stale, &QaState::new(json!({}))).await.unwrap();
        cache.put(&live, QaState::new(json!({}))).await;

        let unowned = snapshots.path_for(&"o".repeat(300));
        std::fs::write(&unowned, b"{}").unwrap();

        let scheduler = EvictionScheduler::new(cache, snapshots.clone(), locks, Duration::from_secs(600));
        let report = scheduler.sweep_once().await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(report.orphans_removed, 1);
        assert!(!unowned.exists());
        assert_eq!(snapshots.list().await.unwrap(), vec![live]);
    }

    #[tokio::test]
    async fn test_empty_dir_sweep() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        let scheduler = EvictionScheduler::new(cache, snapshots, locks, Duration::from_secs(600));

        assert_eq!(scheduler.sweep_once().await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_background_loop_sweeps_and_stops() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        snapshots.save("u1", &QaState::new(json!({}))).await.unwrap();

        let mut scheduler =
            EvictionScheduler::new(cache, snapshots.clone(), locks, Duration::from_millis(20));
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!snapshots.exists("u1").await);

        scheduler.stop().await;
        assert!(!scheduler.is_running());

        // No sweeps after stop
        snapshots.save("u2", &QaState::new(json!({}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(snapshots.exists("u2").await);
    }

    #[tokio::test]
    async fn test_first_sweep_waits_one_interval() {
        let dir = tempdir().unwrap();
        let (cache, snapshots, locks) = fixture(dir.path());
        snapshots.save("u1", &QaState::new(json!({}))).await.unwrap();

        let mut scheduler =
            EvictionScheduler::new(cache, snapshots.clone(), locks, Duration::from_secs(3600));
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(snapshots.exists("u1").await);
        scheduler.stop().await;
    }
}
