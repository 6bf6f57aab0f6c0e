//! Copy the cached dataset into another gateway instance.
//!
//! A run flushes local dirty entries first, then reads every selected key
//! from the local cold tier and writes it straight into the remote
//! instance's metadata store as a pending update, so the remote flushes it
//! into its own cold tier. Delta mode skips keys the remote already has,
//! which also makes an interrupted run resumable.

use crate::guard::{FlightPermit, SingleFlight};
use crate::retry::{retry_with_delay, wait_until};
use crate::sync_engine::SyncEngine;
use cachegate_core::{CoreError, CoreResult, MigrationConfig};
use cachegate_metadata::{open_store, EntryRepository};
use cachegate_storage::StorageEngine;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Progress is logged every this many copied items.
const PROGRESS_LOG_EVERY: u64 = 100;

/// Which keys a run copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Every live local key.
    Full,
    /// Only keys the remote does not have.
    #[default]
    Delta,
}

impl FromStr for MigrationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(MigrationMode::Full),
            "delta" => Ok(MigrationMode::Delta),
            other => Err(CoreError::invalid_argument(format!(
                "migration mode must be `full` or `delta`, got `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationPhase {
    #[default]
    Idle,
    Preparing,
    Copying,
}

/// Coarse, always-readable view of the current or last run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationProgress {
    pub phase: MigrationPhase,
    pub done: u64,
    pub total: u64,
    pub percent: u8,
}

impl MigrationProgress {
    fn recompute(&mut self) {
        self.percent = if self.total == 0 {
            0
        } else {
            (self.done.saturating_mul(100) / self.total).min(100) as u8
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total: u64,
    pub copied: u64,
}

/// Migration engine handle. Clones share the guard and progress.
#[derive(Clone)]
pub struct MigrationEngine {
    entries: EntryRepository,
    engine: Arc<dyn StorageEngine>,
    sync: SyncEngine,
    config: MigrationConfig,
    guard: SingleFlight,
    progress: Arc<RwLock<MigrationProgress>>,
}

impl MigrationEngine {
    pub fn new(
        entries: EntryRepository,
        engine: Arc<dyn StorageEngine>,
        sync: SyncEngine,
        config: MigrationConfig,
    ) -> Self {
        Self {
            entries,
            engine,
            sync,
            config,
            guard: SingleFlight::new(),
            progress: Arc::new(RwLock::new(MigrationProgress::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub fn progress(&self) -> MigrationProgress {
        self.progress.read().clone()
    }

    fn ensure_enabled(&self) -> CoreResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                "migration is disabled (set migration.enabled = true)",
            ))
        }
    }

    /// Start a run in the background.
    ///
    /// Fails with `InvalidState` when migration is disabled; returns `false`
    /// when a run is already active.
    pub fn start(&self, target: &str, mode: MigrationMode) -> CoreResult<bool> {
        self.ensure_enabled()?;
        let Some(permit) = self.guard.try_acquire() else {
            return Ok(false);
        };

        let engine = self.clone();
        let target = target.to_string();
        tokio::spawn(async move {
            match engine.run_with(permit, &target, mode).await {
                Ok(report) => tracing::info!(
                    total = report.total,
                    copied = report.copied,
                    "Migration finished"
                ),
                Err(e) => tracing::error!(error = %e, "Migration failed"),
            }
        });
        Ok(true)
    }

    /// Run inline and return the report or the first unrecoverable error.
    pub async fn run(&self, target: &str, mode: MigrationMode) -> CoreResult<MigrationReport> {
        self.ensure_enabled()?;
        let permit = self
            .guard
            .try_acquire()
            .ok_or_else(|| CoreError::invalid_state("a migration is already running"))?;
        self.run_with(permit, target, mode).await
    }

    async fn run_with(
        &self,
        _permit: FlightPermit,
        target: &str,
        mode: MigrationMode,
    ) -> CoreResult<MigrationReport> {
        *self.progress.write() = MigrationProgress {
            phase: MigrationPhase::Preparing,
            ..MigrationProgress::default()
        };

        let result = self.execute(target, mode).await;
        self.progress.write().phase = MigrationPhase::Idle;
        result
    }

    async fn execute(&self, target: &str, mode: MigrationMode) -> CoreResult<MigrationReport> {
        if target.trim().is_empty() {
            return Err(CoreError::invalid_argument("migration target must not be empty"));
        }
        let start = Instant::now();
        tracing::info!(target = %target, ?mode, "Preparing migration");

        let remote_pool = open_store(target, self.config.workers as u32).await?;
        let remote = EntryRepository::new(remote_pool.clone());

        let result = self.copy_all(&remote, mode).await;
        remote_pool.close().await;

        if let Ok(report) = &result {
            tracing::info!(
                target = %target,
                total = report.total,
                copied = report.copied,
                duration_ms = start.elapsed().as_millis() as u64,
                "Migration complete"
            );
        }
        result
    }

    async fn copy_all(
        &self,
        remote: &EntryRepository,
        mode: MigrationMode,
    ) -> CoreResult<MigrationReport> {
        self.flush_local().await?;

        let mut keys = self.entries.list_live_ids().await?;
        if mode == MigrationMode::Delta {
            let existing: HashSet<String> = remote.list_ids().await?.into_iter().collect();
            keys.retain(|key| !existing.contains(key));
        }

        let total = keys.len() as u64;
        {
            let mut progress = self.progress.write();
            progress.phase = MigrationPhase::Copying;
            progress.total = total;
            progress.recompute();
        }
        tracing::info!(total, ?mode, workers = self.config.workers, "Copying entries");

        let copied = self.dispatch(remote, keys).await?;
        Ok(MigrationReport { total, copied })
    }

    /// Force a sync sweep and wait, bounded, for it to finish.
    async fn flush_local(&self) -> CoreResult<()> {
        if !self.sync.trigger() {
            tracing::debug!("Sync sweep already running, waiting for it");
        }
        let sync = &self.sync;
        let idle = wait_until(
            self.config.sync_wait_interval(),
            self.config.sync_wait_attempts,
            || async { !sync.is_running() },
        )
        .await;

        if idle {
            Ok(())
        } else {
            Err(CoreError::unavailable(
                "local sync did not finish before migration",
            ))
        }
    }

    /// Copy `keys` with a bounded worker pool. The first item that exhausts
    /// its retries stops further dispatch; in-flight items are drained.
    async fn dispatch(&self, remote: &EntryRepository, keys: Vec<String>) -> CoreResult<u64> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let first_error: Arc<Mutex<Option<CoreError>>> = Arc::new(Mutex::new(None));
        let mut join_set = JoinSet::new();

        for key in keys {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| CoreError::internal(format!("worker pool closed: {}", e)))?;
            if failed.load(Ordering::SeqCst) {
                break;
            }

            let engine = Arc::clone(&self.engine);
            let remote = remote.clone();
            let progress = Arc::clone(&self.progress);
            let failed = Arc::clone(&failed);
            let first_error = Arc::clone(&first_error);
            let delay = self.config.item_retry_delay();
            let retries = self.config.item_retry_attempts;

            join_set.spawn(async move {
                let _permit = permit;
                let copied = retry_with_delay("migrate entry", delay, retries, || {
                    copy_entry(engine.as_ref(), &remote, &key)
                })
                .await;

                match copied {
                    Ok(()) => {
                        let mut progress = progress.write();
                        progress.done += 1;
                        progress.recompute();
                        if progress.done % PROGRESS_LOG_EVERY == 0 {
                            tracing::info!(
                                done = progress.done,
                                total = progress.total,
                                percent = progress.percent,
                                "Migration progress"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "Failed to migrate entry");
                        failed.store(true, Ordering::SeqCst);
                        first_error.lock().get_or_insert(e);
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                failed.store(true, Ordering::SeqCst);
                first_error
                    .lock()
                    .get_or_insert(CoreError::internal(format!("migration worker failed: {}", e)));
            }
        }

        if let Some(e) = first_error.lock().take() {
            return Err(e);
        }
        Ok(self.progress.read().done)
    }
}

async fn copy_entry(
    engine: &dyn StorageEngine,
    remote: &EntryRepository,
    key: &str,
) -> CoreResult<()> {
    let data = engine.get(key).await?;
    remote.upsert_dirty(key, &data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegate_core::SyncConfig;
    use cachegate_storage::{CompressionConfig, MockFailure, MockObjectStore, ObjectStoreEngine};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        migration: MigrationEngine,
        entries: EntryRepository,
        store: Arc<MockObjectStore>,
        remote_url: String,
        _dir: TempDir,
    }

    async fn fixture(enabled: bool) -> Fixture {
        fixture_with_workers(enabled, 3).await
    }

    async fn fixture_with_workers(enabled: bool, workers: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let entries = EntryRepository::new(open_store("sqlite::memory:", 1).await.unwrap());
        let store = Arc::new(MockObjectStore::new());
        let engine: Arc<dyn StorageEngine> = Arc::new(
            ObjectStoreEngine::new("memory", store.clone(), CompressionConfig::default(), None)
                .unwrap(),
        );
        let sync = SyncEngine::new(entries.clone(), engine.clone(), &SyncConfig::default());
        let config = MigrationConfig {
            enabled,
            workers,
            item_retry_delay_ms: 1,
            item_retry_attempts: 2,
            sync_wait_interval_ms: 5,
            sync_wait_attempts: 200,
        };
        let remote_url = format!("sqlite://{}", dir.path().join("remote.db").display());

        Fixture {
            migration: MigrationEngine::new(entries.clone(), engine, sync, config),
            entries,
            store,
            remote_url,
            _dir: dir,
        }
    }

    async fn remote(url: &str) -> EntryRepository {
        EntryRepository::new(open_store(url, 1).await.unwrap())
    }

    #[tokio::test]
    async fn test_disabled_by_default() {
        let f = fixture(false).await;
        assert!(matches!(
            f.migration.start(&f.remote_url, MigrationMode::Full),
            Err(CoreError::InvalidState(_))
        ));
        assert!(matches!(
            f.migration.run(&f.remote_url, MigrationMode::Full).await,
            Err(CoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_full_copy_flushes_first() {
        let f = fixture(true).await;
        for key in ["a", "b", "c"] {
            f.entries.upsert_dirty(key, &json!({ "k": key })).await.unwrap();
        }
        f.entries.upsert_dirty("deleted", &json!(0)).await.unwrap();
        f.entries.mark_deleted("deleted").await.unwrap();

        let report = f.migration.run(&f.remote_url, MigrationMode::Full).await.unwrap();
        assert_eq!(report, MigrationReport { total: 3, copied: 3 });
        assert!(f.entries.list_dirty().await.unwrap().is_empty());

        let remote = remote(&f.remote_url).await;
        assert_eq!(remote.list_ids().await.unwrap(), vec!["a", "b", "c"]);
        let entry = remote.fetch("b").await.unwrap().unwrap();
        assert!(entry.is_dirty());
        assert_eq!(entry.data, Some(json!({"k": "b"})));

        let progress = f.migration.progress();
        assert_eq!(progress.phase, MigrationPhase::Idle);
        assert_eq!((progress.done, progress.total, progress.percent), (3, 3, 100));
    }

    #[tokio::test]
    async fn test_delta_skips_keys_the_remote_has() {
        let f = fixture(true).await;
        for key in ["a", "b", "c"] {
            f.entries.upsert_dirty(key, &json!(key)).await.unwrap();
        }
        let remote = remote(&f.remote_url).await;
        remote.upsert_dirty("a", &json!("remote-a")).await.unwrap();
        remote.upsert_dirty("b", &json!("remote-b")).await.unwrap();
        remote.pool().close().await;

        let report = f.migration.run(&f.remote_url, MigrationMode::Delta).await.unwrap();
        assert_eq!(report.copied, 1);

        let remote = self::remote(&f.remote_url).await;
        assert_eq!(remote.fetch("c").await.unwrap().unwrap().data, Some(json!("c")));
        assert_eq!(
            remote.fetch("a").await.unwrap().unwrap().data,
            Some(json!("remote-a"))
        );
    }

    #[tokio::test]
    async fn test_item_failure_aborts_run() {
        let f = fixture(true).await;
        f.entries.upsert_dirty("a", &json!(1)).await.unwrap();
        // flushed, then the cold tier goes down for every attempt
        f.migration.sync.run_once().await.unwrap().unwrap();
        f.store.push_failures([MockFailure::Unavailable("down"); 3]);

        let err = f.migration.run(&f.remote_url, MigrationMode::Full).await.unwrap_err();
        assert!(matches!(err, CoreError::Unavailable(_)));
        assert_eq!(f.migration.progress().phase, MigrationPhase::Idle);
        assert!(!f.migration.is_running());
    }

    #[tokio::test]
    async fn test_failure_stops_undispatched_items() {
        let f = fixture_with_workers(true, 1).await;
        for key in ["a", "b", "c", "d"] {
            f.entries.upsert_dirty(key, &json!(key)).await.unwrap();
        }
        f.migration.sync.run_once().await.unwrap().unwrap();
        // `a` is copied first and fails on every attempt
        f.store.push_failures([MockFailure::Unavailable("down"); 3]);

        let err = f.migration.run(&f.remote_url, MigrationMode::Full).await.unwrap_err();
        assert!(matches!(err, CoreError::Unavailable(_)));

        let progress = f.migration.progress();
        assert_eq!(progress.total, 4);
        assert!(progress.done < progress.total);
        assert_eq!(progress.done, 0);

        let remote = remote(&f.remote_url).await;
        assert!(remote.list_ids().await.unwrap().is_empty());
        assert_eq!(f.store.successful_calls("get"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fixture(true).await;
        f.entries.upsert_dirty("a", &json!(1)).await.unwrap();
        f.migration.sync.run_once().await.unwrap().unwrap();
        f.store.push_failures([MockFailure::Unavailable("blip")]);

        let report = f.migration.run(&f.remote_url, MigrationMode::Full).await.unwrap();
        assert_eq!(report.copied, 1);
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let f = fixture(true).await;
        f.entries.upsert_dirty("a", &json!(1)).await.unwrap();

        assert!(f.migration.start(&f.remote_url, MigrationMode::Delta).unwrap());
        assert!(!f.migration.start(&f.remote_url, MigrationMode::Delta).unwrap());
        assert!(f.migration.guard.wait_idle(std::time::Duration::from_secs(10)).await);

        assert_eq!(f.migration.progress().done, 1);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<MigrationMode>().unwrap(), MigrationMode::Full);
        assert_eq!("delta".parse::<MigrationMode>().unwrap(), MigrationMode::Delta);
        assert_eq!(MigrationMode::default(), MigrationMode::Delta);
        assert!("partial".parse::<MigrationMode>().is_err());
    }
}
