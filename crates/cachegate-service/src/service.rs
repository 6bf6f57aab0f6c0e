//! Service facade wiring the controller and the sweep engines together.
//! Shared by the gateway binary and integration tests.

use crate::controller::CacheController;
use crate::eviction_engine::EvictionEngine;
use crate::migration_engine::MigrationEngine;
use crate::sync_engine::SyncEngine;
use cachegate_core::{CoreResult, GatewayConfig};
use cachegate_metadata::EntryRepository;
use cachegate_storage::StorageEngine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct CacheService {
    entries: EntryRepository,
    engine: Arc<dyn StorageEngine>,
    controller: CacheController,
    sync: SyncEngine,
    eviction: EvictionEngine,
    migration: MigrationEngine,
    sync_interval: Duration,
    eviction_interval: Duration,
    health_interval: Duration,
    shutdown_timeout: Duration,
    healthy: Arc<AtomicBool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    /// Build the service. `budget_bytes` is the resolved eviction budget
    /// (see [`crate::eviction_engine::resolve_budget`]).
    pub fn new(
        entries: EntryRepository,
        engine: Arc<dyn StorageEngine>,
        config: &GatewayConfig,
        budget_bytes: u64,
    ) -> Self {
        let sync = SyncEngine::new(entries.clone(), engine.clone(), &config.sync);
        let migration = MigrationEngine::new(
            entries.clone(),
            engine.clone(),
            sync.clone(),
            config.migration.clone(),
        );

        Self {
            controller: CacheController::new(entries.clone(), engine.clone()),
            sync,
            eviction: EvictionEngine::new(entries.clone(), budget_bytes),
            migration,
            entries,
            engine,
            sync_interval: config.sync.interval(),
            eviction_interval: config.cache.eviction_interval(),
            health_interval: config.server.health_check_interval(),
            shutdown_timeout: config.cache.shutdown_timeout(),
            healthy: Arc::new(AtomicBool::new(true)),
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn eviction(&self) -> &EvictionEngine {
        &self.eviction
    }

    pub fn migration(&self) -> &MigrationEngine {
        &self.migration
    }

    /// Check the storage engine and the metadata store, recording the
    /// outcome for [`CacheService::is_healthy`].
    pub async fn health_check(&self) -> CoreResult<()> {
        let result = check_connections(&self.entries, self.engine.as_ref()).await;
        self.healthy.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    /// Outcome of the most recent health check.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Start the periodic sync, eviction and health-check timers.
    ///
    /// Timers only trigger sweeps; each sweep runs in its own task, so
    /// stopping a timer never interrupts a sweep.
    pub fn start_timers(&self) {
        let mut timers = self.timers.lock();
        if !timers.is_empty() {
            tracing::warn!("Background timers already running");
            return;
        }

        let sync = self.sync.clone();
        timers.push(spawn_timer("sync", self.sync_interval, move || {
            sync.trigger();
        }));

        let eviction = self.eviction.clone();
        timers.push(spawn_timer("eviction", self.eviction_interval, move || {
            eviction.trigger();
        }));

        timers.push(spawn_health_monitor(
            self.entries.clone(),
            self.engine.clone(),
            self.healthy.clone(),
            self.health_interval,
        ));

        tracing::info!(
            sync_interval = ?self.sync_interval,
            eviction_interval = ?self.eviction_interval,
            health_interval = ?self.health_interval,
            budget_bytes = self.eviction.budget_bytes(),
            "Background timers started"
        );
    }

    /// Stop the timers and wait, bounded, for running sync and eviction
    /// sweeps. Returns `false` if the bound was hit.
    pub async fn shutdown(&self) -> bool {
        tracing::info!("CacheService shutdown initiated...");
        for handle in self.timers.lock().drain(..) {
            handle.abort();
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let sync_idle = self.sync.wait_idle(self.shutdown_timeout).await;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let eviction_idle = self.eviction.wait_idle(remaining).await;

        if sync_idle && eviction_idle {
            tracing::info!("CacheService shutdown complete");
            true
        } else {
            tracing::warn!(
                sync_idle,
                eviction_idle,
                timeout = ?self.shutdown_timeout,
                "Shutdown timed out waiting for sweeps"
            );
            false
        }
    }
}

fn spawn_timer(
    name: &'static str,
    interval: Duration,
    mut fire: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::debug!(timer = name, "Timer fired");
            fire();
        }
    })
}

async fn check_connections(entries: &EntryRepository, engine: &dyn StorageEngine) -> CoreResult<()> {
    engine.health_check().await?;
    entries.ping().await
}

/// Re-check connectivity on every tick. Failures are logged at error level
/// and flip the health flag until a later check passes.
fn spawn_health_monitor(
    entries: EntryRepository,
    engine: Arc<dyn StorageEngine>,
    healthy: Arc<AtomicBool>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match check_connections(&entries, engine.as_ref()).await {
                Ok(()) => {
                    if !healthy.swap(true, Ordering::SeqCst) {
                        tracing::info!(engine = engine.name(), "Health check recovered");
                    }
                }
                Err(e) => {
                    healthy.store(false, Ordering::SeqCst);
                    tracing::error!(engine = engine.name(), error = %e, "Health check failed");
                }
            }
        }
    })
}
