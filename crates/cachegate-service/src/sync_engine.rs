//! Write-back of dirty entries to the cold tier.
//!
//! A sweep walks every entry with a pending action:
//! - pending update: claim (clear the dirty flag and read the payload in one
//!   statement), write to the storage engine, and on failure put the claimed
//!   payload back as a pending update
//! - pending delete: delete the cold object, then drop the record if it is
//!   still delete-pending
//!
//! The claim is what keeps a scheduled sweep and a manual trigger from
//! flushing the same entry twice; the single-flight guard only keeps sweeps
//! from piling up.

use crate::guard::SingleFlight;
use crate::retry::retry_with_delay;
use cachegate_core::{CoreError, CoreResult, SyncConfig, SyncType};
use cachegate_metadata::EntryRepository;
use cachegate_storage::StorageEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one sync sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Pending updates written to the cold tier.
    pub flushed: usize,
    /// Pending deletes removed from both tiers.
    pub purged: usize,
    /// Failed flushes whose entry was put back as a pending update.
    pub rolled_back: usize,
    /// Items that failed and stay pending for the next sweep.
    pub failed: usize,
    /// Keys that could be neither flushed nor restored.
    pub inconsistent: Vec<String>,
}

impl SyncReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent.is_empty()
    }
}

/// Sync engine handle. Clones share the guard.
#[derive(Clone)]
pub struct SyncEngine {
    entries: EntryRepository,
    engine: Arc<dyn StorageEngine>,
    guard: SingleFlight,
    restore_delay: Duration,
    restore_retries: u32,
}

impl SyncEngine {
    pub fn new(
        entries: EntryRepository,
        engine: Arc<dyn StorageEngine>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            entries,
            engine,
            guard: SingleFlight::new(),
            restore_delay: config.restore_retry_delay(),
            restore_retries: config.restore_retry_attempts,
        }
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Wait (bounded) for a running sweep to finish.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.guard.wait_idle(timeout).await
    }

    /// Start a sweep in the background. Returns `false` if one is running.
    pub fn trigger(&self) -> bool {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::debug!("Sync sweep already running, trigger dropped");
            return false;
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // errors are logged inside sweep
            let _ = engine.sweep().await;
        });
        true
    }

    /// Run a sweep inline. Returns `None` if one is already running.
    pub async fn run_once(&self) -> Option<CoreResult<SyncReport>> {
        let _permit = self.guard.try_acquire()?;
        Some(self.sweep().await)
    }

    async fn sweep(&self) -> CoreResult<SyncReport> {
        let start = Instant::now();
        let pending = match self.entries.list_dirty().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Sync sweep aborted: could not list pending entries");
                return Err(e);
            }
        };
        tracing::info!(
            pending = pending.len(),
            engine = self.engine.name(),
            "Starting sync sweep"
        );

        let mut report = SyncReport::default();
        for (key, sync_type) in pending {
            match sync_type {
                SyncType::Update => self.flush(&key, &mut report).await,
                SyncType::Delete => self.purge(&key, &mut report).await,
            }
        }

        tracing::info!(
            flushed = report.flushed,
            purged = report.purged,
            rolled_back = report.rolled_back,
            failed = report.failed,
            inconsistent = report.inconsistent.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sync sweep complete"
        );
        Ok(report)
    }

    async fn flush(&self, key: &str, report: &mut SyncReport) {
        let data = match self.entries.claim_update(key).await {
            Ok(Some(data)) => data,
            // claimed or replaced by someone else since the scan
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to claim pending update");
                report.failed += 1;
                return;
            }
        };

        let write_error = match self.engine.set(key, &data).await {
            Ok(()) => {
                report.flushed += 1;
                tracing::debug!(key = %key, "Flushed entry");
                return;
            }
            Err(e) => e,
        };

        report.failed += 1;
        tracing::warn!(
            key = %key,
            error = %write_error,
            "Cold-tier write failed, restoring entry"
        );

        let restored = retry_with_delay(
            "restore pending update",
            self.restore_delay,
            self.restore_retries,
            || self.entries.restore_update(key, &data),
        )
        .await;

        match restored {
            Ok(true) => report.rolled_back += 1,
            // a newer write or delete landed and is already pending
            Ok(false) => {}
            Err(restore_error) => {
                let err = CoreError::inconsistency(
                    key,
                    format!(
                        "write failed ({}); restore failed ({})",
                        write_error, restore_error
                    ),
                );
                tracing::error!(
                    key = %key,
                    payload = %data,
                    error = %err,
                    "Entry left inconsistent"
                );
                report.inconsistent.push(key.to_string());
            }
        }
    }

    async fn purge(&self, key: &str, report: &mut SyncReport) {
        if let Err(e) = self.engine.delete(key).await {
            tracing::warn!(
                key = %key,
                error = %e,
                "Cold-tier delete failed, will retry next sweep"
            );
            report.failed += 1;
            return;
        }

        match self.entries.purge_deleted(key).await {
            Ok(true) => report.purged += 1,
            // re-created since the scan; the new value is pending
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to drop deleted record");
                report.failed += 1;
            }
        }
    }
}
