//! Payload eviction to keep the metadata store within its byte budget.
//!
//! Eviction strips the cached payload of clean entries, oldest first. The
//! record stays, so the next read hydrates it from the cold tier. Dirty
//! entries are never selected: their payload is the only copy.

use crate::guard::SingleFlight;
use cachegate_core::{CacheConfig, CoreResult, MIN_CACHE_SIZE_MB};
use cachegate_metadata::{is_in_memory, EntryRepository};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{DiskExt, System, SystemExt};

/// Share of the budget reclaimed per pass.
const EVICTION_FRACTION: f64 = 0.1;

/// Share of disk capacity used when no explicit budget is configured.
const AUTO_BUDGET_FRACTION: f64 = 0.8;

const MIB: u64 = 1024 * 1024;

/// Outcome of one eviction sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub size_before: u64,
    pub size_after: u64,
    pub stripped: u64,
    pub passes: u32,
}

/// Entries to strip in one pass: a tenth of the budget worth of average
/// entries, at least one.
pub fn target_count(budget_bytes: u64, average_entry_bytes: u64) -> u64 {
    if average_entry_bytes == 0 {
        return 1;
    }
    let target = (budget_bytes as f64 * EVICTION_FRACTION / average_entry_bytes as f64) as u64;
    target.max(1)
}

/// Resolve the byte budget for the metadata store.
///
/// An explicit `max_size_mb` wins; otherwise the budget is 80% of the disk
/// holding the database. Either way it is floored at [`MIN_CACHE_SIZE_MB`].
pub fn resolve_budget(config: &CacheConfig, database_url: &str) -> u64 {
    let floor = MIN_CACHE_SIZE_MB * MIB;

    if let Some(mb) = config.max_size_mb {
        return mb.saturating_mul(MIB).max(floor);
    }
    if is_in_memory(database_url) {
        return floor;
    }

    let path = database_path(database_url);
    match disk_capacity(&path) {
        Some(total) => {
            let budget = ((total as f64 * AUTO_BUDGET_FRACTION) as u64).max(floor);
            tracing::info!(
                path = %path.display(),
                disk_bytes = total,
                budget_bytes = budget,
                "Derived cache budget from disk capacity"
            );
            budget
        }
        None => {
            tracing::warn!(
                path = %path.display(),
                "Could not determine disk capacity, using minimum cache budget"
            );
            floor
        }
    }
}

fn database_path(database_url: &str) -> PathBuf {
    let raw = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let raw = raw.split('?').next().unwrap_or(raw);
    let path = Path::new(raw);
    std::fs::canonicalize(path)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(path)))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Total size of the disk whose mount point is the longest prefix of `path`.
fn disk_capacity(path: &Path) -> Option<u64> {
    let mut system = System::new();
    system.refresh_disks_list();
    system
        .disks()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.total_space())
}

/// Eviction engine handle. Clones share the guard.
#[derive(Clone)]
pub struct EvictionEngine {
    entries: EntryRepository,
    budget_bytes: u64,
    guard: SingleFlight,
}

impl EvictionEngine {
    pub fn new(entries: EntryRepository, budget_bytes: u64) -> Self {
        Self {
            entries,
            budget_bytes,
            guard: SingleFlight::new(),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.guard.wait_idle(timeout).await
    }

    /// Start a sweep in the background. Returns `false` if one is running.
    pub fn trigger(&self) -> bool {
        let Some(permit) = self.guard.try_acquire() else {
            tracing::debug!("Eviction sweep already running, trigger dropped");
            return false;
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = engine.sweep().await {
                tracing::error!(error = %e, "Eviction sweep aborted");
            }
        });
        true
    }

    /// Run a sweep inline. Returns `None` if one is already running.
    pub async fn run_once(&self) -> Option<CoreResult<EvictionReport>> {
        let _permit = self.guard.try_acquire()?;
        Some(self.sweep().await)
    }

    async fn sweep(&self) -> CoreResult<EvictionReport> {
        let start = Instant::now();
        let mut stats = self.entries.stats().await?;
        let mut report = EvictionReport {
            size_before: stats.total_bytes,
            ..EvictionReport::default()
        };

        while stats.total_bytes > self.budget_bytes {
            let count = target_count(self.budget_bytes, stats.average_entry_bytes());
            let stripped = self.entries.strip_oldest_clean(count).await?;
            report.passes += 1;
            report.stripped += stripped;

            if stripped == 0 {
                tracing::warn!(
                    size = stats.total_bytes,
                    budget = self.budget_bytes,
                    "Over budget but no clean entries left to evict"
                );
                break;
            }
            stats = self.entries.stats().await?;
        }

        report.size_after = stats.total_bytes;
        if report.passes > 0 {
            tracing::info!(
                size_before = report.size_before,
                size_after = report.size_after,
                stripped = report.stripped,
                passes = report.passes,
                budget = self.budget_bytes,
                duration_ms = start.elapsed().as_millis() as u64,
                "Eviction sweep complete"
            );
        } else {
            tracing::debug!(size = stats.total_bytes, budget = self.budget_bytes, "Within budget");
        }
        Ok(report)
    }
}
