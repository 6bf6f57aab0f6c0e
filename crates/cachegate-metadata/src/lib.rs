//! SQLite metadata store for the cachegate hot tier.
//!
//! One row per cache key records whether the payload is held locally and
//! which cold-tier action (if any) is still pending for it.

mod entry_repository;
mod util;

pub use entry_repository::{EntryRepository, StoreStats};
pub use util::{create_sqlite_pool, db_error, is_in_memory, open_store, run_migrations};

/// Embedded SQL migrations for the metadata database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
