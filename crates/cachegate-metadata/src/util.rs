use cachegate_core::CoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::MIGRATOR;

/// Whether the URL names a private in-memory database.
pub fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Creates a SQLite connection pool configured for cache metadata workloads.
///
/// In-memory databases are per-connection, so they get exactly one
/// connection that is never recycled.
pub async fn create_sqlite_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let mut options = database_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new();
    if is_in_memory(database_url) {
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        if let Some(parent) = options.clone().get_filename().parent() {
            std::fs::create_dir_all(parent)?;
        }
        options = options.journal_mode(SqliteJournalMode::Wal);
        pool_options = pool_options.max_connections(max_connections.max(1));
    }

    pool_options.connect_with(options).await
}

/// Runs all outstanding migrations against the provided connection pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Opens a pool and brings its schema up to date.
pub async fn open_store(database_url: &str, max_connections: u32) -> Result<SqlitePool, CoreError> {
    let pool = create_sqlite_pool(database_url, max_connections)
        .await
        .map_err(db_error)?;
    run_migrations(&pool)
        .await
        .map_err(|e| CoreError::internal(format!("metadata migration failed: {}", e)))?;

    tracing::info!(
        in_memory = is_in_memory(database_url),
        max_connections,
        "Metadata store ready"
    );
    Ok(pool)
}

/// Connectivity problems are `Unavailable`; everything else is `Internal`.
pub fn db_error(err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CoreError::unavailable(format!("metadata store: {}", err))
        }
        other => CoreError::internal(other.to_string()),
    }
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::internal(format!("bad timestamp `{}`: {}", value, e)))
}
