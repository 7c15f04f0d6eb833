//! Persistence layer: SQLite store, connection setup, and typed accessors.
//!
//! The store records every request, response, batch, and benchmark key the
//! system produces. There is no ORM; rows are plain structs decoded with
//! `sqlx::FromRow` and the accessors in [`store`] issue hand-written SQL.

pub mod models;
pub mod store;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use store::Store;

/// Unified error type for store operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Row not found by the given identifier
    #[error("entity not found")]
    NotFound,

    /// The parallel batch path was requested on a store that cannot take
    /// concurrent writers.
    #[error("store backend does not support concurrent writers")]
    UnsupportedBackend,

    /// Catch-all for non-recoverable store errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            other => DbError::Other(anyhow::Error::from(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open the store at `url` and run pending migrations.
///
/// File-backed databases are put in WAL mode with a busy timeout, which is
/// what lets the parallel batch path run several writer tasks at once. An
/// in-memory database is pinned to a single connection (every pooled
/// connection would otherwise see its own empty database), so it does not
/// qualify for concurrent writes and `Store::supports_concurrent_writers`
/// reports false.
pub async fn connect(url: &str) -> Result<Store> {
    let in_memory = url.contains(":memory:");

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        });

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 8 })
        .connect_with(options)
        .await?;

    migrator().run(&pool).await.map_err(anyhow::Error::from)?;

    Ok(Store::new(pool, !in_memory))
}

/// Get the store migrator.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Wrap an existing pool, e.g. one handed out by `#[sqlx::test]`.
///
/// Test pools are file-backed and migrated by the harness, so they take the
/// concurrent-writer path unless the caller says otherwise.
pub fn from_pool(pool: SqlitePool, concurrent_writers: bool) -> Store {
    Store::new(pool, concurrent_writers)
}
