pub mod measurements;
pub mod rollups;
pub mod tags;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the storage layer.
///
/// A store failure aborts only the item being processed (one sample, one
/// tag's rollup, one prune pass); callers log it and move on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Tag name registry table. Names are unique; ids never change for the
/// lifetime of the database file.
const CREATE_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS tags (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )";

/// Raw sample table. Append-only; rows are removed only by pruning.
/// Timestamps are unix seconds.
const CREATE_MEASUREMENTS: &str = "
    CREATE TABLE IF NOT EXISTS measurements (
        tag_id    INTEGER NOT NULL,
        value     REAL    NOT NULL,
        timestamp INTEGER NOT NULL
    )";

const CREATE_MEASUREMENTS_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_measurements_tag_ts
    ON measurements (tag_id, timestamp)";

/// Minute rollup table. One row per (tag_id, minute start), overwritten in
/// place while the minute is still filling.
const CREATE_ROLLUPS: &str = "
    CREATE TABLE IF NOT EXISTS measurements_1min (
        tag_id    INTEGER NOT NULL,
        min       REAL    NOT NULL,
        max       REAL    NOT NULL,
        avg       REAL    NOT NULL,
        count     INTEGER NOT NULL,
        timestamp INTEGER NOT NULL
    )";

const CREATE_ROLLUPS_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_measurements_1min_tag_ts
    ON measurements_1min (tag_id, timestamp)";

/// Store wraps a single SQLite connection.
///
/// Each execution path (ingestion, aggregation) opens its own Store over the
/// same database file; WAL mode lets the two proceed concurrently.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the database file, switch it to WAL mode, and bootstrap the
    /// schema. Safe to call on every start; schema creation is idempotent.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute(CREATE_TAGS, [])?;
        conn.execute(CREATE_MEASUREMENTS, [])?;
        conn.execute(CREATE_MEASUREMENTS_INDEX, [])?;
        conn.execute(CREATE_ROLLUPS, [])?;
        conn.execute(CREATE_ROLLUPS_INDEX, [])?;

        debug!(path = %path.display(), "store opened");

        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
