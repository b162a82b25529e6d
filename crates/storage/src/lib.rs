#![forbid(unsafe_code)]

mod error;
mod jobs;
mod schema;

pub use error::StoreError;
pub use jobs::JobsStatusCounts;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock waits longer than this surface as [`StoreError::Busy`].
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// The job queue. Each process (producer, worker, monitor) opens its own
/// connection to the same file; SQLite's locking is the only coordination.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(db_path, StoreOptions::default())
    }

    pub fn open_with(db_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(options.busy_timeout)?;
        schema::install_schema(&conn)?;

        tracing::debug!(db = %db_path.display(), "job store opened");
        Ok(Self { conn, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}
