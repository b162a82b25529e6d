#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::Connection;

const SQL: &str = r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS jobs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          exp_id TEXT NOT NULL,
          root_folder TEXT NOT NULL,
          mode TEXT NOT NULL,
          force INTEGER NOT NULL DEFAULT 0,
          status TEXT NOT NULL DEFAULT 'queued'
            CHECK (status IN ('queued', 'running', 'done', 'failed', 'canceled')),
          created_at_ms INTEGER NOT NULL,
          started_at_ms INTEGER,
          finished_at_ms INTEGER,
          log_path TEXT,
          error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status_id ON jobs(status, id);
        CREATE INDEX IF NOT EXISTS idx_jobs_finished ON jobs(finished_at_ms);
"#;

pub(crate) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    Ok(())
}
