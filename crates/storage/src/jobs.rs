#![forbid(unsafe_code)]

use super::*;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use sq_core::clock::now_ms;
use sq_core::model::{Job, JobStatus, NewJob};
use std::str::FromStr;

const MAX_EXP_ID_LEN: usize = 256;
const MAX_ROOT_FOLDER_LEN: usize = 4096;

const JOB_COLUMNS: &str = "id, exp_id, root_folder, mode, force, status, created_at_ms, \
                           started_at_ms, finished_at_ms, log_path, error";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobsStatusCounts {
    pub queued: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
    pub canceled: u64,
}

impl JobsStatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Running => self.running,
            JobStatus::Done => self.done,
            JobStatus::Failed => self.failed,
            JobStatus::Canceled => self.canceled,
        }
    }

    fn slot(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Running => &mut self.running,
            JobStatus::Done => &mut self.done,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Canceled => &mut self.canceled,
        }
    }
}

fn normalize_exp_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("exp_id must not be empty"));
    }
    if raw.len() > MAX_EXP_ID_LEN {
        return Err(StoreError::InvalidInput("exp_id is too long"));
    }
    Ok(raw.to_string())
}

fn normalize_root_folder(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("root_folder must not be empty"));
    }
    if raw.len() > MAX_ROOT_FOLDER_LEN {
        return Err(StoreError::InvalidInput("root_folder is too long"));
    }
    Ok(raw.to_string())
}

fn parse_text_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<Job, rusqlite::Error> {
    Ok(Job {
        id: row.get(0)?,
        exp_id: row.get(1)?,
        root_folder: row.get(2)?,
        mode: parse_text_column(row, 3)?,
        force: row.get::<_, i64>(4)? != 0,
        status: parse_text_column(row, 5)?,
        created_at_ms: row.get(6)?,
        started_at_ms: row.get(7)?,
        finished_at_ms: row.get(8)?,
        log_path: row.get(9)?,
        error: row.get(10)?,
    })
}

impl SqliteStore {
    /// Appends a `queued` row. Logically duplicate jobs are accepted.
    pub fn enqueue(&mut self, request: NewJob) -> Result<i64, StoreError> {
        let exp_id = normalize_exp_id(&request.exp_id)?;
        let root_folder = normalize_root_folder(&request.root_folder)?;
        let now_ms = now_ms();

        self.conn.execute(
            r#"
            INSERT INTO jobs(exp_id, root_folder, mode, force, status, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, 'queued', ?5)
            "#,
            params![
                exp_id,
                root_folder,
                request.mode.as_str(),
                i64::from(request.force),
                now_ms
            ],
        )?;
        let job_id = self.conn.last_insert_rowid();

        tracing::debug!(job_id, exp_id = %exp_id, "job enqueued");
        Ok(job_id)
    }

    /// Claims the oldest `queued` row under the writer lock and returns its
    /// pre-claim content. Concurrent claimers serialize on `BEGIN IMMEDIATE`,
    /// so a row can only ever be handed out once.
    pub fn claim_next(&mut self) -> Result<Option<Job>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status='queued' ORDER BY id ASC LIMIT 1"
                ),
                [],
                read_job_row,
            )
            .optional()?;
        let Some(job) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let started_at_ms = now_ms();
        let changed = tx.execute(
            "UPDATE jobs SET status='running', started_at_ms=?2 WHERE id=?1 AND status='queued'",
            params![job.id, started_at_ms],
        )?;
        if changed != 1 {
            return Err(StoreError::ClaimConflict { job_id: job.id });
        }

        tx.commit()?;
        tracing::debug!(job_id = job.id, "job claimed");
        Ok(Some(job))
    }

    pub fn set_log_path(&mut self, job_id: i64, log_path: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE jobs SET log_path=?2 WHERE id=?1",
            params![job_id, log_path],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId);
        }
        Ok(())
    }

    pub fn mark_done(&mut self, job_id: i64) -> Result<(), StoreError> {
        self.finish_running(job_id, JobStatus::Done, None)
    }

    /// Stores `error_text` verbatim; callers pass the full cause chain.
    pub fn mark_failed(&mut self, job_id: i64, error_text: &str) -> Result<(), StoreError> {
        self.finish_running(job_id, JobStatus::Failed, Some(error_text))
    }

    fn finish_running(
        &mut self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        debug_assert!(JobStatus::Running.can_transition_to(status));
        let changed = self.conn.execute(
            r#"
            UPDATE jobs
            SET status=?2, finished_at_ms=?3, error=?4
            WHERE id=?1 AND status='running'
            "#,
            params![job_id, status.as_str(), now_ms(), error],
        )?;
        if changed == 1 {
            return Ok(());
        }

        match self.get(job_id)? {
            Some(job) => Err(StoreError::NotRunning {
                job_id,
                status: job.status,
            }),
            None => Err(StoreError::UnknownId),
        }
    }

    /// Cancels a job only while it is still `queued`. Returns `false` when the
    /// row was already claimed, finished, or never existed.
    pub fn cancel(&mut self, job_id: i64) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            r#"
            UPDATE jobs
            SET status='canceled', finished_at_ms=?2
            WHERE id=?1 AND status='queued'
            "#,
            params![job_id, now_ms()],
        )?;
        if changed == 1 {
            tracing::debug!(job_id, "job canceled");
        }
        Ok(changed == 1)
    }

    pub fn get(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
                params![job_id],
                read_job_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn get_running(&self) -> Result<Option<Job>, StoreError> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status='running' \
                     ORDER BY started_at_ms DESC, id DESC LIMIT 1"
                ),
                [],
                read_job_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn get_queued(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let limit = to_sqlite_i64(limit)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status='queued' ORDER BY id ASC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![limit], read_job_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn get_last_finished(&self, n: usize) -> Result<Vec<Job>, StoreError> {
        let limit = to_sqlite_i64(n)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status IN ('done', 'failed', 'canceled') \
             ORDER BY finished_at_ms DESC, id DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![limit], read_job_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn status_counts(&self) -> Result<JobsStatusCounts, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut counts = JobsStatusCounts::default();
        while let Some(row) = rows.next()? {
            let status: JobStatus = parse_text_column(row, 0)?;
            let count: i64 = row.get(1)?;
            *counts.slot(status) = u64::try_from(count).unwrap_or(0);
        }
        Ok(counts)
    }
}
