#![forbid(unsafe_code)]

use rusqlite::ErrorCode;
use sq_core::model::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(rusqlite::Error),
    /// The writer lock could not be acquired within the busy timeout.
    #[error("store busy: {0}")]
    Busy(rusqlite::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("job {job_id} is not running (status={status})")]
    NotRunning { job_id: i64, status: JobStatus },
    #[error("job {job_id} changed under an exclusive claim")]
    ClaimConflict { job_id: i64 },
    #[error("unknown id")]
    UnknownId,
}

impl StoreError {
    /// Lock contention: retrying later is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if is_lock_contention(&value) {
            Self::Busy(value)
        } else {
            Self::Sql(value)
        }
    }
}

fn is_lock_contention(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => matches!(
            code.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
