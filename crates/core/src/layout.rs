#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

pub const DB_ENV_VAR: &str = "SQ_DB";
pub const DEFAULT_QUEUE_DIRNAME: &str = ".spinesq/queue";
pub const DEFAULT_DB_FILENAME: &str = "jobs.sqlite";

const LOGS_DIRNAME: &str = "logs";
const WORKER_PID_FILENAME: &str = "worker.pid";
const WORKER_STDOUT_FILENAME: &str = "worker_stdout.log";

/// Every file the queue touches lives next to the database file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueLayout {
    db_path: PathBuf,
    queue_dir: PathBuf,
}

impl QueueLayout {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        let queue_dir = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { db_path, queue_dir }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.queue_dir.join(LOGS_DIRNAME)
    }

    pub fn worker_pid_path(&self) -> PathBuf {
        self.queue_dir.join(WORKER_PID_FILENAME)
    }

    /// Where a supervisor is expected to redirect the worker's own console output.
    pub fn worker_stdout_path(&self) -> PathBuf {
        self.queue_dir.join(WORKER_STDOUT_FILENAME)
    }

    pub fn job_log_path(&self, job_id: i64, exp_id: &str) -> PathBuf {
        self.logs_dir().join(job_log_file_name(job_id, exp_id))
    }
}

pub fn job_log_file_name(job_id: i64, exp_id: &str) -> String {
    format!("job_{job_id:06}_{}.log", sanitize_label(exp_id))
}

/// Keeps ASCII alphanumerics and `-_.`; everything else becomes `_`.
pub fn sanitize_label(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_db_path_from_home(home: &Path) -> PathBuf {
    home.join(DEFAULT_QUEUE_DIRNAME).join(DEFAULT_DB_FILENAME)
}

/// `SQ_DB` wins; otherwise the queue lives under the user's home directory.
pub fn default_db_path() -> PathBuf {
    if let Some(path) = env_var(DB_ENV_VAR) {
        return PathBuf::from(path);
    }
    let home = env_var("HOME")
        .or_else(|| env_var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    default_db_path_from_home(&home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_log_name_is_deterministic_and_sanitized() {
        assert_eq!(job_log_file_name(7, "m01/day 2"), "job_000007_m01_day_2.log");
        assert_eq!(job_log_file_name(1_234_567, "a.b-c"), "job_1234567_a.b-c.log");
        assert_eq!(sanitize_label("ümlaut"), "_mlaut");
    }

    #[test]
    fn layout_derives_from_db_directory() {
        let layout = QueueLayout::new("/srv/queue/jobs.sqlite");
        assert_eq!(layout.queue_dir(), Path::new("/srv/queue"));
        assert_eq!(layout.logs_dir(), PathBuf::from("/srv/queue/logs"));
        assert_eq!(
            layout.job_log_path(3, "exp"),
            PathBuf::from("/srv/queue/logs/job_000003_exp.log")
        );
        assert_eq!(layout.worker_pid_path(), PathBuf::from("/srv/queue/worker.pid"));
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        let layout = QueueLayout::new("jobs.sqlite");
        assert_eq!(layout.queue_dir(), Path::new("."));
    }

    #[test]
    fn default_path_hangs_off_home() {
        let path = default_db_path_from_home(Path::new("/home/op"));
        assert_eq!(path, PathBuf::from("/home/op/.spinesq/queue/jobs.sqlite"));
    }
}
