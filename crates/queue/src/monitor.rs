#![forbid(unsafe_code)]

use crate::tail::LogTail;
use sq_core::clock::{format_ms, format_opt_ms};
use sq_core::layout::QueueLayout;
use sq_core::model::{Job, JobStatus};
use sq_storage::{JobsStatusCounts, SqliteStore, StoreError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const DEFAULT_QUEUED_LIMIT: usize = 500;
pub const DEFAULT_LAST_FINISHED: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct SnapshotOptions {
    pub queued_limit: usize,
    pub last_finished: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            queued_limit: DEFAULT_QUEUED_LIMIT,
            last_finished: DEFAULT_LAST_FINISHED,
        }
    }
}

/// Read-only view of the queue at one refresh tick.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub running: Option<Job>,
    pub queued: Vec<Job>,
    pub last_finished: Vec<Job>,
    pub counts: JobsStatusCounts,
}

impl Snapshot {
    pub fn collect(store: &SqliteStore, options: &SnapshotOptions) -> Result<Self, StoreError> {
        Ok(Self {
            running: store.get_running()?,
            queued: store.get_queued(options.queued_limit)?,
            last_finished: store.get_last_finished(options.last_finished)?,
            counts: store.status_counts()?,
        })
    }

    /// The running job's log when it has one, else the worker's own stdout log.
    pub fn log_source(&self, layout: &QueueLayout) -> PathBuf {
        self.running
            .as_ref()
            .and_then(|job| job.log_path.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| layout.worker_stdout_path())
    }
}

/// Output of one monitor refresh. Only what changed since the previous one is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Refresh {
    pub snapshot: Option<String>,
    pub log_source: Option<PathBuf>,
    pub log: String,
}

/// Polling observer: re-reads the store and follows the current log. Never writes.
pub struct Monitor {
    store: SqliteStore,
    layout: QueueLayout,
    options: SnapshotOptions,
    tail: LogTail,
    last_render: Option<String>,
}

impl Monitor {
    pub fn new(store: SqliteStore, layout: QueueLayout, options: SnapshotOptions) -> Self {
        Self {
            store,
            layout,
            options,
            tail: LogTail::new(),
            last_render: None,
        }
    }

    pub fn refresh(&mut self) -> Result<Refresh, StoreError> {
        let snapshot = Snapshot::collect(&self.store, &self.options)?;
        let rendered = render_snapshot(&snapshot);
        let snapshot_changed = self.last_render.as_deref() != Some(rendered.as_str());
        if snapshot_changed {
            self.last_render = Some(rendered.clone());
        }

        let source = snapshot.log_source(&self.layout);
        let source_changed = self.tail.path() != Some(source.as_path());
        let log = read_log(&mut self.tail, &source);

        Ok(Refresh {
            snapshot: snapshot_changed.then_some(rendered),
            log_source: source_changed.then_some(source),
            log,
        })
    }
}

fn read_log(tail: &mut LogTail, path: &Path) -> String {
    match tail.read(path) {
        Ok(chunk) => chunk.text,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "log read failed");
            format!("[monitor] could not read log {}: {err}\n", path.display())
        }
    }
}

pub fn render_running(running: Option<&Job>) -> String {
    match running {
        None => "RUNNING: (none)".to_string(),
        Some(job) => format!(
            "RUNNING: job={} exp_id={} mode={} force={} started_at={} log={}",
            job.id,
            job.exp_id,
            job.mode,
            job.force,
            format_opt_ms(job.started_at_ms),
            job.log_path.as_deref().unwrap_or("(none)")
        ),
    }
}

pub fn render_counts(counts: &JobsStatusCounts) -> String {
    JobStatus::ALL
        .iter()
        .map(|status| format!("{status}={}", counts.get(*status)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_snapshot(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", render_running(snapshot.running.as_ref()));
    let _ = writeln!(out, "COUNTS: {}", render_counts(&snapshot.counts));

    let _ = writeln!(out, "\nQUEUED ({})", snapshot.queued.len());
    if snapshot.queued.is_empty() {
        let _ = writeln!(out, "  (empty)");
    } else {
        let _ = writeln!(
            out,
            "  {:>6}  {:<24}  {:<15}  {:<5}  CREATED",
            "JOB", "EXP_ID", "MODE", "FORCE"
        );
        for job in &snapshot.queued {
            let _ = writeln!(
                out,
                "  {:>6}  {:<24}  {:<15}  {:<5}  {}",
                job.id,
                job.exp_id,
                job.mode.as_str(),
                if job.force { "Yes" } else { "No" },
                format_ms(job.created_at_ms)
            );
        }
    }

    let _ = writeln!(out, "\nLAST FINISHED ({})", snapshot.last_finished.len());
    if snapshot.last_finished.is_empty() {
        let _ = writeln!(out, "  (none)");
    } else {
        let _ = writeln!(
            out,
            "  {:>6}  {:<24}  {:<8}  {:<15}  {:<20}  FINISHED",
            "JOB", "EXP_ID", "STATUS", "MODE", "STARTED"
        );
        for job in &snapshot.last_finished {
            let _ = writeln!(
                out,
                "  {:>6}  {:<24}  {:<8}  {:<15}  {:<20}  {}",
                job.id,
                job.exp_id,
                job.status.as_str(),
                job.mode.as_str(),
                format_opt_ms(job.started_at_ms),
                format_opt_ms(job.finished_at_ms)
            );
        }
    }
    out
}

/// Every field of one job, error text included.
pub fn render_job(job: &Job) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "job:         {}", job.id);
    let _ = writeln!(out, "exp_id:      {}", job.exp_id);
    let _ = writeln!(out, "root_folder: {}", job.root_folder);
    let _ = writeln!(out, "mode:        {}", job.mode);
    let _ = writeln!(out, "force:       {}", job.force);
    let _ = writeln!(out, "status:      {}", job.status);
    let _ = writeln!(out, "created_at:  {}", format_ms(job.created_at_ms));
    let _ = writeln!(out, "started_at:  {}", format_opt_ms(job.started_at_ms));
    let _ = writeln!(out, "finished_at: {}", format_opt_ms(job.finished_at_ms));
    let _ = writeln!(
        out,
        "log:         {}",
        job.log_path.as_deref().unwrap_or("(none)")
    );
    if let Some(error) = job.error.as_deref() {
        let _ = writeln!(out, "error:\n{error}");
    }
    out
}
