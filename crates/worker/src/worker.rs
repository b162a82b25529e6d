#![forbid(unsafe_code)]

use crate::body::{JobBody, JobParams};
use crate::tee::{Console, JobOutput};
use anyhow::Context;
use sq_core::clock::format_opt_ms;
use sq_core::layout::QueueLayout;
use sq_core::model::{Job, JobStatus};
use sq_storage::{SqliteStore, StoreError};
use std::any::Any;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

const STORE_ATTEMPTS: u32 = 3;

/// Outcome of one claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tick {
    Idle,
    /// The store could not be read or locked; distinct from an empty queue.
    StoreUnavailable,
    Finished { job_id: i64, status: JobStatus },
    /// The job ran to `outcome` but the store still says otherwise.
    Unrecorded { job_id: i64, outcome: JobStatus },
}

pub(crate) struct Worker {
    store: SqliteStore,
    layout: QueueLayout,
    body: Box<dyn JobBody>,
    poll_interval: Duration,
    echo_console: bool,
}

impl Worker {
    pub(crate) fn new(
        store: SqliteStore,
        layout: QueueLayout,
        body: Box<dyn JobBody>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            body,
            poll_interval,
            echo_console: true,
        }
    }

    /// When off, job output only goes to the per-job log.
    pub(crate) fn echo_console(mut self, echo: bool) -> Self {
        self.echo_console = echo;
        self
    }

    /// A `running` row seen at startup was orphaned by a previous worker. It is
    /// reported, never requeued or failed automatically.
    pub(crate) fn report_stuck_jobs(&self) -> Result<Option<i64>, StoreError> {
        let running = self.store.get_running()?;
        if let Some(job) = &running {
            tracing::warn!(
                job_id = job.id,
                exp_id = %job.exp_id,
                started_at = %format_opt_ms(job.started_at_ms),
                log = job.log_path.as_deref().unwrap_or("(none)"),
                "job is still marked running from a previous worker; resolve it manually"
            );
        }
        Ok(running.map(|job| job.id))
    }

    /// Claims and executes jobs until the process is stopped. With `once`,
    /// returns as soon as the queue is empty. Returns the number of jobs run.
    pub(crate) fn run(&mut self, once: bool) -> usize {
        let mut processed = 0;
        loop {
            match self.tick() {
                Tick::Finished { .. } | Tick::Unrecorded { .. } => processed += 1,
                Tick::Idle | Tick::StoreUnavailable if once => break,
                Tick::Idle | Tick::StoreUnavailable => sleep(self.poll_interval),
            }
        }
        processed
    }

    pub(crate) fn tick(&mut self) -> Tick {
        match self.store.claim_next() {
            Ok(Some(job)) => self.execute(job),
            Ok(None) => {
                tracing::debug!("queue empty");
                Tick::Idle
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "claim skipped: store busy");
                Tick::StoreUnavailable
            }
            Err(err) => {
                tracing::error!(error = %err, "claim failed: store unavailable");
                Tick::StoreUnavailable
            }
        }
    }

    fn execute(&mut self, job: Job) -> Tick {
        let span = tracing::info_span!("job", job_id = job.id, exp_id = %job.exp_id);
        let _entered = span.enter();
        tracing::info!(mode = %job.mode, force = job.force, "job claimed");

        let (log_path, mut output) = match self.open_output(&job) {
            Ok(opened) => opened,
            Err(err) => return self.record_failed(job.id, &format!("{err:?}")),
        };

        match run_body(self.body.as_ref(), &job, &log_path, &mut output) {
            Ok(()) => {
                let _ = writeln!(output.stdout(), "[worker] done job={}", job.id);
                drop(output);
                self.record_done(job.id)
            }
            Err(text) => {
                let _ = writeln!(output.stderr(), "[worker] failed job={}\n{text}", job.id);
                drop(output);
                self.record_failed(job.id, &text)
            }
        }
    }

    /// Publishes the log path, then opens the tee. The path is in the store
    /// before any job output exists.
    fn open_output(&mut self, job: &Job) -> anyhow::Result<(PathBuf, JobOutput)> {
        let logs_dir = self.layout.logs_dir();
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("create log dir {}", logs_dir.display()))?;

        let log_path = self.layout.job_log_path(job.id, &job.exp_id);
        let log_path_text = log_path.to_string_lossy();
        self.with_busy_retry("recording the log path", |store| {
            store.set_log_path(job.id, &log_path_text)
        })
        .context("record job log path")?;

        let (stdout, stderr) = self.consoles();
        let output = JobOutput::open(&log_path, stdout, stderr)
            .with_context(|| format!("open job log {}", log_path.display()))?;
        Ok((log_path, output))
    }

    fn consoles(&self) -> (Console, Console) {
        if self.echo_console {
            (Box::new(io::stdout()), Box::new(io::stderr()))
        } else {
            (Box::new(io::sink()), Box::new(io::sink()))
        }
    }

    fn record_done(&mut self, job_id: i64) -> Tick {
        match self.with_busy_retry("finishing the job", |store| store.mark_done(job_id)) {
            Ok(()) => {
                tracing::info!(status = "done", "job finished");
                Tick::Finished {
                    job_id,
                    status: JobStatus::Done,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "could not record job completion");
                Tick::Unrecorded {
                    job_id,
                    outcome: JobStatus::Done,
                }
            }
        }
    }

    fn record_failed(&mut self, job_id: i64, error_text: &str) -> Tick {
        match self.with_busy_retry("finishing the job", |store| {
            store.mark_failed(job_id, error_text)
        }) {
            Ok(()) => {
                tracing::warn!(status = "failed", error = %first_line(error_text), "job finished");
                Tick::Finished {
                    job_id,
                    status: JobStatus::Failed,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "could not record job failure");
                Tick::Unrecorded {
                    job_id,
                    outcome: JobStatus::Failed,
                }
            }
        }
    }

    /// Lock contention must neither fail a job that has not run nor strand a
    /// finished one in `running`.
    pub(crate) fn with_busy_retry<T>(
        &mut self,
        action: &str,
        mut op: impl FnMut(&mut SqliteStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 1;
        loop {
            match op(&mut self.store) {
                Err(err) if err.is_transient() && attempt < STORE_ATTEMPTS => {
                    tracing::warn!(error = %err, attempt, "store busy while {action}; retrying");
                    attempt += 1;
                    sleep(self.poll_interval);
                }
                other => return other,
            }
        }
    }
}

fn run_body(
    body: &dyn JobBody,
    job: &Job,
    log_path: &Path,
    output: &mut JobOutput,
) -> Result<(), String> {
    let params = JobParams {
        job_id: job.id,
        exp_id: &job.exp_id,
        root_folder: &job.root_folder,
        mode: job.mode,
        force: job.force,
        log_path,
    };

    write_header(output, job).map_err(|err| format!("write job log: {err}"))?;

    match panic::catch_unwind(AssertUnwindSafe(|| body.run(&params, output))) {
        Ok(Ok(())) => Ok(()),
        // Alternate debug: the message followed by every cause.
        Ok(Err(err)) => Err(format!("{err:?}")),
        Err(payload) => Err(format!("job body panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn write_header(output: &mut JobOutput, job: &Job) -> io::Result<()> {
    writeln!(
        output.stdout(),
        "[worker] running job={} exp_id={}",
        job.id, job.exp_id
    )?;
    writeln!(
        output.stdout(),
        "[worker] root={} mode={} force={}",
        job.root_folder, job.mode, job.force
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
