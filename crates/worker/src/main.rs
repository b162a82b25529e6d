#![forbid(unsafe_code)]

mod bin_detect;
mod body;
mod lock;
mod tee;
mod worker;


use anyhow::{Context, anyhow};
use body::{CommandBody, DryRunBody, JobBody};
use clap::Parser;
use lock::WorkerLock;
use sq_core::clock::{format_ms, now_ms};
use sq_core::layout::{QueueLayout, default_db_path};
use sq_storage::{SqliteStore, StoreOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use worker::Worker;

/// sq_worker: executes queued extraction jobs one at a time.
#[derive(Parser, Debug)]
#[command(name = "sq_worker", version)]
#[command(about = "Background consumer for the extraction job queue", long_about = None)]
struct Cli {
    /// Queue database file (default: $HOME/.spinesq/queue/jobs.sqlite)
    #[arg(long = "db", env = "SQ_DB")]
    db: Option<PathBuf>,

    /// Idle poll interval in milliseconds
    #[arg(long = "poll-ms", env = "SQ_POLL_MS", default_value_t = 2000)]
    poll_ms: u64,

    /// How long a store call waits for the writer lock, in milliseconds
    #[arg(long = "busy-timeout-ms", default_value_t = 30_000)]
    busy_timeout_ms: u64,

    /// Extraction program, as a path or a name on $PATH
    #[arg(
        long = "extract-cmd",
        env = "SQ_EXTRACT_CMD",
        required_unless_present = "dry_run"
    )]
    extract_cmd: Option<String>,

    /// Extra leading argument for the extraction program (repeatable)
    #[arg(long = "extract-arg", allow_hyphen_values = true)]
    extract_arg: Vec<String>,

    /// Complete every job without running anything
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Drain the queue, then exit
    #[arg(long = "once")]
    once: bool,
}

impl Cli {
    fn body(&self) -> anyhow::Result<Box<dyn JobBody>> {
        if self.dry_run {
            return Ok(Box::new(DryRunBody));
        }
        let cmd = self
            .extract_cmd
            .as_deref()
            .ok_or_else(|| anyhow!("--extract-cmd is required unless --dry-run is set"))?;
        let program = bin_detect::resolve_command(cmd)
            .ok_or_else(|| anyhow!("extraction command not found or not executable: {cmd}"))?;
        Ok(Box::new(CommandBody::new(program, self.extract_arg.clone())))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let body = cli.body()?;

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let layout = QueueLayout::new(&db_path);
    let lock = WorkerLock::acquire(&layout.worker_pid_path())?;

    let store = SqliteStore::open_with(
        &db_path,
        StoreOptions {
            busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
        },
    )
    .with_context(|| format!("open job store {}", db_path.display()))?;

    tracing::info!(
        db = %db_path.display(),
        lock = %lock.path().display(),
        started_at = %format_ms(now_ms()),
        dry_run = cli.dry_run,
        "worker started"
    );

    let mut worker = Worker::new(store, layout, body, Duration::from_millis(cli.poll_ms));
    if let Err(err) = worker.report_stuck_jobs() {
        tracing::warn!(error = %err, "could not check for stuck jobs");
    }

    let processed = worker.run(cli.once);
    tracing::info!(processed, "worker stopped");
    drop(lock);
    Ok(())
}
