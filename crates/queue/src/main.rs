#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use sq_core::layout::{QueueLayout, default_db_path};
use sq_core::model::{ExtractionMode, NewJob};
use sq_queue::json::{job_to_json, snapshot_to_json};
use sq_queue::monitor::{
    DEFAULT_LAST_FINISHED, DEFAULT_QUEUED_LIMIT, Monitor, Snapshot, SnapshotOptions, render_job,
    render_snapshot,
};
use sq_queue::tail::LogTail;
use sq_storage::SqliteStore;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// sq_queue: enqueue, cancel and watch extraction jobs.
#[derive(Parser, Debug)]
#[command(name = "sq_queue", version)]
#[command(about = "Producer and monitor for the extraction job queue", long_about = None)]
struct Cli {
    /// Queue database file (default: $HOME/.spinesq/queue/jobs.sqlite)
    #[arg(long = "db", env = "SQ_DB", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a job to the end of the queue and print its id
    Enqueue {
        #[arg(long = "exp-id")]
        exp_id: String,
        #[arg(long = "root-folder")]
        root_folder: String,
        #[arg(long = "mode", default_value = "normal")]
        mode: ExtractionMode,
        #[arg(long = "force")]
        force: bool,
    },
    /// Cancel jobs that have not started yet
    Cancel {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Print one snapshot of the queue
    Status {
        #[arg(long = "json")]
        json: bool,
        #[command(flatten)]
        snapshot: SnapshotArgs,
    },
    /// Print one job, including its error text
    Show {
        id: i64,
        #[arg(long = "json")]
        json: bool,
    },
    /// Refresh the snapshot and follow the current log
    Monitor {
        #[arg(long = "refresh-ms", default_value_t = 1000)]
        refresh_ms: u64,
        /// Render a single refresh, then exit
        #[arg(long = "once")]
        once: bool,
        #[command(flatten)]
        snapshot: SnapshotArgs,
    },
    /// Print a job's log
    Tail {
        id: i64,
        /// Keep printing appended output until the job finishes
        #[arg(long = "follow", short = 'f')]
        follow: bool,
        #[arg(long = "refresh-ms", default_value_t = 1000)]
        refresh_ms: u64,
    },
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    #[arg(long = "queued-limit", default_value_t = DEFAULT_QUEUED_LIMIT)]
    queued_limit: usize,
    #[arg(long = "last", default_value_t = DEFAULT_LAST_FINISHED)]
    last: usize,
}

impl SnapshotArgs {
    fn options(&self) -> SnapshotOptions {
        SnapshotOptions {
            queued_limit: self.queued_limit,
            last_finished: self.last,
        }
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
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let mut store = SqliteStore::open(&db_path)
        .with_context(|| format!("open job store {}", db_path.display()))?;

    match cli.command {
        Command::Enqueue {
            exp_id,
            root_folder,
            mode,
            force,
        } => {
            let id = store
                .enqueue(NewJob::new(exp_id, root_folder, mode, force))
                .context("enqueue job")?;
            tracing::debug!(job_id = id, "job enqueued");
            println!("{id}");
        }
        Command::Cancel { ids } => {
            for id in ids {
                if store.cancel(id).with_context(|| format!("cancel job {id}"))? {
                    println!("{id}: canceled");
                } else {
                    println!("{id}: not queued (ignored)");
                }
            }
        }
        Command::Status { json, snapshot } => {
            let snapshot = Snapshot::collect(&store, &snapshot.options())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot_to_json(&snapshot))?);
            } else {
                print!("{}", render_snapshot(&snapshot));
            }
        }
        Command::Show { id, json } => {
            let job = store.get(id)?.ok_or_else(|| anyhow!("no job with id {id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job_to_json(&job))?);
            } else {
                print!("{}", render_job(&job));
            }
        }
        Command::Monitor {
            refresh_ms,
            once,
            snapshot,
        } => {
            let layout = QueueLayout::new(&db_path);
            let monitor = Monitor::new(store, layout, snapshot.options());
            run_monitor(monitor, Duration::from_millis(refresh_ms), once)?;
        }
        Command::Tail {
            id,
            follow,
            refresh_ms,
        } => tail_job(&store, id, follow, Duration::from_millis(refresh_ms))?,
    }
    Ok(())
}

fn run_monitor(mut monitor: Monitor, interval: Duration, once: bool) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    loop {
        match monitor.refresh() {
            Ok(refresh) => {
                if let Some(snapshot) = refresh.snapshot {
                    writeln!(stdout, "{}\n{snapshot}", "=".repeat(72))?;
                }
                if let Some(source) = refresh.log_source {
                    writeln!(stdout, "--- LOG: {} ---", source.display())?;
                }
                stdout.write_all(refresh.log.as_bytes())?;
                stdout.flush()?;
            }
            // The worker holding the writer lock is not fatal for a reader.
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "store busy; skipping refresh");
            }
            Err(err) => return Err(err).context("refresh queue snapshot"),
        }
        if once {
            return Ok(());
        }
        sleep(interval);
    }
}

fn tail_job(store: &SqliteStore, id: i64, follow: bool, interval: Duration) -> anyhow::Result<()> {
    let mut tail = LogTail::new();
    let mut stdout = std::io::stdout().lock();
    loop {
        let job = store.get(id)?.ok_or_else(|| anyhow!("no job with id {id}"))?;
        if let Some(log_path) = job.log_path.as_deref() {
            let chunk = tail
                .read(Path::new(log_path))
                .with_context(|| format!("read log {log_path}"))?;
            stdout.write_all(chunk.text.as_bytes())?;
            stdout.flush()?;
        } else if !follow {
            eprintln!("job {id} has no log yet (status {})", job.status);
        }
        // One last read after the job is terminal picks up its footer.
        if !follow || job.status.is_terminal() {
            return Ok(());
        }
        sleep(interval);
    }
}
