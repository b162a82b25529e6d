#![forbid(unsafe_code)]

use crate::tee::{JobOutput, Tee};
use anyhow::{Context, anyhow, bail};
use sq_core::model::ExtractionMode;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

const STDERR_TAIL_LINES: usize = 20;

/// What a job body gets to see of its job.
#[derive(Clone, Copy, Debug)]
pub(crate) struct JobParams<'a> {
    pub(crate) job_id: i64,
    pub(crate) exp_id: &'a str,
    pub(crate) root_folder: &'a str,
    pub(crate) mode: ExtractionMode,
    pub(crate) force: bool,
    pub(crate) log_path: &'a Path,
}

/// The unit of work the worker executes, synchronously, for one claimed job.
/// Progress goes to `out`; an `Err` marks the job failed with its full cause chain.
///
/// Only `out` reaches the job log. `println!`, `eprintln!` and a child process
/// that inherits the worker's stdio write to the worker's console and are not
/// captured; pipe child output into `out` the way [`CommandBody`] does.
pub(crate) trait JobBody {
    fn run(&self, job: &JobParams<'_>, out: &mut JobOutput) -> anyhow::Result<()>;
}

impl<F> JobBody for F
where
    F: Fn(&JobParams<'_>, &mut JobOutput) -> anyhow::Result<()>,
{
    fn run(&self, job: &JobParams<'_>, out: &mut JobOutput) -> anyhow::Result<()> {
        self(job, out)
    }
}

/// Runs the external extraction program and mirrors its output through the tee.
#[derive(Debug)]
pub(crate) struct CommandBody {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl CommandBody {
    pub(crate) fn new(program: PathBuf, extra_args: Vec<String>) -> Self {
        Self {
            program,
            extra_args,
        }
    }

    fn command_args(&self, job: &JobParams<'_>) -> Vec<OsString> {
        let mut args = self
            .extra_args
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>();
        args.push("--root-folder".into());
        args.push(job.root_folder.into());
        args.push("--mode".into());
        args.push(job.mode.as_str().into());
        args.push("--log-path".into());
        args.push(job.log_path.as_os_str().to_os_string());
        if job.force {
            args.push("--force".into());
        }
        args
    }
}

impl JobBody for CommandBody {
    fn run(&self, job: &JobParams<'_>, out: &mut JobOutput) -> anyhow::Result<()> {
        let mut child = Command::new(&self.program)
            .args(self.command_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn extraction command {}",
                    self.program.display()
                )
            })?;

        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("extraction stdout was not captured"))?;
        let child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("extraction stderr was not captured"))?;

        let (out_tee, err_tee) = out.split();
        let pumped: anyhow::Result<VecDeque<String>> = thread::scope(|scope| {
            let stdout_pump = scope.spawn(move || pump_lines(child_stdout, out_tee, 0));
            let stderr_pump =
                scope.spawn(move || pump_lines(child_stderr, err_tee, STDERR_TAIL_LINES));
            let stdout_result = stdout_pump
                .join()
                .map_err(|_| anyhow!("stdout pump panicked"))?;
            let stderr_result = stderr_pump
                .join()
                .map_err(|_| anyhow!("stderr pump panicked"))?;
            stdout_result.context("copy extraction stdout")?;
            stderr_result.context("copy extraction stderr")
        });

        let status = child.wait().context("wait for extraction command")?;
        let stderr_tail = pumped?;
        if !status.success() {
            let tail = stderr_tail.into_iter().collect::<Vec<_>>().join("\n");
            if tail.is_empty() {
                bail!("extraction command exited with {status}");
            }
            bail!("extraction command exited with {status}; last stderr lines:\n{tail}");
        }
        Ok(())
    }
}

/// Copies `source` into `sink` line by line and returns the last `keep` lines.
fn pump_lines(
    source: impl Read,
    sink: &mut Tee,
    keep: usize,
) -> io::Result<VecDeque<String>> {
    let mut reader = BufReader::new(source);
    let mut tail = VecDeque::with_capacity(keep);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        sink.write_all(&line)?;
        if keep > 0 {
            if tail.len() == keep {
                tail.pop_front();
            }
            let text = String::from_utf8_lossy(&line);
            tail.push_back(text.trim_end().to_string());
        }
    }
    Ok(tail)
}

/// Completes every job immediately; exercises the queue plumbing only.
#[derive(Debug, Default)]
pub(crate) struct DryRunBody;

impl JobBody for DryRunBody {
    fn run(&self, job: &JobParams<'_>, out: &mut JobOutput) -> anyhow::Result<()> {
        writeln!(
            out.stdout(),
            "[dry-run] job={} exp_id={} would extract root={} mode={} force={}",
            job.job_id,
            job.exp_id,
            job.root_folder,
            job.mode,
            job.force
        )?;
        Ok(())
    }
}
