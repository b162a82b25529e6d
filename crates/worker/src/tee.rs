#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub(crate) type Console = Box<dyn Write + Send>;

/// One console stream mirrored into the job log. Every write is flushed to
/// both sides before returning so a monitor tailing the file sees it at once.
pub(crate) struct Tee {
    console: Console,
    log: Arc<Mutex<File>>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A broken console must not fail the job; the log file is authoritative.
        let _ = self
            .console
            .write_all(buf)
            .and_then(|()| self.console.flush());

        let mut log = self
            .log
            .lock()
            .map_err(|_| io::Error::other("job log lock poisoned"))?;
        log.write_all(buf)?;
        log.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        let mut log = self
            .log
            .lock()
            .map_err(|_| io::Error::other("job log lock poisoned"))?;
        log.flush()
    }
}

/// Output handles given to a job body. Dropping it leaves the console as the
/// only destination again.
pub(crate) struct JobOutput {
    stdout: Tee,
    stderr: Tee,
}

impl JobOutput {
    pub(crate) fn open(log_path: &Path, stdout: Console, stderr: Console) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;
        let log = Arc::new(Mutex::new(file));
        Ok(Self {
            stdout: Tee {
                console: stdout,
                log: Arc::clone(&log),
            },
            stderr: Tee {
                console: stderr,
                log,
            },
        })
    }

    pub(crate) fn stdout(&mut self) -> &mut Tee {
        &mut self.stdout
    }

    pub(crate) fn stderr(&mut self) -> &mut Tee {
        &mut self.stderr
    }

    /// Both streams at once, for bodies that pump them from separate threads.
    pub(crate) fn split(&mut self) -> (&mut Tee, &mut Tee) {
        (&mut self.stdout, &mut self.stderr)
    }
}
