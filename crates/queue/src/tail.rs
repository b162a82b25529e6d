#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// How far back the first read of a log reaches.
pub const INITIAL_TAIL_BYTES: u64 = 80_000;

/// Text read by one [`LogTail::read`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailChunk {
    pub text: String,
    /// The tail started over: new path, truncated file, or first read.
    pub reset: bool,
}

/// Incremental reader for a log another process keeps appending to. Each
/// read returns only the bytes appended since the previous one.
#[derive(Debug)]
pub struct LogTail {
    path: Option<PathBuf>,
    offset: Option<u64>,
    window: u64,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTail {
    pub fn new() -> Self {
        Self::with_window(INITIAL_TAIL_BYTES)
    }

    pub fn with_window(window: u64) -> Self {
        Self {
            path: None,
            offset: None,
            window,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Byte offset the next read starts from; `None` until the file was seen.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn read(&mut self, path: &Path) -> io::Result<TailChunk> {
        if self.path.as_deref() != Some(path) {
            self.path = Some(path.to_path_buf());
            self.offset = None;
        }

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.offset = None;
                return Ok(TailChunk::default());
            }
            Err(err) => return Err(err),
        };
        let size = file.metadata()?.len();

        let (start, reset) = match self.offset {
            Some(offset) if offset <= size => (offset, false),
            _ => (size.saturating_sub(self.window), true),
        };
        if start == size {
            self.offset = Some(size);
            return Ok(TailChunk {
                text: String::new(),
                reset,
            });
        }

        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::new();
        // Bounded by the size seen above so a concurrent append is left for the next read.
        file.take(size - start).read_to_end(&mut bytes)?;
        self.offset = Some(start + bytes.len() as u64);

        Ok(TailChunk {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_log(name: &str) -> PathBuf {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "sq_queue_tail_{name}_{}_{nonce}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir.join("job.log")
    }

    #[test]
    fn missing_file_reads_empty_until_it_appears() {
        let path = temp_log("missing");
        let mut tail = LogTail::new();
        assert_eq!(tail.read(&path).expect("read"), TailChunk::default());
        assert_eq!(tail.offset(), None);

        std::fs::write(&path, "hello\n").expect("write");
        let chunk = tail.read(&path).expect("read");
        assert_eq!(chunk.text, "hello\n");
        assert!(chunk.reset);
        assert_eq!(tail.offset(), Some(6));
    }

    #[test]
    fn first_read_is_limited_to_the_window() {
        let path = temp_log("window");
        std::fs::write(&path, "0123456789").expect("write");
        let mut tail = LogTail::with_window(4);
        assert_eq!(tail.read(&path).expect("read").text, "6789");

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"abcdefgh").expect("append");
        assert_eq!(
            tail.read(&path).expect("read").text,
            "abcdefgh",
            "appended bytes are returned in full"
        );
    }

    #[test]
    fn truncated_file_restarts_the_tail() {
        let path = temp_log("truncate");
        std::fs::write(&path, "a long first run\n").expect("write");
        let mut tail = LogTail::new();
        tail.read(&path).expect("read");

        std::fs::write(&path, "new\n").expect("truncate");
        let chunk = tail.read(&path).expect("read");
        assert_eq!(chunk.text, "new\n");
        assert!(chunk.reset);
    }

    #[test]
    fn switching_paths_starts_over() {
        let first = temp_log("switch_a");
        let second = temp_log("switch_b");
        std::fs::write(&first, "job one\n").expect("write");
        std::fs::write(&second, "job two\n").expect("write");

        let mut tail = LogTail::new();
        assert_eq!(tail.read(&first).expect("read").text, "job one\n");
        let chunk = tail.read(&second).expect("read");
        assert_eq!(chunk.text, "job two\n");
        assert!(chunk.reset);
        assert_eq!(tail.path(), Some(second.as_path()));
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let path = temp_log("lossy");
        std::fs::write(&path, b"ok \xff\xfe done\n").expect("write");
        let mut tail = LogTail::new();
        let text = tail.read(&path).expect("read").text;
        assert!(text.starts_with("ok "), "text: {text:?}");
        assert!(text.ends_with(" done\n"), "text: {text:?}");
        assert!(text.contains('\u{FFFD}'), "text: {text:?}");
    }
}
