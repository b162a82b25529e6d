#![forbid(unsafe_code)]

//! Producer and observer side of the extraction queue: snapshots, rendering,
//! and the offset-based log tail used by the `sq_queue` CLI.

pub mod json;
pub mod monitor;
pub mod tail;

pub use monitor::{Monitor, Refresh, Snapshot, SnapshotOptions};
pub use tail::{LogTail, TailChunk};
