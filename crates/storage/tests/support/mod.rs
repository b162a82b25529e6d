#![forbid(unsafe_code)]
#![allow(dead_code)]

use sq_core::model::{ExtractionMode, NewJob};
use sq_storage::SqliteStore;
use std::path::PathBuf;

pub fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sq_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn temp_db(test_name: &str) -> PathBuf {
    temp_dir(test_name).join("jobs.sqlite")
}

pub fn new_job(exp_id: &str) -> NewJob {
    NewJob::new(
        exp_id,
        format!("/data/{exp_id}"),
        ExtractionMode::Normal,
        false,
    )
}

pub fn enqueue_n(store: &mut SqliteStore, n: usize) -> Vec<i64> {
    (0..n)
        .map(|i| store.enqueue(new_job(&format!("exp{i}"))).expect("enqueue"))
        .collect()
}
