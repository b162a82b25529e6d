#![forbid(unsafe_code)]
#![allow(dead_code)]

use sq_core::model::{ExtractionMode, NewJob};
use std::path::PathBuf;

pub fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sq_queue_{test_name}_{pid}_{nonce}"));
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
