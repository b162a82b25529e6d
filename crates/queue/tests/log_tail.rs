#![forbid(unsafe_code)]

mod support;

use sq_core::layout::QueueLayout;
use sq_queue::monitor::{Monitor, SnapshotOptions};
use sq_queue::tail::LogTail;
use sq_storage::SqliteStore;
use std::fs::OpenOptions;
use std::io::Write;
use support::{new_job, temp_db, temp_dir};

#[test]
fn appended_lines_are_returned_exactly_once() {
    let log_path = temp_dir("appended_lines").join("job_000001_m01.log");
    let mut writer = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("open log");
    let mut tail = LogTail::new();

    writer.write_all(b"line1\n").expect("append line1");
    writer.flush().expect("flush");
    assert_eq!(tail.read(&log_path).expect("read").text, "line1\n");

    writer.write_all(b"line2\n").expect("append line2");
    writer.flush().expect("flush");
    assert_eq!(tail.read(&log_path).expect("read").text, "line2\n");

    assert_eq!(tail.read(&log_path).expect("read").text, "");
}

#[test]
fn long_log_first_read_starts_near_the_end() {
    let log_path = temp_dir("long_log").join("job.log");
    let line = "x".repeat(99) + "\n";
    std::fs::write(&log_path, line.repeat(2_000)).expect("write log");

    let mut tail = LogTail::new();
    let chunk = tail.read(&log_path).expect("read");
    assert_eq!(chunk.text.len(), 80_000);
    assert!(chunk.reset);
    assert_eq!(tail.offset(), Some(200_000));
}

#[test]
fn monitor_follows_running_job_log_and_falls_back_to_worker_stdout() {
    let db_path = temp_db("monitor_follows_log");
    let layout = QueueLayout::new(&db_path);
    let mut producer = SqliteStore::open(&db_path).expect("open producer");
    let id = producer.enqueue(new_job("m01")).expect("enqueue");

    std::fs::write(layout.worker_stdout_path(), "[worker] idle\n").expect("worker stdout");
    let mut monitor = Monitor::new(
        SqliteStore::open(&db_path).expect("open monitor"),
        layout.clone(),
        SnapshotOptions::default(),
    );

    let idle = monitor.refresh().expect("refresh");
    assert_eq!(idle.log_source, Some(layout.worker_stdout_path()));
    assert_eq!(idle.log, "[worker] idle\n");
    let snapshot = idle.snapshot.expect("first refresh renders");
    assert!(snapshot.starts_with("RUNNING: (none)\n"), "{snapshot}");

    // Worker side: claim, publish the log path, append output.
    let mut worker = SqliteStore::open(&db_path).expect("open worker");
    worker.claim_next().expect("claim").expect("job");
    let job_log = layout.job_log_path(id, "m01");
    std::fs::create_dir_all(layout.logs_dir()).expect("logs dir");
    worker
        .set_log_path(id, &job_log.to_string_lossy())
        .expect("set log path");
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&job_log)
        .expect("open job log");
    log.write_all(b"line1\n").expect("append");

    let running = monitor.refresh().expect("refresh");
    assert_eq!(running.log_source.as_deref(), Some(job_log.as_path()));
    assert_eq!(running.log, "line1\n");
    let snapshot = running.snapshot.expect("state changed");
    assert!(snapshot.starts_with(&format!("RUNNING: job={id} exp_id=m01")), "{snapshot}");

    log.write_all(b"line2\n").expect("append");
    let next = monitor.refresh().expect("refresh");
    assert_eq!(next.snapshot, None, "unchanged snapshot is not re-rendered");
    assert_eq!(next.log_source, None);
    assert_eq!(next.log, "line2\n");

    worker.mark_done(id).expect("done");
    let finished = monitor.refresh().expect("refresh");
    assert_eq!(finished.log_source, Some(layout.worker_stdout_path()));
    let snapshot = finished.snapshot.expect("state changed");
    assert!(snapshot.contains("LAST FINISHED (1)"), "{snapshot}");
}
