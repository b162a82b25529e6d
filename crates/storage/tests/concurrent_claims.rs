#![forbid(unsafe_code)]

mod support;

use sq_core::model::JobStatus;
use sq_storage::SqliteStore;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use support::{enqueue_n, new_job, temp_db};

fn spawn_claimers(
    db_path: &PathBuf,
    claimers: usize,
    barrier: Arc<Barrier>,
) -> Vec<thread::JoinHandle<Vec<i64>>> {
    (0..claimers)
        .map(|_| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut store = SqliteStore::open(&db_path).expect("open store");
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next().expect("claim") {
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect()
}

#[test]
fn every_queued_row_is_claimed_exactly_once() {
    let db_path = temp_db("every_queued_row_is_claimed_exactly_once");
    let ids = {
        let mut store = SqliteStore::open(&db_path).expect("open store");
        enqueue_n(&mut store, 60)
    };

    let barrier = Arc::new(Barrier::new(4));
    let handles = spawn_claimers(&db_path, 4, barrier);

    let mut all = Vec::new();
    for handle in handles {
        let claimed = handle.join().expect("claimer thread");
        assert!(
            claimed.windows(2).all(|pair| pair[0] < pair[1]),
            "each claimer must see ascending ids: {claimed:?}"
        );
        all.extend(claimed);
    }

    let unique = all.iter().copied().collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), all.len(), "a row was claimed twice: {all:?}");
    assert_eq!(unique, ids.into_iter().collect::<BTreeSet<_>>());

    let store = SqliteStore::open(&db_path).expect("reopen store");
    let counts = store.status_counts().expect("counts");
    assert_eq!(counts.queued, 0);
    assert_eq!(counts.running, 60);
}

#[test]
fn racing_claimers_on_a_single_job_yield_one_winner() {
    let db_path = temp_db("racing_claimers_on_a_single_job");
    let id = {
        let mut store = SqliteStore::open(&db_path).expect("open store");
        store.enqueue(new_job("solo")).expect("enqueue")
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles = (0..2)
        .map(|_| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut store = SqliteStore::open(&db_path).expect("open store");
                barrier.wait();
                store.claim_next().expect("claim").map(|job| job.id)
            })
        })
        .collect::<Vec<_>>();

    let results = handles
        .into_iter()
        .map(|h| h.join().expect("claimer thread"))
        .collect::<Vec<_>>();
    let winners = results.iter().flatten().collect::<Vec<_>>();
    assert_eq!(winners, vec![&id], "results: {results:?}");
    assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
}

#[test]
fn consumer_finishing_each_claim_never_overlaps_running_rows() {
    let db_path = temp_db("consumer_never_overlaps_running_rows");
    {
        let mut store = SqliteStore::open(&db_path).expect("open store");
        enqueue_n(&mut store, 5);
    }

    let producer = {
        let db_path = db_path.clone();
        thread::spawn(move || {
            let mut store = SqliteStore::open(&db_path).expect("open store");
            for i in 0..20 {
                store
                    .enqueue(new_job(&format!("late{i}")))
                    .expect("enqueue");
            }
        })
    };

    let observer = {
        let db_path = db_path.clone();
        thread::spawn(move || {
            let store = SqliteStore::open(&db_path).expect("open store");
            let mut max_running = 0;
            for _ in 0..200 {
                let counts = store.status_counts().expect("counts");
                max_running = max_running.max(counts.running);
            }
            max_running
        })
    };

    let mut store = SqliteStore::open(&db_path).expect("open store");
    let mut processed = 0;
    loop {
        match store.claim_next().expect("claim") {
            Some(job) => {
                store.mark_done(job.id).expect("done");
                processed += 1;
            }
            None if processed >= 25 => break,
            None => thread::yield_now(),
        }
    }

    producer.join().expect("producer thread");
    let max_running = observer.join().expect("observer thread");
    assert!(max_running <= 1, "observed {max_running} running rows");

    let counts = store.status_counts().expect("counts");
    assert_eq!(counts.done, 25);
    assert_eq!(counts.get(JobStatus::Running), 0);
}
