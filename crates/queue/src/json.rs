#![forbid(unsafe_code)]

use crate::monitor::Snapshot;
use serde_json::{Value, json};
use sq_core::clock::format_ms;
use sq_core::model::{Job, JobStatus};

/// The serialized row plus RFC 3339 renderings of its timestamps.
pub fn job_to_json(job: &Job) -> Value {
    let mut out = serde_json::to_value(job).unwrap_or_else(|_| json!({ "id": job.id }));
    if let Some(obj) = out.as_object_mut() {
        let stamps = [
            ("created_at", Some(job.created_at_ms)),
            ("started_at", job.started_at_ms),
            ("finished_at", job.finished_at_ms),
        ];
        for (key, ms) in stamps {
            obj.insert(key.to_string(), ms.map(format_ms).map_or(Value::Null, Value::from));
        }
    }
    out
}

pub fn snapshot_to_json(snapshot: &Snapshot) -> Value {
    let counts = JobStatus::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), json!(snapshot.counts.get(*status))))
        .collect::<serde_json::Map<_, _>>();
    json!({
        "running": snapshot.running.as_ref().map(job_to_json),
        "queued": snapshot.queued.iter().map(job_to_json).collect::<Vec<_>>(),
        "last_finished": snapshot.last_finished.iter().map(job_to_json).collect::<Vec<_>>(),
        "counts": counts
    })
}
