#![forbid(unsafe_code)]

pub mod layout;

pub mod model {
    use serde::Serialize;
    use std::fmt;
    use std::str::FromStr;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum JobStatus {
        Queued,
        Running,
        Done,
        Failed,
        Canceled,
    }

    impl JobStatus {
        pub const ALL: [JobStatus; 5] = [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Canceled,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                JobStatus::Queued => "queued",
                JobStatus::Running => "running",
                JobStatus::Done => "done",
                JobStatus::Failed => "failed",
                JobStatus::Canceled => "canceled",
            }
        }

        pub fn is_terminal(self) -> bool {
            matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
        }

        /// Legal lifecycle edges: queued -> running -> {done, failed} and queued -> canceled.
        pub fn can_transition_to(self, next: JobStatus) -> bool {
            matches!(
                (self, next),
                (JobStatus::Queued, JobStatus::Running)
                    | (JobStatus::Queued, JobStatus::Canceled)
                    | (JobStatus::Running, JobStatus::Done)
                    | (JobStatus::Running, JobStatus::Failed)
            )
        }
    }

    impl fmt::Display for JobStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
    #[error("unknown job status: {0:?}")]
    pub struct ParseStatusError(pub String);

    impl FromStr for JobStatus {
        type Err = ParseStatusError;

        fn from_str(raw: &str) -> Result<Self, Self::Err> {
            let lowered = raw.trim().to_ascii_lowercase();
            JobStatus::ALL
                .into_iter()
                .find(|status| status.as_str() == lowered)
                .ok_or_else(|| ParseStatusError(raw.to_string()))
        }
    }

    /// Parameterization forwarded verbatim to the extraction body.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ExtractionMode {
        #[default]
        Normal,
        DendritesAxons,
    }

    impl ExtractionMode {
        pub fn as_str(self) -> &'static str {
            match self {
                ExtractionMode::Normal => "normal",
                ExtractionMode::DendritesAxons => "dendrites_axons",
            }
        }
    }

    impl fmt::Display for ExtractionMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
    #[error("unknown extraction mode: {0:?} (expected normal or dendrites_axons)")]
    pub struct ParseModeError(pub String);

    impl FromStr for ExtractionMode {
        type Err = ParseModeError;

        fn from_str(raw: &str) -> Result<Self, Self::Err> {
            match raw.trim() {
                "normal" => Ok(ExtractionMode::Normal),
                "dendrites_axons" => Ok(ExtractionMode::DendritesAxons),
                _ => Err(ParseModeError(raw.to_string())),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct NewJob {
        pub exp_id: String,
        pub root_folder: String,
        pub mode: ExtractionMode,
        pub force: bool,
    }

    impl NewJob {
        pub fn new(
            exp_id: impl Into<String>,
            root_folder: impl Into<String>,
            mode: ExtractionMode,
            force: bool,
        ) -> Self {
            Self {
                exp_id: exp_id.into(),
                root_folder: root_folder.into(),
                mode,
                force,
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    pub struct Job {
        pub id: i64,
        pub exp_id: String,
        pub root_folder: String,
        pub mode: ExtractionMode,
        pub force: bool,
        pub status: JobStatus,
        pub created_at_ms: i64,
        pub started_at_ms: Option<i64>,
        pub finished_at_ms: Option<i64>,
        pub log_path: Option<String>,
        pub error: Option<String>,
    }

    impl Job {
        /// Checks the timestamp/status coupling every persisted row must satisfy.
        pub fn timestamps_consistent(&self) -> bool {
            let started_expected = matches!(
                self.status,
                JobStatus::Running | JobStatus::Done | JobStatus::Failed
            );
            self.started_at_ms.is_some() == started_expected
                && self.finished_at_ms.is_some() == self.status.is_terminal()
        }
    }
}

pub mod clock {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis()
            .min(i64::MAX as u128) as i64
    }

    /// Renders epoch milliseconds as RFC 3339 (UTC). Out-of-range values fall back to the raw number.
    pub fn format_ms(ms: i64) -> String {
        let nanos = i128::from(ms) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|ts| ts.format(&Rfc3339).ok())
            .unwrap_or_else(|| ms.to_string())
    }

    pub fn format_opt_ms(ms: Option<i64>) -> String {
        ms.map(format_ms).unwrap_or_default()
    }
}
