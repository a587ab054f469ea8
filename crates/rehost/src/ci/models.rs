//! Jenkins API models.

use serde::{Deserialize, Serialize};

/// Folder holding the SUT Auth jobs.
const JOB_FOLDER: &str = "job/At-Scale/job/sut-auth/job";

/// SUT Auth job flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Install the auth agent on the system.
    Install,
    /// Remove the auth agent from the system.
    Uninstall,
}

impl JobKind {
    /// Path of the job relative to the Jenkins root.
    #[must_use]
    pub fn job_path(self) -> String {
        format!("{JOB_FOLDER}/manual-{self}-prod")
    }

    /// Jenkins credential id passed as `SUT_CREDENTIALS`.
    #[must_use]
    pub const fn credentials_id(self) -> &'static str {
        match self {
            Self::Install => "default_-amd__credentials",
            Self::Uninstall => "amd_recovery",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Terminal or pending state of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// No result yet.
    Pending,
    /// `SUCCESS`.
    Success,
    /// Any other result (`FAILURE`, `ABORTED`, `UNSTABLE`, ...).
    Failure(String),
}

/// Build status as returned by `<job>/<number>/api/json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
}

impl JobProgress {
    /// Interpret the `result` field.
    #[must_use]
    pub fn outcome(&self) -> BuildOutcome {
        match self.result.as_deref() {
            None => BuildOutcome::Pending,
            Some("SUCCESS") => BuildOutcome::Success,
            Some(other) => BuildOutcome::Failure(other.to_string()),
        }
    }
}

/// Queue item as returned by `queue/item/<id>/api/json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct QueueItem {
    #[serde(default)]
    pub executable: Option<Executable>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Executable {
    pub number: u64,
}

/// Extract the queue item id from a `Location` header such as
/// `http://jenkins:8080/queue/item/1234/`.
#[must_use]
pub fn queue_item_id(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}
