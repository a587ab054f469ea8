//! CI job runner (Jenkins) access.
//!
//! The SUT Auth agent must be removed before a system is renamed and
//! installed again afterwards. Both are parameterized Jenkins jobs; a trigger
//! goes through the build queue before it gets a build number.

mod client;
mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::JenkinsClient;
pub use models::{queue_item_id, BuildOutcome, JobKind, JobProgress};

use crate::config::ConfigError;
use crate::hostname::Hostname;

/// Errors returned by the CI system.
#[derive(Debug, Error)]
pub enum CiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("Jenkins API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// A triggered job did not report a usable queue location.
    #[error("Jenkins did not return a queue location (got '{0}')")]
    MissingQueueLocation(String),

    /// The queue item never received a build number.
    #[error("queue item {queue_id} not scheduled after {secs} seconds")]
    QueueTimeout { queue_id: u64, secs: u64 },

    /// The queue item was cancelled before it started.
    #[error("queue item {0} was cancelled")]
    QueueCancelled(u64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Triggering and tracking SUT Auth jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Trigger `kind` for `hostname` and wait for its build number.
    ///
    /// Returns `Ok(None)` when the CI system refuses the trigger.
    async fn trigger(&self, kind: JobKind, hostname: &Hostname) -> Result<Option<u64>, CiError>;

    /// Current status of build `build` of `kind`.
    async fn job_progress(&self, kind: JobKind, build: u64) -> Result<JobProgress, CiError>;

    /// Trigger an install of the auth agent.
    async fn install(&self, hostname: &Hostname) -> Result<Option<u64>, CiError> {
        self.trigger(JobKind::Install, hostname).await
    }

    /// Trigger an uninstall of the auth agent.
    async fn uninstall(&self, hostname: &Hostname) -> Result<Option<u64>, CiError> {
        self.trigger(JobKind::Uninstall, hostname).await
    }
}
