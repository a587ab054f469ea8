//! Jenkins API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::LOCATION, Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::models::{queue_item_id, JobKind, JobProgress, QueueItem};
use super::{CiError, JobRunner};
use crate::config::{require, JenkinsSettings};
use crate::hostname::Hostname;

/// Jenkins client for the SUT Auth jobs.
#[derive(Clone)]
pub struct JenkinsClient {
    /// HTTP client.
    client: Client,
    /// Jenkins root URL.
    base_url: String,
    /// Basic auth user.
    user: String,
    /// Basic auth API token.
    token: String,
    /// Cap on waiting for a queued build to get a number.
    queue_timeout: Duration,
    /// Delay between queue polls.
    queue_poll_interval: Duration,
}

impl JenkinsClient {
    /// Create a Jenkins client.
    ///
    /// # Errors
    /// Returns error if credentials are missing or the HTTP client cannot be
    /// created.
    pub fn new(settings: &JenkinsSettings) -> Result<Self, CiError> {
        let user = require(settings.user.as_ref(), "JENKINS_USER")?;
        let token = require(settings.token.as_ref(), "JENKINS_CREDS")?;

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            token: token.to_string(),
            queue_timeout: settings.queue_timeout,
            queue_poll_interval: settings.queue_poll_interval,
        })
    }

    /// Make an authenticated GET request.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CiError> {
        let url = format!("{}/{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.token))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse Jenkins response");
                CiError::Serialization(e)
            })
        } else {
            Err(CiError::Api {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    /// Poll a queue item until Jenkins assigns it a build number.
    async fn wait_for_build_number(&self, queue_id: u64) -> Result<u64, CiError> {
        let start = tokio::time::Instant::now();
        let path = format!("queue/item/{queue_id}/api/json");

        loop {
            let item: QueueItem = self.get(&path).await?;

            if let Some(executable) = item.executable {
                return Ok(executable.number);
            }
            if item.cancelled {
                return Err(CiError::QueueCancelled(queue_id));
            }

            debug!(
                queue_id,
                elapsed_ms = start.elapsed().as_millis(),
                "Build not scheduled yet"
            );

            if start.elapsed() >= self.queue_timeout {
                return Err(CiError::QueueTimeout {
                    queue_id,
                    secs: self.queue_timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.queue_poll_interval).await;
        }
    }
}

#[async_trait]
impl JobRunner for JenkinsClient {
    async fn trigger(&self, kind: JobKind, hostname: &Hostname) -> Result<Option<u64>, CiError> {
        let url = format!("{}/{}/buildWithParameters", self.base_url, kind.job_path());
        info!(job = %kind, hostname = %hostname, "Triggering SUT Auth job");

        let params = [
            ("SUT_HOSTNAME", hostname.as_str()),
            ("SUT_CREDENTIALS", kind.credentials_id()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.token))
            .form(&params)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(job = %kind, status = status.as_u16(), body = %body, "Job trigger rejected");
            return Ok(None);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CiError::MissingQueueLocation(String::new()))?;

        let queue_id = queue_item_id(&location)
            .ok_or_else(|| CiError::MissingQueueLocation(location.clone()))?;
        debug!(job = %kind, queue_id, location = %location, "Job queued");

        let build = self.wait_for_build_number(queue_id).await?;
        info!(job = %kind, build, "Job started");
        Ok(Some(build))
    }

    async fn job_progress(&self, kind: JobKind, build: u64) -> Result<JobProgress, CiError> {
        self.get(&format!("{}/{build}/api/json", kind.job_path()))
            .await
    }
}
