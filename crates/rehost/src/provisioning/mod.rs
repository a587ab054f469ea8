//! Provisioning service (MAAS) access.
//!
//! Machines are looked up by short hostname and renamed in place. Each
//! [`Site`] is a separate MAAS region with its own host and OAuth1 key.

mod client;
mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::MaasClient;
pub use models::{update_form, Machine, MaasApiKey, Site, WEBHOOK_POWER_TYPE};

/// Errors that can occur during provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("MAAS API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// The site has no host or key configured.
    #[error("MAAS site '{site}' is not configured: set {var}")]
    SiteNotConfigured { site: Site, var: &'static str },

    /// The API key is not `consumer:token:secret`.
    #[error("MAAS API key must have the form consumer_key:token_key:token_secret")]
    InvalidApiKey,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Machine lookup and rename in a provisioning service.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Find the machine named `hostname` (short form) at `site`.
    async fn get_machine(
        &self,
        site: Site,
        hostname: &str,
    ) -> Result<Option<Machine>, ProvisioningError>;

    /// Rename machine `machine_id` to `new_hostname` (short form).
    async fn update_machine(
        &self,
        site: Site,
        machine_id: &str,
        new_hostname: &str,
        power_type: &str,
    ) -> Result<Machine, ProvisioningError>;
}
