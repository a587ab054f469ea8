//! MAAS 2.0 API client implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::models::{update_form, Machine, MaasApiKey, Site};
use super::{Provisioner, ProvisioningError};
use crate::config::MaasSettings;

/// API prefix under the MAAS host.
const API_PREFIX: &str = "/MAAS/api/2.0";

/// MAAS client covering every configured site.
#[derive(Clone)]
pub struct MaasClient {
    /// HTTP client.
    client: Client,
    /// Per-site hosts and keys plus the webhook base.
    settings: MaasSettings,
}

impl MaasClient {
    /// Create a MAAS client.
    ///
    /// Site credentials are checked when a site is first used.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(settings: MaasSettings) -> Result<Self, ProvisioningError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self { client, settings })
    }

    /// Resolve the host URL and API key of `site`.
    fn endpoint(&self, site: Site) -> Result<(String, MaasApiKey), ProvisioningError> {
        let site_settings = self.settings.site(site);

        let host = site_settings
            .host
            .as_deref()
            .ok_or(ProvisioningError::SiteNotConfigured {
                site,
                var: site.host_var(),
            })?;
        let raw_key = site_settings
            .api_key
            .as_deref()
            .ok_or(ProvisioningError::SiteNotConfigured {
                site,
                var: site.api_key_var(),
            })?;

        Ok((
            format!("{}{API_PREFIX}", host.trim_end_matches('/')),
            MaasApiKey::parse(raw_key)?,
        ))
    }

    /// Attach a freshly signed OAuth header.
    fn sign(request: RequestBuilder, key: &MaasApiKey) -> RequestBuilder {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp();
        request.header("Authorization", key.authorization(&nonce, timestamp))
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProvisioningError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse MAAS response");
                ProvisioningError::Serialization(e)
            })
        } else {
            Err(ProvisioningError::Api {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

#[async_trait]
impl Provisioner for MaasClient {
    async fn get_machine(
        &self,
        site: Site,
        hostname: &str,
    ) -> Result<Option<Machine>, ProvisioningError> {
        let (base, key) = self.endpoint(site)?;
        let url = format!("{base}/machines/");
        debug!(url = %url, hostname, "GET machines");

        let request = self.client.get(&url).query(&[("hostname", hostname)]);
        let response = Self::sign(request, &key).send().await?;
        let machines: Vec<Machine> = Self::handle_response(response).await?;

        Ok(machines.into_iter().next())
    }

    async fn update_machine(
        &self,
        site: Site,
        machine_id: &str,
        new_hostname: &str,
        power_type: &str,
    ) -> Result<Machine, ProvisioningError> {
        let (base, key) = self.endpoint(site)?;
        let url = format!("{base}/machines/{machine_id}/");
        let form = update_form(new_hostname, power_type, &self.settings.webhook_base);

        info!(
            site = %site,
            machine_id,
            new_hostname,
            power_type,
            fields = form.len(),
            "Updating MAAS machine"
        );

        let request = self.client.put(&url).form(&form);
        let response = Self::sign(request, &key).send().await?;
        Self::handle_response(response).await
    }
}
