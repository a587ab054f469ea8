//! MAAS API models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ProvisioningError;

/// Power type whose power control goes through HTTP callbacks.
pub const WEBHOOK_POWER_TYPE: &str = "webhook";

/// MAAS deployment site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    /// Equinix region (default).
    Eq,
    /// UST / PNG Techno region.
    Ust,
}

impl Site {
    /// Pick the site serving `hostname`.
    #[must_use]
    pub fn for_hostname(hostname: &str) -> Self {
        if hostname.contains("pngtechno") {
            Self::Ust
        } else {
            Self::Eq
        }
    }

    /// Lower-case site code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ust => "ust",
        }
    }

    /// Environment variable holding the site host.
    #[must_use]
    pub const fn host_var(self) -> &'static str {
        match self {
            Self::Eq => "MAAS_EQ_HOST",
            Self::Ust => "MAAS_UST_HOST",
        }
    }

    /// Environment variable holding the site API key.
    #[must_use]
    pub const fn api_key_var(self) -> &'static str {
        match self {
            Self::Eq => "MAAS_EQ_MAAS_API_KEY",
            Self::Ust => "MAAS_UST_MAAS_API_KEY",
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A machine record in MAAS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub system_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub power_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A MAAS API key (`consumer_key:token_key:token_secret`).
#[derive(Clone, PartialEq, Eq)]
pub struct MaasApiKey {
    pub consumer_key: String,
    pub token_key: String,
    pub token_secret: String,
}

impl MaasApiKey {
    /// Split a colon-delimited key.
    ///
    /// # Errors
    /// Returns [`ProvisioningError::InvalidApiKey`] unless there are exactly
    /// three non-empty parts.
    pub fn parse(raw: &str) -> Result<Self, ProvisioningError> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        match parts.as_slice() {
            [consumer, token, secret]
                if !consumer.is_empty() && !token.is_empty() && !secret.is_empty() =>
            {
                Ok(Self {
                    consumer_key: (*consumer).to_string(),
                    token_key: (*token).to_string(),
                    token_secret: (*secret).to_string(),
                })
            }
            _ => Err(ProvisioningError::InvalidApiKey),
        }
    }

    /// OAuth1 `Authorization` header value with a PLAINTEXT signature.
    ///
    /// MAAS keys carry no consumer secret, so the signature is `&<token_secret>`.
    #[must_use]
    pub fn authorization(&self, nonce: &str, timestamp: i64) -> String {
        format!(
            "OAuth oauth_version=\"1.0\", oauth_signature_method=\"PLAINTEXT\", \
             oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature=\"&{}\", \
             oauth_nonce=\"{nonce}\", oauth_timestamp=\"{timestamp}\"",
            self.consumer_key, self.token_key, self.token_secret
        )
    }
}

impl std::fmt::Debug for MaasApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaasApiKey")
            .field("consumer_key", &self.consumer_key)
            .field("token_key", &"<redacted>")
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// Form fields for renaming a machine.
///
/// Webhook-powered machines also get their power callbacks rebuilt around
/// the new hostname.
#[must_use]
pub fn update_form(
    new_hostname: &str,
    power_type: &str,
    webhook_base: &str,
) -> Vec<(&'static str, String)> {
    let mut form = vec![("hostname", new_hostname.to_string())];

    if power_type == WEBHOOK_POWER_TYPE {
        let base = webhook_base.trim_end_matches('/');
        form.push((
            "power_parameters_power_on_uri",
            format!("{base}/api/v1/{new_hostname}/power_on_pxe"),
        ));
        form.push((
            "power_parameters_power_off_uri",
            format!("{base}/api/v1/{new_hostname}/power_off_pxe"),
        ));
        form.push((
            "power_parameters_power_query_uri",
            format!("{base}/api/v1/{new_hostname}/power_check_pxe"),
        ));
    }

    form
}
