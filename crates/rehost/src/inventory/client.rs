//! Conductor inventory API client.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{QueryPage, RecordFilter, RecordUpdate, SystemRecord};
use super::{InventoryError, InventoryStore};
use crate::config::{require, InventorySettings};

/// Route of the system record endpoint.
const SYSTEM_DATA_ROUTE: &str = "system_data";

/// Conductor inventory client.
#[derive(Clone)]
pub struct ConductorClient {
    /// HTTP client.
    client: Client,
    /// API base URL without trailing slash.
    base_url: String,
    /// Precomputed `Authorization` header value.
    authorization: String,
    /// `Requester-Origin` header value.
    requester_origin: String,
}

impl ConductorClient {
    /// Create a client from settings.
    ///
    /// # Errors
    /// Returns error if `ATS_SECRET` is missing or the HTTP client cannot be
    /// built.
    pub fn new(settings: &InventorySettings) -> Result<Self, InventoryError> {
        let secret = require(settings.secret.as_ref(), "ATS_SECRET")?;

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(!settings.verify_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            authorization: authorization_value(settings.email.as_deref(), secret),
            requester_origin: settings.requester_origin.clone(),
        })
    }

    /// Send a request with the standard headers and decode the response.
    ///
    /// A body that is not JSON decodes to `null`.
    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        route: &str,
        body: &B,
    ) -> Result<Value, InventoryError> {
        let url = format!("{}/{route}", self.base_url);
        debug!(method = %method, url = %url, "Inventory request");

        let response = self
            .client
            .request(method, &url)
            .header("Package-Version", env!("CARGO_PKG_VERSION"))
            .header("Requester-Origin", &self.requester_origin)
            .header("Authorization", &self.authorization)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let contents = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status == StatusCode::UNAUTHORIZED {
            Err(InventoryError::Unauthorized(text))
        } else if status.is_client_error() || status.is_server_error() {
            Err(InventoryError::Request {
                status: status.as_u16(),
                body: text,
            })
        } else {
            Ok(contents)
        }
    }

    /// GET `route`, passing `filter` as the JSON body.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn get<F: Serialize + ?Sized>(
        &self,
        route: &str,
        filter: &F,
    ) -> Result<Value, InventoryError> {
        self.request(Method::GET, route, filter).await
    }

    /// POST `data` to `route`, dropping `null` fields when `clear_unused`.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn post(
        &self,
        route: &str,
        data: Value,
        clear_unused: bool,
    ) -> Result<Value, InventoryError> {
        let data = if clear_unused { strip_nulls(data) } else { data };
        self.request(Method::POST, route, &data).await
    }

    /// PUT `data` to `route`, dropping `null` fields when `clear_unused`.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn put(
        &self,
        route: &str,
        data: Value,
        clear_unused: bool,
    ) -> Result<Value, InventoryError> {
        let data = if clear_unused { strip_nulls(data) } else { data };
        self.request(Method::PUT, route, &data).await
    }

    /// DELETE the record `id` under `route`.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn delete(&self, route: &str, id: &str) -> Result<Value, InventoryError> {
        self.request(Method::DELETE, route, &serde_json::json!({ "id": id }))
            .await
    }

    /// Query system records and return the service's paging metadata.
    ///
    /// # Errors
    /// Returns error on transport, status or decoding failure.
    pub async fn query_page(
        &self,
        filter: &RecordFilter,
    ) -> Result<QueryPage<SystemRecord>, InventoryError> {
        let filter = RecordFilter {
            return_record_count: Some(true),
            ..filter.clone()
        };
        let value = self.get(SYSTEM_DATA_ROUTE, &filter).await?;
        decode(value)
    }

    /// Insert a new system record.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn insert(&self, record: Value) -> Result<Value, InventoryError> {
        self.post(SYSTEM_DATA_ROUTE, record, true).await
    }

    /// Delete a system record.
    ///
    /// # Errors
    /// Returns error on transport failure or a status of 400 and above.
    pub async fn remove(&self, id: &str) -> Result<Value, InventoryError> {
        self.delete(SYSTEM_DATA_ROUTE, id).await
    }
}

#[async_trait]
impl InventoryStore for ConductorClient {
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<SystemRecord>, InventoryError> {
        let value = self.get(SYSTEM_DATA_ROUTE, filter).await?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => decode(value),
            // Some deployments wrap results even without paging.
            Value::Object(ref map) if map.contains_key("data") => {
                decode::<QueryPage<SystemRecord>>(value).map(|page| page.data)
            }
            Value::Object(_) => decode::<SystemRecord>(value).map(|record| vec![record]),
            other => {
                warn!(body = %other, "Unexpected inventory query response");
                Err(InventoryError::UnexpectedResponse(other.to_string()))
            }
        }
    }

    async fn update(&self, update: &RecordUpdate) -> Result<Value, InventoryError> {
        let data = serde_json::to_value(update)?;
        self.put(SYSTEM_DATA_ROUTE, data, false).await
    }
}

/// `Authorization` value: `email:secret` when an email is known, else the
/// bare secret.
fn authorization_value(email: Option<&str>, secret: &str) -> String {
    match email {
        Some(email) if !email.is_empty() => format!("{email}:{secret}"),
        _ => secret.to_string(),
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, InventoryError> {
    serde_json::from_value(value).map_err(InventoryError::Serialization)
}
