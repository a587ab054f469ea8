//! Inventory service (Conductor) access.
//!
//! Conductor is the system of record for lab machines. The migration reads a
//! [`SystemRecord`] by hostname, edits a local copy and writes the renamed
//! fields back with a partial [`RecordUpdate`].
//!
//! Remote failures are always returned as [`InventoryError`]; an empty query
//! result is `Ok(vec![])`, so callers can tell "not found" from "broken".

mod client;
mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::ConductorClient;
pub use models::{
    ControllerKind, Platform, PlatformConfig, PowerController, QueryPage, RecordFilter,
    RecordUpdate, SystemRecord,
};

use crate::config::ConfigError;

/// Errors returned by the inventory service.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service rejected our credentials (HTTP 401).
    #[error("inventory authorization failed: {0}")]
    Unauthorized(String),

    /// The service returned another error status.
    #[error("inventory request failed: {status} - {body}")]
    Request { status: u16, body: String },

    /// The response had an unexpected shape.
    #[error("unexpected inventory response: {0}")]
    UnexpectedResponse(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Read and write access to system records.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Return every record matching `filter` (possibly none).
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<SystemRecord>, InventoryError>;

    /// Write the fields present in `update` to the record it identifies.
    async fn update(&self, update: &RecordUpdate) -> Result<serde_json::Value, InventoryError>;
}
