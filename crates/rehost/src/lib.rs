//! Hostname migration for lab systems.
//!
//! Renaming a system touches every service that knows it by name: the
//! inventory (Conductor), the provisioning service (MAAS), the SUT Auth CI
//! jobs (Jenkins), the operating system itself and any BMC, PiKVM or
//! Raspberry Pi power controller wired to it. [`Migration`] drives those
//! steps in order through the trait seams below, so each backend can be
//! replaced in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use rehost::{Collaborators, Migration, MigrationRequest, Settings};
//!
//! let settings = Settings::from_env()?;
//! let services = Collaborators { /* real clients */ };
//! let migration = Migration::new(services, settings.migration.clone());
//!
//! let request = MigrationRequest::parse("host-a.site.dcgpu", "host-b.site.dcgpu")?;
//! let report = migration.run(&request).await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ci;
pub mod config;
pub mod controllers;
pub mod hostname;
pub mod inventory;
pub mod logging;
pub mod migration;
pub mod provisioning;
pub mod shell;

pub use ci::{JenkinsClient, JobKind, JobRunner};
pub use config::{ConfigError, Settings};
pub use controllers::{ControllerRenamer, RedfishApi, RedfishClient};
pub use hostname::{Hostname, HostnameError};
pub use inventory::{ConductorClient, InventoryStore, SystemRecord};
pub use migration::{Collaborators, Migration, MigrationError, MigrationReport, MigrationRequest};
pub use provisioning::{MaasClient, Provisioner, Site};
pub use shell::{Credentials, ShellConnector, SshConnector};
