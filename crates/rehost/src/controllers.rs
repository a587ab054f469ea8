//! Renaming of auxiliary power controllers.
//!
//! A system can carry BMC, PiKVM and Raspberry Pi controllers whose DNS names
//! follow the system's short name (`bmc-<short>`, `pikvm-<short>`,
//! `rpi-<short>`). When the system is renamed, each device is renamed too and
//! the inventory descriptor is updated to the new address.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hostname::Hostname;
use crate::inventory::{ControllerKind, PowerController, SystemRecord};
use crate::shell::{run_session, Credentials, ShellConnector, ShellError, ShellStep};

/// Redfish resource holding the BMC network identity on Asrock boards.
const REDFISH_INTERFACE_PATH: &str = "/redfish/v1/Managers/Self/EthernetInterfaces/bond0";

/// Status returned by the BMC when the change is accepted.
const ACCEPTED: u16 = 202;

/// Errors raised while renaming a controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The descriptor lacks a username or password.
    #[error("power controller {address} has no credentials in inventory")]
    MissingCredentials { address: String },

    /// The Redfish request could not be sent.
    #[error("Redfish request to {address} failed: {source}")]
    Redfish {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    /// An SSH step failed.
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Redfish operations used on BMCs.
#[async_trait]
pub trait RedfishApi: Send + Sync {
    /// Set the BMC host name and return the HTTP status code.
    async fn set_hostname(
        &self,
        address: &str,
        credentials: &Credentials,
        hostname: &str,
    ) -> Result<u16, ControllerError>;
}

/// Redfish HTTP client.
#[derive(Clone)]
pub struct RedfishClient {
    client: Client,
    scheme: &'static str,
}

impl RedfishClient {
    /// Create a client for HTTPS BMCs.
    ///
    /// Certificates are not verified: BMCs ship self-signed ones.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Talk plain HTTP instead (test doubles).
    #[must_use]
    pub const fn insecure_http(mut self) -> Self {
        self.scheme = "http";
        self
    }
}

#[async_trait]
impl RedfishApi for RedfishClient {
    async fn set_hostname(
        &self,
        address: &str,
        credentials: &Credentials,
        hostname: &str,
    ) -> Result<u16, ControllerError> {
        let url = format!("{}://{address}{REDFISH_INTERFACE_PATH}", self.scheme);
        debug!(url = %url, hostname, "PATCH Redfish interface");

        let response = self
            .client
            .patch(&url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .json(&json!({ "HostName": hostname }))
            .send()
            .await
            .map_err(|source| ControllerError::Redfish {
                address: address.to_string(),
                source,
            })?;

        Ok(response.status().as_u16())
    }
}

/// What happened to one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerOutcome {
    /// The device was renamed and its descriptor now points at this address.
    Renamed(String),
    /// The BMC answered with a status other than 202.
    Rejected { status: u16 },
    /// Nothing to do for this descriptor.
    Skipped(&'static str),
}

/// Per-controller result, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerReport {
    pub kind: ControllerKind,
    pub old_address: String,
    pub outcome: ControllerOutcome,
}

/// Renames every controller attached to a record.
pub struct ControllerRenamer<'a> {
    redfish: &'a dyn RedfishApi,
    connector: &'a dyn ShellConnector,
    domain: &'a str,
}

impl<'a> ControllerRenamer<'a> {
    #[must_use]
    pub fn new(
        redfish: &'a dyn RedfishApi,
        connector: &'a dyn ShellConnector,
        domain: &'a str,
    ) -> Self {
        Self {
            redfish,
            connector,
            domain,
        }
    }

    /// Rename all controllers of `record` after `new` and update the
    /// descriptors (and notes) in place.
    ///
    /// # Errors
    /// Stops at the first controller that cannot be reached.
    pub async fn rename_all(
        &self,
        record: &mut SystemRecord,
        new: &Hostname,
    ) -> Result<Vec<ControllerReport>, ControllerError> {
        let asrock = record.is_asrock_platform();
        let config = &mut record.platform_config;
        let mut reports = Vec::with_capacity(config.power_controllers.len());

        for index in 0..config.power_controllers.len() {
            let controller = config.power_controllers[index].clone();
            let outcome = self.rename_one(&controller, asrock, new).await?;

            if let ControllerOutcome::Renamed(new_address) = &outcome {
                config.power_controllers[index].set_address(new_address.clone());
                if matches!(controller.kind(), ControllerKind::PiKvm | ControllerKind::Rpi) {
                    config.replace_in_notes(controller.address(), new_address);
                }
            }

            reports.push(ControllerReport {
                kind: controller.kind(),
                old_address: controller.address().to_string(),
                outcome,
            });
        }

        Ok(reports)
    }

    async fn rename_one(
        &self,
        controller: &PowerController,
        asrock: bool,
        new: &Hostname,
    ) -> Result<ControllerOutcome, ControllerError> {
        let kind = controller.kind();
        let address = controller.address();

        let Some(prefix) = kind.prefix() else {
            debug!(address, "Unrecognized power controller, leaving as is");
            return Ok(ControllerOutcome::Skipped("unrecognized address"));
        };
        if kind == ControllerKind::Bmc && !asrock {
            debug!(address, "BMC on a non-Asrock platform, leaving as is");
            return Ok(ControllerOutcome::Skipped("not an Asrock platform"));
        }

        let credentials = credentials(controller)?;
        let device_name = new.prefixed_short_name(prefix);
        let new_address = new.with_prefix(prefix, self.domain);

        info!(kind = %kind, address, new_name = %device_name, "Renaming power controller");

        match kind {
            ControllerKind::Bmc => {
                let status = self
                    .redfish
                    .set_hostname(address, &credentials, &device_name)
                    .await?;
                if status != ACCEPTED {
                    warn!(address, status, "BMC did not accept the new hostname");
                    return Ok(ControllerOutcome::Rejected { status });
                }
            }
            ControllerKind::PiKvm => {
                let steps = [
                    ShellStep::checked("rw"),
                    ShellStep::checked(format!("hostnamectl set-hostname {device_name}")),
                    ShellStep::checked("ro"),
                    ShellStep::unchecked("reboot"),
                ];
                run_session(self.connector, address, &credentials, &steps).await?;
            }
            ControllerKind::Rpi => {
                let steps = [
                    ShellStep::checked(format!("sudo hostnamectl set-hostname {device_name}")),
                    ShellStep::unchecked("sudo reboot"),
                ];
                run_session(self.connector, address, &credentials, &steps).await?;
            }
            ControllerKind::Unknown => return Ok(ControllerOutcome::Skipped("unrecognized address")),
        }

        info!(kind = %kind, old_address = address, new_address = %new_address, "Power controller renamed");
        Ok(ControllerOutcome::Renamed(new_address))
    }
}

fn credentials(controller: &PowerController) -> Result<Credentials, ControllerError> {
    match (&controller.username, &controller.password) {
        (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
        _ => Err(ControllerError::MissingCredentials {
            address: controller.address().to_string(),
        }),
    }
}
