//! End-to-end hostname migration.
//!
//! The workflow is strictly sequential and fails fast:
//!
//! 1. look up the inventory record by the current hostname,
//! 2. rename the power controllers attached to it,
//! 3. write the renamed record back,
//! 4. rename the machine in MAAS,
//! 5. uninstall SUT Auth through Jenkins (enrolled systems only),
//! 6. rename the operating system over SSH,
//! 7. reinstall SUT Auth (when it was uninstalled).
//!
//! Nothing is rolled back: a failure after step 2 leaves the earlier renames
//! in place, and the error names the step that failed.
//!
//! [`Migration::rename_records`] runs steps 1, 3 and 4 only and leaves the
//! power controllers alone.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::ci::{BuildOutcome, CiError, JobKind, JobRunner};
use crate::config::MigrationSettings;
use crate::controllers::{ControllerError, ControllerRenamer, ControllerReport, RedfishApi};
use crate::hostname::{Hostname, HostnameError};
use crate::inventory::{InventoryError, InventoryStore, RecordFilter, RecordUpdate};
use crate::provisioning::{Provisioner, ProvisioningError, Site};
use crate::shell::{run_session, Credentials, ShellConnector, ShellError, ShellStep};

/// Errors that abort a migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A hostname does not have the `short-name.domain` shape.
    #[error(transparent)]
    InvalidHostname(#[from] HostnameError),

    /// The inventory has no record for the current hostname.
    #[error("no inventory record for {0}")]
    RecordNotFound(String),

    /// MAAS has no machine with the current short name.
    #[error("no MAAS machine named {hostname} at site {site}")]
    MachineNotFound { site: Site, hostname: String },

    /// The MAAS machine lacks an id or power type.
    #[error("MAAS machine {hostname} has no {missing}")]
    MachineIncomplete {
        hostname: String,
        missing: &'static str,
    },

    /// Jenkins refused to start a job.
    #[error("failed to start SUT Auth {0} job")]
    JobNotStarted(JobKind),

    /// A job did not succeed in time.
    #[error("SUT Auth {kind} build {build} did not succeed within {secs} seconds")]
    JobTimeout { kind: JobKind, build: u64, secs: u64 },

    /// A job finished unsuccessfully.
    #[error("SUT Auth {kind} build {build} finished with {result}")]
    JobFailed {
        kind: JobKind,
        build: u64,
        result: String,
    },

    /// A collaborator needed by this run was not provided.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),

    #[error("provisioning: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("CI: {0}")]
    Ci(#[from] CiError),

    #[error("power controller: {0}")]
    Controller(#[from] ControllerError),

    #[error("SSH: {0}")]
    Shell(#[from] ShellError),
}

/// The rename to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub current: Hostname,
    pub new: Hostname,
}

impl MigrationRequest {
    /// Validate both hostnames.
    ///
    /// # Errors
    /// Returns [`MigrationError::InvalidHostname`] for either bad value.
    pub fn parse(current: &str, new: &str) -> Result<Self, MigrationError> {
        Ok(Self {
            current: Hostname::parse(current)?,
            new: Hostname::parse(new)?,
        })
    }
}

/// Summary of a completed migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub record_id: String,
    pub site: Site,
    pub machine_id: String,
    pub controllers: Vec<ControllerReport>,
    /// The system is enrolled in SUT Auth.
    pub ci_enrolled: bool,
    /// The OS hostname was changed over SSH.
    pub os_renamed: bool,
}

/// Remote systems a migration talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryStore>,
    pub provisioner: Arc<dyn Provisioner>,
    pub redfish: Arc<dyn RedfishApi>,
    pub shell: Arc<dyn ShellConnector>,
    /// Required by [`Migration::run`] only.
    pub jobs: Option<Arc<dyn JobRunner>>,
    /// Login on the system under test, required by [`Migration::run`] only.
    pub sut_credentials: Option<Credentials>,
}

/// Hostname migration workflow.
pub struct Migration {
    services: Collaborators,
    settings: MigrationSettings,
}

impl Migration {
    #[must_use]
    pub fn new(services: Collaborators, settings: MigrationSettings) -> Self {
        Self { services, settings }
    }

    /// Perform the full migration.
    ///
    /// # Errors
    /// Returns the first failure; earlier steps are not undone.
    pub async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport, MigrationError> {
        let result = self.run_all(request).await;
        match &result {
            Ok(_) => info!(new = %request.new, "All operations completed successfully"),
            Err(e) => error!(current = %request.current, new = %request.new, error = %e, "Migration failed"),
        }
        result
    }

    /// Rename the system in the inventory and MAAS only.
    ///
    /// Power controllers are neither contacted nor rewritten: the inventory
    /// write carries the id, name and hostname fields alone.
    ///
    /// # Errors
    /// Returns the first failure; earlier steps are not undone.
    pub async fn rename_records(
        &self,
        request: &MigrationRequest,
    ) -> Result<MigrationReport, MigrationError> {
        let result = self.update_records(request, false).await;
        if let Err(e) = &result {
            error!(current = %request.current, error = %e, "Record update failed");
        }
        result
    }

    async fn run_all(&self, request: &MigrationRequest) -> Result<MigrationReport, MigrationError> {
        let jobs = self
            .services
            .jobs
            .as_deref()
            .ok_or(MigrationError::NotConfigured("CI job runner"))?;
        let sut_credentials = self
            .services
            .sut_credentials
            .as_ref()
            .ok_or(MigrationError::NotConfigured("SSH credentials for the system"))?;

        let mut report = self.update_records(request, true).await?;

        if report.ci_enrolled {
            info!("Uninstalling SUT Auth");
            let build = self.run_job(jobs, JobKind::Uninstall, &request.new).await?;
            info!(build, "Uninstalled SUT Auth successfully");
        } else {
            info!(
                delay_secs = self.settings.skipped_ci_delay.as_secs(),
                "System not enrolled in SUT Auth, skipping uninstall"
            );
            sleep(self.settings.skipped_ci_delay).await;
        }

        info!(host = %request.new, "Configuring hostname on the system");
        run_session(
            self.services.shell.as_ref(),
            request.new.as_str(),
            sut_credentials,
            &os_rename_steps(&request.new),
        )
        .await?;
        report.os_renamed = true;
        info!("Configured hostname on the system");

        if report.ci_enrolled {
            info!("Installing SUT Auth");
            let build = self.run_job(jobs, JobKind::Install, &request.new).await?;
            info!(build, "Installed SUT Auth successfully");
        }

        Ok(report)
    }

    /// Steps up to the MAAS rename. Controllers are renamed, and the platform
    /// config written back, only when `with_controllers` is set.
    async fn update_records(
        &self,
        request: &MigrationRequest,
        with_controllers: bool,
    ) -> Result<MigrationReport, MigrationError> {
        let MigrationRequest { current, new } = request;

        info!(hostname = %current, "Searching inventory");
        let records = self
            .services
            .inventory
            .query(&RecordFilter::by_hostname(current))
            .await?;
        let mut record = records
            .into_iter()
            .next()
            .ok_or_else(|| MigrationError::RecordNotFound(current.to_string()))?;
        info!(record_id = %record.id, platform = ?record.platform_name(), "System found");

        let (controllers, update) = if with_controllers {
            let controllers = ControllerRenamer::new(
                self.services.redfish.as_ref(),
                self.services.shell.as_ref(),
                &self.settings.controller_domain,
            )
            .rename_all(&mut record, new)
            .await?;
            (controllers, RecordUpdate::rename(&record, new))
        } else {
            (Vec::new(), RecordUpdate::rename_identity(&record, new))
        };

        info!(record_id = %record.id, "Updating inventory");
        self.services.inventory.update(&update).await?;

        let site = Site::for_hostname(current.as_str());
        info!(site = %site.code().to_uppercase(), "Detected MAAS site");

        let machine = self
            .services
            .provisioner
            .get_machine(site, current.short_name())
            .await?
            .ok_or_else(|| MigrationError::MachineNotFound {
                site,
                hostname: current.short_name().to_string(),
            })?;

        let incomplete = |missing| MigrationError::MachineIncomplete {
            hostname: current.short_name().to_string(),
            missing,
        };
        let machine_id = machine
            .system_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| incomplete("system_id"))?;
        let power_type = machine
            .power_type
            .filter(|p| !p.is_empty())
            .ok_or_else(|| incomplete("power_type"))?;
        info!(machine_id = %machine_id, power_type = %power_type, "Machine found");

        self.services
            .provisioner
            .update_machine(site, &machine_id, new.short_name(), &power_type)
            .await?;
        info!(machine_id = %machine_id, "Updated machine in MAAS");

        let ci_enrolled = record.username.as_deref() == Some(self.settings.ci_sentinel_user.as_str());

        Ok(MigrationReport {
            record_id: record.id,
            site,
            machine_id,
            controllers,
            ci_enrolled,
            os_renamed: false,
        })
    }

    /// Trigger `kind` and poll it until it succeeds.
    async fn run_job(
        &self,
        jobs: &dyn JobRunner,
        kind: JobKind,
        hostname: &Hostname,
    ) -> Result<u64, MigrationError> {
        let start = Instant::now();
        let timeout = self.settings.job_timeout;

        let build = jobs
            .trigger(kind, hostname)
            .await?
            .ok_or(MigrationError::JobNotStarted(kind))?;

        loop {
            if start.elapsed() > timeout {
                return Err(MigrationError::JobTimeout {
                    kind,
                    build,
                    secs: timeout.as_secs(),
                });
            }

            match jobs.job_progress(kind, build).await?.outcome() {
                BuildOutcome::Success => return Ok(build),
                BuildOutcome::Failure(result) => {
                    warn!(job = %kind, build, result = %result, "SUT Auth job failed");
                    return Err(MigrationError::JobFailed {
                        kind,
                        build,
                        result,
                    });
                }
                BuildOutcome::Pending => {}
            }

            sleep(self.settings.job_poll_interval).await;
        }
    }
}

/// Commands renaming the operating system of the system under test.
#[must_use]
pub fn os_rename_steps(new: &Hostname) -> Vec<ShellStep> {
    vec![
        ShellStep::checked(format!("sudo hostnamectl set-hostname {new}")),
        ShellStep::checked(format!(
            r"sudo sed -i 's/^127\.0\.1\.1.*/127.0.1.1 {new} {}/' /etc/hosts",
            new.short_name()
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(MigrationRequest::parse("host-a.site.dcgpu", "host-b.site.dcgpu").is_ok());
        assert!(matches!(
            MigrationRequest::parse("host-a", "host-b.site.dcgpu"),
            Err(MigrationError::InvalidHostname(_))
        ));
        assert!(matches!(
            MigrationRequest::parse("host-a.site.dcgpu", ".dcgpu"),
            Err(MigrationError::InvalidHostname(_))
        ));
    }

    #[test]
    fn test_shell_metacharacters_never_reach_commands() {
        for new in ["host-b.site;reboot", "host-b.site$(id)", "host-b.s/i'te&x"] {
            assert!(
                matches!(
                    MigrationRequest::parse("host-a.site.dcgpu", new),
                    Err(MigrationError::InvalidHostname(_))
                ),
                "{new:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_os_rename_steps() {
        let new = Hostname::parse("host-b.site.dcgpu").unwrap();
        let commands: Vec<_> = os_rename_steps(&new)
            .into_iter()
            .map(|s| s.command)
            .collect();
        assert_eq!(
            commands,
            vec![
                "sudo hostnamectl set-hostname host-b.site.dcgpu".to_string(),
                r"sudo sed -i 's/^127\.0\.1\.1.*/127.0.1.1 host-b.site.dcgpu host-b/' /etc/hosts"
                    .to_string(),
            ]
        );
    }
}
