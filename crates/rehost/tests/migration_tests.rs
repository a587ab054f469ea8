//! Workflow tests for the hostname migration.
//!
//! Every remote system is replaced by a fake that records what it was asked
//! to do in a shared journal, so the tests can check both the outcome and
//! the order of side effects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::json;

use rehost::ci::{CiError, JobKind, JobProgress, JobRunner};
use rehost::config::MigrationSettings;
use rehost::controllers::{ControllerError, ControllerOutcome, RedfishApi};
use rehost::inventory::{
    ControllerKind, InventoryError, InventoryStore, RecordFilter, RecordUpdate, SystemRecord,
};
use rehost::provisioning::{Machine, Provisioner, ProvisioningError, Site};
use rehost::shell::{CommandOutput, Credentials, RemoteShell, ShellConnector, ShellError};
use rehost::{Collaborators, Hostname, Migration, MigrationError, MigrationRequest};

type Journal = Arc<Mutex<Vec<String>>>;

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn touched(journal: &Journal, prefix: &str) -> bool {
    entries(journal).iter().any(|e| e.starts_with(prefix))
}

// =============================================================================
// Fakes
// =============================================================================

struct FakeInventory {
    records: Vec<SystemRecord>,
    updates: Mutex<Vec<RecordUpdate>>,
    journal: Journal,
}

#[async_trait]
impl InventoryStore for FakeInventory {
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<SystemRecord>, InventoryError> {
        self.journal.lock().unwrap().push(format!(
            "inventory.query {}",
            filter.hostname_ip.as_deref().unwrap_or_default()
        ));
        Ok(self.records.clone())
    }

    async fn update(&self, update: &RecordUpdate) -> Result<serde_json::Value, InventoryError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("inventory.update {}", update.id));
        self.updates.lock().unwrap().push(update.clone());
        Ok(json!({"id": update.id}))
    }
}

struct FakeProvisioner {
    machine: Option<Machine>,
    journal: Journal,
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn get_machine(
        &self,
        site: Site,
        hostname: &str,
    ) -> Result<Option<Machine>, ProvisioningError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("maas.get {site} {hostname}"));
        Ok(self.machine.clone())
    }

    async fn update_machine(
        &self,
        site: Site,
        machine_id: &str,
        new_hostname: &str,
        power_type: &str,
    ) -> Result<Machine, ProvisioningError> {
        self.journal.lock().unwrap().push(format!(
            "maas.update {site} {machine_id} {new_hostname} {power_type}"
        ));
        Ok(Machine {
            system_id: Some(machine_id.to_string()),
            hostname: Some(new_hostname.to_string()),
            power_type: Some(power_type.to_string()),
            ..Machine::default()
        })
    }
}

/// How the fake CI behaves once a job is triggered.
#[derive(Clone, Copy)]
enum CiScript {
    /// Every build succeeds after one pending poll.
    Succeed,
    /// The queue never hands out a build number.
    QueueTimeout,
    /// Builds finish with FAILURE.
    Fail,
    /// Builds never finish.
    Hang,
}

struct FakeJobs {
    script: CiScript,
    polls: Mutex<VecDeque<Option<&'static str>>>,
    journal: Journal,
}

impl FakeJobs {
    fn new(script: CiScript, journal: &Journal) -> Self {
        Self {
            script,
            polls: Mutex::new(VecDeque::new()),
            journal: Arc::clone(journal),
        }
    }
}

#[async_trait]
impl JobRunner for FakeJobs {
    async fn trigger(&self, kind: JobKind, hostname: &Hostname) -> Result<Option<u64>, CiError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("ci.trigger {kind} {hostname}"));
        let mut polls = self.polls.lock().unwrap();
        match self.script {
            CiScript::QueueTimeout => Err(CiError::QueueTimeout {
                queue_id: 7,
                secs: 60,
            }),
            CiScript::Succeed => {
                *polls = VecDeque::from([None, Some("SUCCESS")]);
                Ok(Some(100))
            }
            CiScript::Fail => {
                *polls = VecDeque::from([Some("FAILURE")]);
                Ok(Some(100))
            }
            CiScript::Hang => Ok(Some(100)),
        }
    }

    async fn job_progress(&self, kind: JobKind, build: u64) -> Result<JobProgress, CiError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("ci.progress {kind} {build}"));
        let result = self.polls.lock().unwrap().pop_front().flatten();
        Ok(JobProgress {
            number: Some(build),
            building: result.is_none(),
            result: result.map(str::to_string),
        })
    }
}

/// Answers with `status`, or fails in transport when it is `None`.
struct FakeRedfish {
    status: Option<u16>,
    journal: Journal,
}

#[async_trait]
impl RedfishApi for FakeRedfish {
    async fn set_hostname(
        &self,
        address: &str,
        credentials: &Credentials,
        hostname: &str,
    ) -> Result<u16, ControllerError> {
        self.journal.lock().unwrap().push(format!(
            "redfish {address} {} {hostname}",
            credentials.username
        ));
        match self.status {
            Some(status) => Ok(status),
            None => {
                // Nothing listens on port 1 locally.
                let source = reqwest::Client::new()
                    .patch("http://127.0.0.1:1/")
                    .send()
                    .await
                    .unwrap_err();
                Err(ControllerError::Redfish {
                    address: address.to_string(),
                    source,
                })
            }
        }
    }
}

struct FakeShell {
    host: String,
    /// Commands containing this text exit with status 1.
    failing: Option<&'static str>,
    journal: Journal,
}

#[async_trait]
impl RemoteShell for FakeShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("ssh.exec {} {command}", self.host));
        let failed = self.failing.is_some_and(|f| command.contains(f));
        Ok(CommandOutput {
            exit_status: i32::from(failed),
            stderr: if failed { "permission denied".to_string() } else { String::new() },
            ..CommandOutput::default()
        })
    }

    async fn invoke(
        &mut self,
        command: &str,
        _expected: &Regex,
        _timeout: Duration,
    ) -> Result<String, ShellError> {
        self.execute(command).await.map(|o| o.stdout)
    }

    async fn close(&mut self) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("ssh.close {}", self.host));
    }
}

struct FakeConnector {
    failing: Option<&'static str>,
    journal: Journal,
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteShell>, ShellError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("ssh.connect {}@{host}", credentials.username));
        Ok(Box::new(FakeShell {
            host: host.to_string(),
            failing: self.failing,
            journal: Arc::clone(&self.journal),
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    journal: Journal,
    inventory: Arc<FakeInventory>,
    migration: Migration,
}

struct Setup {
    records: Vec<SystemRecord>,
    machine: Option<Machine>,
    ci: Option<CiScript>,
    redfish_status: Option<u16>,
    failing_command: Option<&'static str>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            records: vec![record(json!({}))],
            machine: Some(machine("webhook")),
            ci: Some(CiScript::Succeed),
            redfish_status: Some(202),
            failing_command: None,
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let inventory = Arc::new(FakeInventory {
            records: self.records,
            updates: Mutex::new(Vec::new()),
            journal: Arc::clone(&journal),
        });

        let services = Collaborators {
            inventory: Arc::clone(&inventory) as Arc<dyn InventoryStore>,
            provisioner: Arc::new(FakeProvisioner {
                machine: self.machine,
                journal: Arc::clone(&journal),
            }),
            redfish: Arc::new(FakeRedfish {
                status: self.redfish_status,
                journal: Arc::clone(&journal),
            }),
            shell: Arc::new(FakeConnector {
                failing: self.failing_command,
                journal: Arc::clone(&journal),
            }),
            jobs: self
                .ci
                .map(|script| Arc::new(FakeJobs::new(script, &journal)) as Arc<dyn JobRunner>),
            sut_credentials: Some(Credentials::new("amd", "sut-pw")),
        };

        Harness {
            journal,
            inventory,
            migration: Migration::new(services, MigrationSettings::default()),
        }
    }
}

impl Harness {
    fn updates(&self) -> Vec<RecordUpdate> {
        self.inventory.updates.lock().unwrap().clone()
    }
}

/// Record for `host-a.site.dcgpu`, owned by `orch`, merged with `overrides`.
fn record(overrides: serde_json::Value) -> SystemRecord {
    let mut value = json!({
        "id": "rec-1",
        "name": "host-a",
        "hostname_ip": "host-a.site.dcgpu",
        "username": "orch",
        "platforms": {"name": "Generic Server"},
        "platform_config": {"power_controllers": []}
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value).unwrap()
}

fn machine(power_type: &str) -> Machine {
    Machine {
        system_id: Some("m1".to_string()),
        hostname: Some("host-a".to_string()),
        power_type: Some(power_type.to_string()),
        ..Machine::default()
    }
}

fn request() -> MigrationRequest {
    MigrationRequest::parse("host-a.site.dcgpu", "host-b.site.dcgpu").unwrap()
}

const SED_HOSTS: &str =
    r"sudo sed -i 's/^127\.0\.1\.1.*/127.0.1.1 host-b.site.dcgpu host-b/' /etc/hosts";

// =============================================================================
// End to end
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_migration_of_enrolled_system() {
    let harness = Setup::default().build();

    let report = harness.migration.run(&request()).await.unwrap();

    assert_eq!(report.record_id, "rec-1");
    assert_eq!(report.site, Site::Eq);
    assert_eq!(report.machine_id, "m1");
    assert!(report.ci_enrolled);
    assert!(report.os_renamed);

    assert_eq!(
        entries(&harness.journal),
        vec![
            "inventory.query host-a.site.dcgpu".to_string(),
            "inventory.update rec-1".to_string(),
            "maas.get eq host-a".to_string(),
            "maas.update eq m1 host-b webhook".to_string(),
            "ci.trigger uninstall host-b.site.dcgpu".to_string(),
            "ci.progress uninstall 100".to_string(),
            "ci.progress uninstall 100".to_string(),
            "ssh.connect amd@host-b.site.dcgpu".to_string(),
            "ssh.exec host-b.site.dcgpu sudo hostnamectl set-hostname host-b.site.dcgpu"
                .to_string(),
            format!("ssh.exec host-b.site.dcgpu {SED_HOSTS}"),
            "ssh.close host-b.site.dcgpu".to_string(),
            "ci.trigger install host-b.site.dcgpu".to_string(),
            "ci.progress install 100".to_string(),
            "ci.progress install 100".to_string(),
        ]
    );

    let updates = harness.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name.as_deref(), Some("host-b"));
    assert_eq!(updates[0].hostname_ip.as_deref(), Some("host-b.site.dcgpu"));
}

#[tokio::test(start_paused = true)]
async fn test_system_not_enrolled_skips_ci_after_delay() {
    let harness = Setup {
        records: vec![record(json!({"username": "jdoe"}))],
        ..Setup::default()
    }
    .build();

    let start = tokio::time::Instant::now();
    let report = harness.migration.run(&request()).await.unwrap();

    assert!(!report.ci_enrolled);
    assert!(report.os_renamed);
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(!touched(&harness.journal, "ci."));
    assert!(touched(&harness.journal, "ssh.connect amd@host-b.site.dcgpu"));
}

#[tokio::test]
async fn test_ust_site_selected_from_hostname() {
    let harness = Setup {
        records: vec![record(json!({"hostname_ip": "host-a.pngtechno.dcgpu"}))],
        ..Setup::default()
    }
    .build();
    let request = MigrationRequest::parse("host-a.pngtechno.dcgpu", "host-b.pngtechno.dcgpu")
        .unwrap();

    let report = harness.migration.rename_records(&request).await.unwrap();

    assert_eq!(report.site, Site::Ust);
    assert!(touched(&harness.journal, "maas.update ust m1 host-b"));
}

// =============================================================================
// Validation and lookups
// =============================================================================

#[test]
fn test_invalid_hostnames_rejected_before_any_call() {
    for (current, new) in [
        ("host-a", "host-b.site.dcgpu"),
        ("host-a.site.dcgpu", "host-b"),
        ("host a.site.dcgpu", "host-b.site.dcgpu"),
        ("host-a.site.dcgpu", "host-b."),
    ] {
        assert!(
            matches!(
                MigrationRequest::parse(current, new),
                Err(MigrationError::InvalidHostname(_))
            ),
            "{current} -> {new}"
        );
    }
}

#[tokio::test]
async fn test_missing_record_halts_before_provisioning() {
    let harness = Setup {
        records: vec![],
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(err, MigrationError::RecordNotFound(ref h) if h == "host-a.site.dcgpu"));
    assert_eq!(
        entries(&harness.journal),
        vec!["inventory.query host-a.site.dcgpu".to_string()]
    );
}

#[tokio::test]
async fn test_missing_machine() {
    let harness = Setup {
        machine: None,
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::MachineNotFound { site: Site::Eq, ref hostname } if hostname == "host-a"
    ));
    assert!(!touched(&harness.journal, "maas.update"));
    assert!(!touched(&harness.journal, "ci."));
}

#[tokio::test]
async fn test_machine_without_power_type() {
    let harness = Setup {
        machine: Some(Machine {
            power_type: None,
            ..machine("webhook")
        }),
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::MachineIncomplete { missing: "power_type", .. }
    ));
    assert!(!touched(&harness.journal, "maas.update"));
}

#[tokio::test]
async fn test_power_type_passed_through() {
    let harness = Setup {
        machine: Some(machine("ipmi")),
        ..Setup::default()
    }
    .build();

    harness.migration.rename_records(&request()).await.unwrap();

    assert!(touched(&harness.journal, "maas.update eq m1 host-b ipmi"));
}

#[tokio::test]
async fn test_run_without_ci_runner_touches_nothing() {
    let harness = Setup {
        ci: None,
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(err, MigrationError::NotConfigured(_)));
    assert!(entries(&harness.journal).is_empty());
}

#[tokio::test]
async fn test_rename_records_skips_ci_and_sut() {
    let harness = Setup {
        ci: None,
        ..Setup::default()
    }
    .build();

    let report = harness.migration.rename_records(&request()).await.unwrap();

    assert!(report.ci_enrolled);
    assert!(!report.os_renamed);
    assert!(!touched(&harness.journal, "ci."));
    assert!(!touched(&harness.journal, "ssh."));
}

#[tokio::test]
async fn test_rename_records_leaves_controllers_alone() {
    let harness = Setup {
        ci: None,
        records: vec![with_controllers(
            "Asrock 1U",
            json!([
                {"address": "bmc-host-a.amd.com", "username": "admin", "password": "pw"},
                {"address": "pikvm-host-a.amd.com", "username": "root", "password": "kvm"},
                {"address": "rpi-host-a.amd.com", "username": "pi", "password": "raspberry"}
            ]),
            "pikvm-host-a.amd.com",
        )],
        ..Setup::default()
    }
    .build();

    let report = harness.migration.rename_records(&request()).await.unwrap();

    assert!(report.controllers.is_empty());
    assert!(!touched(&harness.journal, "redfish"));
    assert!(!touched(&harness.journal, "ssh."));
    assert!(touched(&harness.journal, "maas.update eq m1 host-b"));

    let updates = harness.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].hostname_ip.as_deref(), Some("host-b.site.dcgpu"));
    assert_eq!(updates[0].platform_config, None);
}

// =============================================================================
// Power controllers
// =============================================================================

fn with_controllers(platform: &str, controllers: serde_json::Value, notes: &str) -> SystemRecord {
    record(json!({
        "platforms": {"name": platform},
        "platform_config": {
            "power_controllers": controllers,
            "notes": notes,
            "rack": "R12"
        }
    }))
}

#[tokio::test(start_paused = true)]
async fn test_asrock_bmc_renamed_when_accepted() {
    let harness = Setup {
        records: vec![with_controllers(
            "ASROCK Rack",
            json!([{"address": "bmc-host-a.amd.com", "username": "admin", "password": "pw"}]),
            "",
        )],
        ..Setup::default()
    }
    .build();

    let report = harness.migration.run(&request()).await.unwrap();

    assert!(touched(
        &harness.journal,
        "redfish bmc-host-a.amd.com admin bmc-host-b"
    ));
    assert_eq!(
        report.controllers[0].outcome,
        ControllerOutcome::Renamed("bmc-host-b.amd.com".to_string())
    );

    let config = harness.updates()[0].platform_config.clone().unwrap();
    assert_eq!(config.power_controllers[0].address(), "bmc-host-b.amd.com");
    assert_eq!(config.power_controllers[0].kind(), ControllerKind::Bmc);
    assert_eq!(config.extra.get("rack"), Some(&json!("R12")));
}

#[tokio::test(start_paused = true)]
async fn test_bmc_rejection_keeps_descriptor() {
    let harness = Setup {
        records: vec![with_controllers(
            "Asrock 1U",
            json!([{"address": "bmc-host-a.amd.com", "username": "admin", "password": "pw"}]),
            "",
        )],
        redfish_status: Some(400),
        ..Setup::default()
    }
    .build();

    let report = harness.migration.run(&request()).await.unwrap();

    assert_eq!(
        report.controllers[0].outcome,
        ControllerOutcome::Rejected { status: 400 }
    );
    let config = harness.updates()[0].platform_config.clone().unwrap();
    assert_eq!(config.power_controllers[0].address(), "bmc-host-a.amd.com");
    assert!(touched(&harness.journal, "maas.update"));
}

#[tokio::test(start_paused = true)]
async fn test_bmc_on_other_platform_untouched() {
    let harness = Setup {
        records: vec![with_controllers(
            "Supermicro",
            json!([{"address": "bmc-host-a.amd.com", "username": "admin", "password": "pw"}]),
            "",
        )],
        ..Setup::default()
    }
    .build();

    let report = harness.migration.run(&request()).await.unwrap();

    assert!(matches!(
        report.controllers[0].outcome,
        ControllerOutcome::Skipped(_)
    ));
    assert!(!touched(&harness.journal, "redfish"));
}

#[tokio::test(start_paused = true)]
async fn test_pikvm_renamed_and_notes_rewritten() {
    let harness = Setup {
        records: vec![with_controllers(
            "Generic Server",
            json!([{"address": "pikvm-host-a.amd.com", "username": "root", "password": "kvm"}]),
            "console: https://pikvm-host-a.amd.com/kvm",
        )],
        ..Setup::default()
    }
    .build();

    harness.migration.run(&request()).await.unwrap();

    let journal = entries(&harness.journal);
    let pikvm: Vec<_> = journal
        .iter()
        .filter(|e| e.contains("pikvm-host-a.amd.com"))
        .cloned()
        .collect();
    assert_eq!(
        pikvm,
        vec![
            "ssh.connect root@pikvm-host-a.amd.com".to_string(),
            "ssh.exec pikvm-host-a.amd.com rw".to_string(),
            "ssh.exec pikvm-host-a.amd.com hostnamectl set-hostname pikvm-host-b".to_string(),
            "ssh.exec pikvm-host-a.amd.com ro".to_string(),
            "ssh.exec pikvm-host-a.amd.com reboot".to_string(),
            "ssh.close pikvm-host-a.amd.com".to_string(),
        ]
    );

    let config = harness.updates()[0].platform_config.clone().unwrap();
    assert_eq!(config.power_controllers[0].address(), "pikvm-host-b.amd.com");
    assert_eq!(
        config.notes.as_deref(),
        Some("console: https://pikvm-host-b.amd.com/kvm")
    );
}

#[tokio::test(start_paused = true)]
async fn test_rpi_renamed_with_sudo() {
    let harness = Setup {
        records: vec![with_controllers(
            "Generic Server",
            json!([
                {"address": "rpi-host-a.amd.com", "username": "pi", "password": "raspberry"},
                {"address": "pdu-7.lab", "username": "x", "password": "y"}
            ]),
            "rpi-host-a.amd.com on port 3",
        )],
        ..Setup::default()
    }
    .build();

    let report = harness.migration.run(&request()).await.unwrap();

    assert!(touched(
        &harness.journal,
        "ssh.exec rpi-host-a.amd.com sudo hostnamectl set-hostname rpi-host-b"
    ));
    assert!(touched(&harness.journal, "ssh.exec rpi-host-a.amd.com sudo reboot"));
    assert_eq!(report.controllers.len(), 2);
    assert!(matches!(
        report.controllers[1].outcome,
        ControllerOutcome::Skipped(_)
    ));

    let config = harness.updates()[0].platform_config.clone().unwrap();
    assert_eq!(config.power_controllers[0].address(), "rpi-host-b.amd.com");
    assert_eq!(config.power_controllers[1].address(), "pdu-7.lab");
    assert_eq!(config.notes.as_deref(), Some("rpi-host-b.amd.com on port 3"));
}

#[tokio::test(start_paused = true)]
async fn test_controller_without_credentials_aborts_before_inventory_write() {
    let harness = Setup {
        records: vec![with_controllers(
            "Generic Server",
            json!([{"address": "rpi-host-a.amd.com", "username": "pi"}]),
            "",
        )],
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Controller(ControllerError::MissingCredentials { .. })
    ));
    assert!(!touched(&harness.journal, "inventory.update"));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_bmc_aborts_before_inventory_write() {
    let harness = Setup {
        records: vec![with_controllers(
            "ASROCK Rack",
            json!([{"address": "bmc-host-a.amd.com", "username": "admin", "password": "pw"}]),
            "",
        )],
        redfish_status: None,
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Controller(ControllerError::Redfish { ref address, .. })
            if address == "bmc-host-a.amd.com"
    ));
    assert!(touched(&harness.journal, "redfish bmc-host-a.amd.com"));
    assert!(!touched(&harness.journal, "inventory.update"));
    assert!(!touched(&harness.journal, "maas."));
}

#[tokio::test(start_paused = true)]
async fn test_failed_controller_command_aborts() {
    let harness = Setup {
        records: vec![with_controllers(
            "Generic Server",
            json!([{"address": "pikvm-host-a.amd.com", "username": "root", "password": "kvm"}]),
            "",
        )],
        failing_command: Some("hostnamectl"),
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Controller(ControllerError::Shell(ShellError::Command { .. }))
    ));
    assert!(touched(&harness.journal, "ssh.close pikvm-host-a.amd.com"));
    assert!(!touched(&harness.journal, "inventory.update"));
}

// =============================================================================
// CI and system rename failures
// =============================================================================

#[tokio::test]
async fn test_queue_timeout_prevents_os_rename() {
    let harness = Setup {
        ci: Some(CiScript::QueueTimeout),
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Ci(CiError::QueueTimeout { queue_id: 7, .. })
    ));
    assert!(touched(&harness.journal, "maas.update"));
    assert!(!touched(&harness.journal, "ssh."));
}

#[tokio::test]
async fn test_failed_uninstall_aborts() {
    let harness = Setup {
        ci: Some(CiScript::Fail),
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::JobFailed { kind: JobKind::Uninstall, build: 100, ref result }
            if result == "FAILURE"
    ));
    assert!(!touched(&harness.journal, "ssh."));
}

#[tokio::test(start_paused = true)]
async fn test_unfinished_uninstall_times_out() {
    let harness = Setup {
        ci: Some(CiScript::Hang),
        ..Setup::default()
    }
    .build();

    let start = tokio::time::Instant::now();
    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::JobTimeout { kind: JobKind::Uninstall, secs: 300, .. }
    ));
    assert!(start.elapsed() >= Duration::from_secs(300));
    assert!(!touched(&harness.journal, "ssh."));
}

#[tokio::test(start_paused = true)]
async fn test_failed_os_command_skips_reinstall() {
    let harness = Setup {
        failing_command: Some("/etc/hosts"),
        ..Setup::default()
    }
    .build();

    let err = harness.migration.run(&request()).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Shell(ShellError::Command { status: 1, ref host, .. })
            if host == "host-b.site.dcgpu"
    ));
    assert!(touched(&harness.journal, "ssh.close host-b.site.dcgpu"));
    assert!(!touched(&harness.journal, "ci.trigger install"));
}
