//! rehost CLI - rename a lab system everywhere it is known.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rehost::config::{require, Settings};
use rehost::controllers::ControllerOutcome;
use rehost::inventory::RecordFilter;
use rehost::{
    logging, Collaborators, ConductorClient, Credentials, Hostname, InventoryStore, JenkinsClient,
    MaasClient, Migration, MigrationReport, MigrationRequest, Provisioner, RedfishClient, Site,
    SshConnector,
};

/// Timeout of a single Redfish request to a BMC.
const REDFISH_TIMEOUT: Duration = Duration::from_secs(30);

/// rehost - hostname migration across inventory, MAAS, CI and the system.
#[derive(Parser)]
#[command(name = "rehost")]
#[command(about = "Rename a lab system in every service that knows it")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON lines (or set `LOG_JSON=true`).
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full migration: controllers, inventory, MAAS, SUT Auth and the OS.
    Migrate {
        /// Current fully qualified hostname.
        #[arg(long)]
        current: String,

        /// New fully qualified hostname.
        #[arg(long)]
        new: String,
    },

    /// Rename the inventory record and the MAAS machine only.
    ///
    /// Power controllers, SUT Auth and the OS are left untouched, so Jenkins
    /// and SSH credentials are not needed.
    RenameRecords {
        /// Current fully qualified hostname.
        #[arg(long)]
        current: String,

        /// New fully qualified hostname.
        #[arg(long)]
        new: String,
    },

    /// Print the inventory record and MAAS machine of a system.
    Show {
        /// Fully qualified hostname.
        #[arg(long)]
        hostname: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("Failed to load settings")?;
    settings.logging.json |= cli.log_json;

    let _log_guard =
        logging::init(&settings.logging, cli.verbose).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Migrate { current, new } => {
            let request = MigrationRequest::parse(&current, &new)?;
            let mut services = services(&settings)?;

            let jenkins = JenkinsClient::new(&settings.jenkins)
                .context("Failed to create Jenkins client")?;
            let username = require(settings.ssh.username.as_ref(), "SUT_SSH_USERNAME")?;
            let password = require(settings.ssh.password.as_ref(), "SUT_SSH_PASSWORD")?;
            services.jobs = Some(Arc::new(jenkins));
            services.sut_credentials = Some(Credentials::new(username, password));

            let migration = Migration::new(services, settings.migration.clone());
            let report = migration.run(&request).await?;
            print_report(&request, &report);
        }

        Commands::RenameRecords { current, new } => {
            let request = MigrationRequest::parse(&current, &new)?;
            let migration = Migration::new(services(&settings)?, settings.migration.clone());
            let report = migration.rename_records(&request).await?;
            print_report(&request, &report);
        }

        Commands::Show { hostname } => {
            let hostname = Hostname::parse(&hostname)?;
            show(&settings, &hostname).await?;
        }
    }

    Ok(())
}

/// Clients shared by every command.
fn services(settings: &Settings) -> Result<Collaborators> {
    let inventory =
        ConductorClient::new(&settings.inventory).context("Failed to create inventory client")?;
    let maas = MaasClient::new(settings.maas.clone()).context("Failed to create MAAS client")?;
    let redfish = RedfishClient::new(REDFISH_TIMEOUT).context("Failed to create Redfish client")?;

    Ok(Collaborators {
        inventory: Arc::new(inventory),
        provisioner: Arc::new(maas),
        redfish: Arc::new(redfish),
        shell: Arc::new(SshConnector::new(settings.ssh.connect_timeout)),
        jobs: None,
        sut_credentials: None,
    })
}

async fn show(settings: &Settings, hostname: &Hostname) -> Result<()> {
    let inventory =
        ConductorClient::new(&settings.inventory).context("Failed to create inventory client")?;
    let records = inventory.query(&RecordFilter::by_hostname(hostname)).await?;
    let Some(record) = records.first() else {
        bail!("No inventory record for {hostname}");
    };

    println!("\nInventory record:");
    println!("{}", serde_json::to_string_pretty(record)?);

    let site = Site::for_hostname(hostname.as_str());
    let maas = MaasClient::new(settings.maas.clone()).context("Failed to create MAAS client")?;
    info!(site = %site, "Looking up MAAS machine");
    match maas.get_machine(site, hostname.short_name()).await? {
        Some(machine) => {
            println!("\nMAAS machine ({site}):");
            println!("{}", serde_json::to_string_pretty(&machine)?);
        }
        None => println!("\nNo MAAS machine named {} at {site}", hostname.short_name()),
    }

    Ok(())
}

fn print_report(request: &MigrationRequest, report: &MigrationReport) {
    println!("\n{} -> {}", request.current, request.new);
    println!("  Record:    {}", report.record_id);
    println!("  Site:      {}", report.site);
    println!("  Machine:   {}", report.machine_id);
    let sut_auth = match (report.ci_enrolled, report.os_renamed) {
        (true, true) => "reinstalled",
        (true, false) => "enrolled, untouched",
        (false, _) => "not enrolled",
    };
    println!("  SUT Auth:  {sut_auth}");
    println!("  OS rename: {}", if report.os_renamed { "done" } else { "skipped" });

    for controller in &report.controllers {
        let outcome = match &controller.outcome {
            ControllerOutcome::Renamed(address) => format!("renamed to {address}"),
            ControllerOutcome::Rejected { status } => format!("rejected (HTTP {status})"),
            ControllerOutcome::Skipped(reason) => format!("skipped ({reason})"),
        };
        println!(
            "  {:<6} {:<32} {outcome}",
            controller.kind.to_string(),
            controller.old_address
        );
    }
}
