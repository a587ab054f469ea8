//! Runtime settings loaded from the process environment.
//!
//! All services are configured through environment variables (optionally
//! seeded from a `.env` file). Credentials are kept optional here and only
//! demanded when the component that needs them is constructed, so a run that
//! never talks to Jenkins does not need Jenkins credentials.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::provisioning::Site;

/// Default inventory (Conductor) URL.
pub const DEFAULT_INVENTORY_URL: &str = "https://conductor.amd.com";

/// Default Jenkins URL.
pub const DEFAULT_JENKINS_URL: &str = "http://dcgpuauto-jenkins.amd.com:8080";

/// Default base URL of the power webhook server referenced by MAAS.
pub const DEFAULT_POWER_WEBHOOK_URL: &str = "http://png-dcgpuval-platypiserver.png.dcgpu";

/// Default DNS domain of auxiliary power controllers.
pub const DEFAULT_CONTROLLER_DOMAIN: &str = "amd.com";

/// Inventory `username` value marking systems managed through SUT Auth.
pub const DEFAULT_CI_SENTINEL_USER: &str = "orch";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SKIPPED_CI_DELAY_SECS: u64 = 5;
const DEFAULT_SSH_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },

    /// A `.env` file exists but cannot be read or parsed.
    #[error("failed to load .env file: {0}")]
    EnvFile(String),
}

/// Inventory service settings.
#[derive(Debug, Clone)]
pub struct InventorySettings {
    /// Base URL of the inventory API.
    pub url: String,
    /// Requester email, already lower-cased and trimmed.
    pub email: Option<String>,
    /// API secret.
    pub secret: Option<String>,
    /// Verify TLS certificates.
    pub verify_certs: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Value of the `Requester-Origin` header.
    pub requester_origin: String,
}

/// Credentials for one MAAS region.
#[derive(Debug, Clone, Default)]
pub struct MaasSiteSettings {
    /// MAAS host URL, e.g. `http://maas.example:5240`.
    pub host: Option<String>,
    /// `consumer:token:secret` API key.
    pub api_key: Option<String>,
}

/// MAAS settings for every site.
#[derive(Debug, Clone)]
pub struct MaasSettings {
    pub eq: MaasSiteSettings,
    pub ust: MaasSiteSettings,
    /// Base URL used to build power webhook URIs.
    pub webhook_base: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl MaasSettings {
    /// Settings for one site.
    #[must_use]
    pub fn site(&self, site: Site) -> &MaasSiteSettings {
        match site {
            Site::Eq => &self.eq,
            Site::Ust => &self.ust,
        }
    }
}

/// Jenkins settings.
#[derive(Debug, Clone)]
pub struct JenkinsSettings {
    pub url: String,
    pub user: Option<String>,
    pub token: Option<String>,
    /// How long to wait for a queued build to get a number.
    pub queue_timeout: Duration,
    /// Delay between queue polls.
    pub queue_poll_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// SSH settings for the system under test.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

/// Knobs of the migration workflow itself.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Domain appended to renamed power controllers.
    pub controller_domain: String,
    /// Inventory `username` that triggers the SUT Auth uninstall/reinstall.
    pub ci_sentinel_user: String,
    /// Delay used in place of the uninstall when it is skipped.
    pub skipped_ci_delay: Duration,
    /// Cap on waiting for an install/uninstall build to succeed.
    pub job_timeout: Duration,
    /// Delay between job progress polls.
    pub job_poll_interval: Duration,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            controller_domain: DEFAULT_CONTROLLER_DOMAIN.to_string(),
            ci_sentinel_user: DEFAULT_CI_SENTINEL_USER.to_string(),
            skipped_ci_delay: Duration::from_secs(DEFAULT_SKIPPED_CI_DELAY_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            job_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive (`debug`, `info`, ...).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Directory receiving `rehost.log`. Defaults to the system temp dir.
    pub dir: PathBuf,
}

/// All runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inventory: InventorySettings,
    pub maas: MaasSettings,
    pub jenkins: JenkinsSettings,
    pub ssh: SshSettings,
    pub migration: MigrationSettings,
    pub logging: LogSettings,
}

impl Settings {
    /// Load settings from the environment, after reading `.env` if present.
    ///
    /// # Errors
    /// Returns [`ConfigError::EnvFile`] when `.env` exists but is unreadable
    /// or malformed, and [`ConfigError::Invalid`] for unparsable numeric
    /// values.
    pub fn from_env() -> Result<Self, ConfigError> {
        check_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for unparsable numeric values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let request_timeout = secs(&var, "REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let email = var("AMD_EMAIL")
            .or_else(|| var("ATS_EMAIL"))
            .map(|e| e.trim().to_lowercase());

        let inventory = InventorySettings {
            url: var("ATS_URL")
                .or_else(|| var("HOST_NAME"))
                .unwrap_or_else(|| DEFAULT_INVENTORY_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            email,
            secret: var("ATS_SECRET").map(|s| s.trim().to_string()),
            verify_certs: parse_verify_certs(lookup("VERIFY_CERTS").as_deref()),
            request_timeout,
            requester_origin: var("HOSTNAME").unwrap_or_else(|| "unknown".to_string()),
        };

        let maas = MaasSettings {
            eq: MaasSiteSettings {
                host: var("MAAS_EQ_HOST"),
                api_key: var("MAAS_EQ_MAAS_API_KEY"),
            },
            ust: MaasSiteSettings {
                host: var("MAAS_UST_HOST"),
                api_key: var("MAAS_UST_MAAS_API_KEY"),
            },
            webhook_base: var("POWER_WEBHOOK_URL")
                .unwrap_or_else(|| DEFAULT_POWER_WEBHOOK_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            request_timeout,
        };

        let jenkins = JenkinsSettings {
            url: var("JENKINS_URL")
                .unwrap_or_else(|| DEFAULT_JENKINS_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            user: var("JENKINS_USER"),
            token: var("JENKINS_CREDS"),
            queue_timeout: secs(&var, "JENKINS_QUEUE_TIMEOUT_SECS", DEFAULT_QUEUE_TIMEOUT_SECS)?,
            queue_poll_interval: Duration::from_secs(1),
            request_timeout,
        };

        let ssh = SshSettings {
            username: var("SUT_SSH_USERNAME"),
            password: var("SUT_SSH_PASSWORD"),
            connect_timeout: secs(
                &var,
                "SSH_CONNECT_TIMEOUT_SECS",
                DEFAULT_SSH_CONNECT_TIMEOUT_SECS,
            )?,
        };

        let defaults = MigrationSettings::default();
        let migration = MigrationSettings {
            controller_domain: var("CONTROLLER_DOMAIN").unwrap_or(defaults.controller_domain),
            ci_sentinel_user: var("CI_SENTINEL_USER").unwrap_or(defaults.ci_sentinel_user),
            skipped_ci_delay: secs(&var, "SKIPPED_CI_DELAY_SECS", DEFAULT_SKIPPED_CI_DELAY_SECS)?,
            job_timeout: secs(&var, "CI_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS)?,
            job_poll_interval: defaults.job_poll_interval,
        };

        let logging = LogSettings {
            level: var("LOG_LEVEL").map_or_else(|| "info".to_string(), |l| normalize_level(&l)),
            json: var("LOG_JSON").is_some_and(|v| is_truthy(&v)),
            dir: var("LOG_DIR").map_or_else(std::env::temp_dir, PathBuf::from),
        };

        Ok(Self {
            inventory,
            maas,
            jenkins,
            ssh,
            migration,
            logging,
        })
    }
}

/// Return the value or a [`ConfigError::Missing`] naming the variable.
///
/// # Errors
/// Returns [`ConfigError::Missing`] when `value` is `None`.
pub fn require<'a>(value: Option<&'a String>, var: &'static str) -> Result<&'a str, ConfigError> {
    value.map(String::as_str).ok_or(ConfigError::Missing(var))
}

/// A missing `.env` is the normal case. Any other failure is reported.
fn check_env_file(result: Result<PathBuf, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

fn secs<F>(var: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                var: key,
                value: raw,
            }),
    }
}

/// `VERIFY_CERTS`: unset means "do not verify", `false` disables, anything
/// else enables.
fn parse_verify_certs(raw: Option<&str>) -> bool {
    match raw.map(|v| v.trim().to_lowercase()) {
        None => false,
        Some(v) => v != "false",
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    }
}
