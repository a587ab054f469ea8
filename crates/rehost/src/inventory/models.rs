//! Inventory (Conductor) record models.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::hostname::Hostname;

// ============================================================================
// System records
// ============================================================================

/// A system record as stored by the inventory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    /// Record identifier.
    pub id: String,
    /// Display name (the short hostname).
    #[serde(default)]
    pub name: Option<String>,
    /// Primary hostname or IP address.
    #[serde(default)]
    pub hostname_ip: Option<String>,
    /// Owner account; `orch` marks systems enrolled in SUT Auth.
    #[serde(default)]
    pub username: Option<String>,
    /// Platform descriptor.
    #[serde(default)]
    pub platforms: Option<Platform>,
    /// Platform configuration (power controllers, notes, ...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform_config: PlatformConfig,
    /// Fields this tool does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemRecord {
    /// Platform name, if any.
    #[must_use]
    pub fn platform_name(&self) -> Option<&str> {
        self.platforms.as_ref().and_then(|p| p.name.as_deref())
    }

    /// Whether the platform is one of the Asrock variants.
    #[must_use]
    pub fn is_asrock_platform(&self) -> bool {
        self.platform_name()
            .is_some_and(|name| name.to_lowercase().contains("asrock"))
    }
}

/// Platform descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Free-form platform configuration.
///
/// Keys other than `power_controllers` and `notes` are carried through
/// untouched so a wholesale write-back does not lose them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub power_controllers: Vec<PowerController>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlatformConfig {
    /// Replace every occurrence of `old` in the notes with `new`.
    pub fn replace_in_notes(&mut self, old: &str, new: &str) {
        if old.is_empty() {
            return;
        }
        if let Some(notes) = self.notes.as_mut() {
            *notes = notes.replace(old, new);
        }
    }
}

// ============================================================================
// Power controllers
// ============================================================================

/// Kind of an auxiliary power-control device, derived from its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    /// Baseboard management controller.
    Bmc,
    /// PiKVM appliance.
    PiKvm,
    /// Raspberry Pi power controller.
    Rpi,
    /// Anything else.
    Unknown,
}

impl ControllerKind {
    /// Classify a controller from its network address.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        let address = address.to_lowercase();
        if address.contains("bmc") {
            Self::Bmc
        } else if address.contains("pikvm") {
            Self::PiKvm
        } else if address.contains("rpi") {
            Self::Rpi
        } else {
            Self::Unknown
        }
    }

    /// Hostname prefix used for this kind of device.
    #[must_use]
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Bmc => Some("bmc"),
            Self::PiKvm => Some("pikvm"),
            Self::Rpi => Some("rpi"),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bmc => write!(f, "bmc"),
            Self::PiKvm => write!(f, "pikvm"),
            Self::Rpi => write!(f, "rpi"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A power controller attached to a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PowerControllerWire", into = "PowerControllerWire")]
pub struct PowerController {
    address: String,
    kind: ControllerKind,
    pub username: Option<String>,
    pub password: Option<String>,
    pub extra: Map<String, Value>,
}

impl PowerController {
    /// Build a controller descriptor.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        let address = address.into();
        Self {
            kind: ControllerKind::from_address(&address),
            address,
            username,
            password,
            extra: Map::new(),
        }
    }

    /// Network address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Kind derived from the address.
    #[must_use]
    pub const fn kind(&self) -> ControllerKind {
        self.kind
    }

    /// Change the address and re-derive the kind.
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
        self.kind = ControllerKind::from_address(&self.address);
    }
}

#[derive(Serialize, Deserialize)]
struct PowerControllerWire {
    #[serde(default)]
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<PowerControllerWire> for PowerController {
    fn from(wire: PowerControllerWire) -> Self {
        let mut controller = Self::new(wire.address, wire.username, wire.password);
        controller.extra = wire.extra;
        controller
    }
}

impl From<PowerController> for PowerControllerWire {
    fn from(controller: PowerController) -> Self {
        Self {
            address: controller.address,
            username: controller.username,
            password: controller.password,
            extra: controller.extra,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Query filter for system records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname_ip: Option<String>,
    /// Ask the service for a paged response with counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_record_count: Option<bool>,
}

impl RecordFilter {
    /// Filter on the primary hostname.
    #[must_use]
    pub fn by_hostname(hostname: &Hostname) -> Self {
        Self {
            hostname_ip: Some(hostname.to_string()),
            ..Self::default()
        }
    }
}

/// Partial record update. Only the fields that are set are written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_config: Option<PlatformConfig>,
}

impl RecordUpdate {
    /// Update payload renaming `record` to `new_hostname`.
    #[must_use]
    pub fn rename(record: &SystemRecord, new_hostname: &Hostname) -> Self {
        Self {
            id: record.id.clone(),
            name: Some(new_hostname.short_name().to_string()),
            hostname_ip: Some(new_hostname.to_string()),
            platform_config: Some(record.platform_config.clone()),
        }
    }

    /// Like [`RecordUpdate::rename`] without the platform config.
    #[must_use]
    pub fn rename_identity(record: &SystemRecord, new_hostname: &Hostname) -> Self {
        Self {
            platform_config: None,
            ..Self::rename(record, new_hostname)
        }
    }
}

/// Paged query result.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryPage<T> {
    pub data: Vec<T>,
    pub record_count: u64,
    pub last_page: u64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
