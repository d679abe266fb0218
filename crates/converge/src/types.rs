//! Core types: identifiers, closed enumerations and the declared
//! configuration tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provider-assigned identifier of a resource instance.
///
/// Identifiers compare case-sensitively; locking and interface matching
/// use the case-folded form because the provider treats ids case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, e.g. `web-0` for `.../virtualMachines/web-0`.
    pub fn name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }

    /// Key used for name-scoped locking.
    pub fn lock_key(&self) -> String {
        self.0.trim_end_matches('/').to_ascii_lowercase()
    }

    pub fn eq_ignore_case(&self, other: &Self) -> bool {
        self.lock_key() == other.lock_key()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Declares a closed, string-backed enumeration decoded case-insensitively
/// at the serde boundary and rendered with its canonical spelling.
macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Canonical provider spelling.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $(
                    if s.trim().eq_ignore_ascii_case($text) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!(
                    "unknown {} '{}' (expected one of: {})",
                    stringify!($name),
                    s,
                    [$($text),+].join(", ")
                ))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

closed_enum! {
    /// Kind of resource a configuration describes
    ResourceKind {
        VirtualMachine => "VirtualMachine",
        ScaleSet => "ScaleSet",
        ManagedDisk => "ManagedDisk",
    }
}

closed_enum! {
    /// Scheduling priority tier
    Priority {
        Regular => "Regular",
        /// Discounted, evictable capacity
        Spot => "Spot",
    }
}

closed_enum! {
    /// What the provider does to a Spot instance on eviction
    EvictionPolicy {
        Deallocate => "Deallocate",
        Delete => "Delete",
    }
}

closed_enum! {
    /// How scale-set model changes reach running instances
    UpgradeMode {
        Manual => "Manual",
        Automatic => "Automatic",
        Rolling => "Rolling",
    }
}

closed_enum! {
    /// Host caching for a disk
    CachingMode {
        None => "None",
        ReadOnly => "ReadOnly",
        ReadWrite => "ReadWrite",
    }
}

closed_enum! {
    /// Storage tier backing a managed disk
    StorageAccountType {
        StandardLrs => "Standard_LRS",
        StandardSsdLrs => "StandardSSD_LRS",
        PremiumLrs => "Premium_LRS",
        PremiumV2Lrs => "PremiumV2_LRS",
        UltraSsdLrs => "UltraSSD_LRS",
    }
}

/// Operating system disk of an instance or scale-set model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsDisk {
    pub caching: CachingMode,
    pub storage_account_type: StorageAccountType,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
    #[serde(default)]
    pub write_accelerator_enabled: bool,
}

/// Data disk attached at a logical unit number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataDisk {
    pub lun: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub caching: CachingMode,
    pub storage_account_type: StorageAccountType,
    pub disk_size_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkInterface {
    pub id: ResourceId,
    #[serde(default)]
    pub primary: bool,
}

impl NetworkInterface {
    /// Equal up to the case of the interface id.
    pub fn same_as(&self, other: &Self) -> bool {
        self.id.eq_ignore_case(&other.id) && self.primary == other.primary
    }
}

/// Batching limits for rolling upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingUpgradePolicy {
    #[serde(default = "default_percent")]
    pub max_batch_instance_percent: u8,
    #[serde(default = "default_percent")]
    pub max_unhealthy_instance_percent: u8,
    #[serde(default = "default_percent")]
    pub max_unhealthy_upgraded_instance_percent: u8,
    /// ISO 8601 duration
    #[serde(default = "default_pause")]
    pub pause_time_between_batches: String,
}

fn default_percent() -> u8 {
    20
}

fn default_pause() -> String {
    "PT0S".to_string()
}

impl Default for RollingUpgradePolicy {
    fn default() -> Self {
        Self {
            max_batch_instance_percent: default_percent(),
            max_unhealthy_instance_percent: default_percent(),
            max_unhealthy_upgraded_instance_percent: default_percent(),
            pause_time_between_batches: default_pause(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomaticOsUpgradePolicy {
    #[serde(default)]
    pub disable_automatic_rollback: bool,
    #[serde(default = "default_true")]
    pub enable_automatic_os_upgrade: bool,
}

fn default_true() -> bool {
    true
}

/// VM extension installed on an instance or scale-set model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extension {
    pub name: String,
    pub publisher: String,
    #[serde(rename = "type")]
    pub extension_type: String,
    pub type_handler_version: String,
    #[serde(default = "default_true")]
    pub auto_upgrade_minor_version: bool,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl Extension {
    /// Extension names are case-insensitive.
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Equal up to the case of the extension name.
    pub fn same_as(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.publisher == other.publisher
            && self.extension_type == other.extension_type
            && self.type_handler_version == other.type_handler_version
            && self.auto_upgrade_minor_version == other.auto_upgrade_minor_version
            && self.settings == other.settings
    }

    /// Whether this extension reports application health to the provider.
    pub fn is_health_extension(&self) -> bool {
        ["ApplicationHealthLinux", "ApplicationHealthWindows"]
            .iter()
            .any(|t| self.extension_type.eq_ignore_ascii_case(t))
    }
}

/// Desired state of one resource instance.
///
/// Each field is one attribute group (see [`crate::AttributeGroup`]).
/// Values are never mutated in place; build a new value for "after".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredConfiguration {
    pub kind: ResourceKind,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Instance size / SKU name
    #[serde(default)]
    pub size: Option<String>,
    /// Scale sets only
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub eviction_policy: Option<EvictionPolicy>,
    /// `-1` means "pay up to the on-demand price"
    #[serde(default)]
    pub max_bid_price: Option<f64>,
    #[serde(default)]
    pub os_disk: Option<OsDisk>,
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub upgrade_mode: Option<UpgradeMode>,
    #[serde(default)]
    pub rolling_upgrade_policy: Option<RollingUpgradePolicy>,
    #[serde(default)]
    pub automatic_os_upgrade_policy: Option<AutomaticOsUpgradePolicy>,
    #[serde(default)]
    pub health_probe_id: Option<ResourceId>,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    /// Managed disks only
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
    /// Managed disks only
    #[serde(default)]
    pub storage_account_type: Option<StorageAccountType>,
}

impl DeclaredConfiguration {
    /// Minimal configuration with every optional group absent.
    pub fn new(kind: ResourceKind, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            location: location.into(),
            tags: BTreeMap::new(),
            size: None,
            capacity: None,
            priority: None,
            eviction_policy: None,
            max_bid_price: None,
            os_disk: None,
            data_disks: Vec::new(),
            network_interfaces: Vec::new(),
            upgrade_mode: None,
            rolling_upgrade_policy: None,
            automatic_os_upgrade_policy: None,
            health_probe_id: None,
            extensions: Vec::new(),
            disk_size_gb: None,
            storage_account_type: None,
        }
    }

    /// Priority with the provider default applied.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or(Priority::Regular)
    }

    /// Upgrade mode with the provider default applied.
    pub fn effective_upgrade_mode(&self) -> UpgradeMode {
        self.upgrade_mode.unwrap_or(UpgradeMode::Manual)
    }

    pub fn has_health_extension(&self) -> bool {
        self.extensions.iter().any(Extension::is_health_extension)
    }
}

/// One entry of an instance view, e.g. `PowerState/running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub code: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, rename = "displayStatus")]
    pub display_status: Option<String>,
}

impl InstanceStatus {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            time: None,
            display_status: None,
        }
    }

    pub fn at(code: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            time: Some(time),
            display_status: None,
        }
    }
}

/// Provider's current representation of a resource instance.
///
/// Fetched fresh at the start of each pass and dropped at its end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub id: ResourceId,
    pub configuration: DeclaredConfiguration,
    /// Instance a managed disk is attached to
    #[serde(default)]
    pub managed_by: Option<ResourceId>,
}

impl ObservedState {
    pub fn new(id: impl Into<ResourceId>, configuration: DeclaredConfiguration) -> Self {
        Self {
            id: id.into(),
            configuration,
            managed_by: None,
        }
    }

    /// Instance whose power state gates disk-level mutations.
    ///
    /// A VM gates itself, a managed disk is gated by the instance it is
    /// attached to, and a scale-set model has no single instance to stop.
    pub fn power_target(&self) -> Option<&ResourceId> {
        match self.configuration.kind {
            ResourceKind::VirtualMachine => Some(&self.id),
            ResourceKind::ManagedDisk => self.managed_by.as_ref(),
            ResourceKind::ScaleSet => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_enum_decodes_case_insensitively() {
        assert_eq!("spot".parse::<Priority>().unwrap(), Priority::Spot);
        assert_eq!("ROLLING".parse::<UpgradeMode>().unwrap(), UpgradeMode::Rolling);
        assert_eq!(
            "premium_lrs".parse::<StorageAccountType>().unwrap(),
            StorageAccountType::PremiumLrs
        );
        assert!("Low".parse::<Priority>().is_err());
    }

    #[test]
    fn test_closed_enum_serializes_canonical_spelling() {
        let json = serde_json::to_string(&CachingMode::ReadWrite).unwrap();
        assert_eq!(json, "\"ReadWrite\"");
        let decoded: CachingMode = serde_json::from_str("\"readwrite\"").unwrap();
        assert_eq!(decoded, CachingMode::ReadWrite);
    }

    #[test]
    fn test_resource_id_name_and_lock_key() {
        let id = ResourceId::new("/subscriptions/s/resourceGroups/RG/providers/P/virtualMachines/Web-0");
        assert_eq!(id.name(), "Web-0");
        assert!(id.lock_key().ends_with("virtualmachines/web-0"));
        assert!(id.eq_ignore_case(&ResourceId::new(id.as_str().to_uppercase())));
    }

    #[test]
    fn test_declared_configuration_rejects_unknown_fields() {
        let json = r#"{"kind":"VirtualMachine","name":"a","location":"b","sizee":"x"}"#;
        assert!(serde_json::from_str::<DeclaredConfiguration>(json).is_err());
    }

    #[test]
    fn test_declared_configuration_defaults() {
        let json = r#"{"kind":"scaleset","name":"pool","location":"westeurope"}"#;
        let config: DeclaredConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, ResourceKind::ScaleSet);
        assert_eq!(config.effective_priority(), Priority::Regular);
        assert_eq!(config.effective_upgrade_mode(), UpgradeMode::Manual);
        assert!(config.data_disks.is_empty());
    }

    #[test]
    fn test_power_target_by_kind() {
        let vm = ObservedState::new(
            "/vms/a",
            DeclaredConfiguration::new(ResourceKind::VirtualMachine, "a", "x"),
        );
        assert_eq!(vm.power_target(), Some(&ResourceId::new("/vms/a")));

        let mut disk = ObservedState::new(
            "/disks/d",
            DeclaredConfiguration::new(ResourceKind::ManagedDisk, "d", "x"),
        );
        assert_eq!(disk.power_target(), None);
        disk.managed_by = Some(ResourceId::new("/vms/a"));
        assert_eq!(disk.power_target(), Some(&ResourceId::new("/vms/a")));

        let pool = ObservedState::new(
            "/pools/p",
            DeclaredConfiguration::new(ResourceKind::ScaleSet, "p", "x"),
        );
        assert_eq!(pool.power_target(), None);
    }
}
