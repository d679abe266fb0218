//! Attribute groups and the provider's fixed mutability rules.
//!
//! The mutation class of a group is a static property of the provider API,
//! looked up per resource kind. It is never computed from values; value-level
//! escalation (disk shrink) lives in [`crate::diff`].

use crate::types::{DeclaredConfiguration, Extension, NetworkInterface, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One logical attribute group of a declared configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeGroup {
    Name,
    Location,
    Tags,
    Size,
    Capacity,
    Priority,
    EvictionPolicy,
    MaxBidPrice,
    OsDisk,
    DataDisks,
    NetworkInterfaces,
    UpgradeMode,
    RollingUpgradePolicy,
    AutomaticOsUpgradePolicy,
    HealthProbe,
    Extensions,
    DiskSize,
    StorageAccountType,
}

/// How a change to a group can be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationClass {
    NoOp,
    InPlace,
    RequiresInstanceRefresh,
    RequiresReplacement,
}

impl fmt::Display for MutationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoOp => "no-op",
            Self::InPlace => "in-place",
            Self::RequiresInstanceRefresh => "requires instance refresh",
            Self::RequiresReplacement => "requires replacement",
        })
    }
}

/// Broad category a group belongs to.
///
/// Only `Disk` groups gate on the instance power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupCategory {
    Identity,
    Metadata,
    Compute,
    Disk,
    Network,
    Upgrade,
    Extensions,
}

const VIRTUAL_MACHINE_GROUPS: &[AttributeGroup] = &[
    AttributeGroup::Name,
    AttributeGroup::Location,
    AttributeGroup::Tags,
    AttributeGroup::Size,
    AttributeGroup::Priority,
    AttributeGroup::EvictionPolicy,
    AttributeGroup::MaxBidPrice,
    AttributeGroup::OsDisk,
    AttributeGroup::DataDisks,
    AttributeGroup::NetworkInterfaces,
    AttributeGroup::Extensions,
];

const SCALE_SET_GROUPS: &[AttributeGroup] = &[
    AttributeGroup::Name,
    AttributeGroup::Location,
    AttributeGroup::Tags,
    AttributeGroup::Size,
    AttributeGroup::Capacity,
    AttributeGroup::Priority,
    AttributeGroup::EvictionPolicy,
    AttributeGroup::MaxBidPrice,
    AttributeGroup::OsDisk,
    AttributeGroup::DataDisks,
    AttributeGroup::NetworkInterfaces,
    AttributeGroup::UpgradeMode,
    AttributeGroup::RollingUpgradePolicy,
    AttributeGroup::AutomaticOsUpgradePolicy,
    AttributeGroup::HealthProbe,
    AttributeGroup::Extensions,
];

const MANAGED_DISK_GROUPS: &[AttributeGroup] = &[
    AttributeGroup::Name,
    AttributeGroup::Location,
    AttributeGroup::Tags,
    AttributeGroup::DiskSize,
    AttributeGroup::StorageAccountType,
];

impl AttributeGroup {
    /// Every group known to a resource kind, in stable order.
    pub fn for_kind(kind: ResourceKind) -> &'static [Self] {
        match kind {
            ResourceKind::VirtualMachine => VIRTUAL_MACHINE_GROUPS,
            ResourceKind::ScaleSet => SCALE_SET_GROUPS,
            ResourceKind::ManagedDisk => MANAGED_DISK_GROUPS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Location => "location",
            Self::Tags => "tags",
            Self::Size => "size",
            Self::Capacity => "capacity",
            Self::Priority => "priority",
            Self::EvictionPolicy => "eviction_policy",
            Self::MaxBidPrice => "max_bid_price",
            Self::OsDisk => "os_disk",
            Self::DataDisks => "data_disks",
            Self::NetworkInterfaces => "network_interfaces",
            Self::UpgradeMode => "upgrade_mode",
            Self::RollingUpgradePolicy => "rolling_upgrade_policy",
            Self::AutomaticOsUpgradePolicy => "automatic_os_upgrade_policy",
            Self::HealthProbe => "health_probe_id",
            Self::Extensions => "extensions",
            Self::DiskSize => "disk_size_gb",
            Self::StorageAccountType => "storage_account_type",
        }
    }

    pub fn category(&self) -> GroupCategory {
        match self {
            Self::Name | Self::Location => GroupCategory::Identity,
            Self::Tags => GroupCategory::Metadata,
            Self::Size
            | Self::Capacity
            | Self::Priority
            | Self::EvictionPolicy
            | Self::MaxBidPrice => GroupCategory::Compute,
            Self::OsDisk | Self::DataDisks | Self::DiskSize | Self::StorageAccountType => {
                GroupCategory::Disk
            }
            Self::NetworkInterfaces => GroupCategory::Network,
            Self::UpgradeMode
            | Self::RollingUpgradePolicy
            | Self::AutomaticOsUpgradePolicy
            | Self::HealthProbe => GroupCategory::Upgrade,
            Self::Extensions => GroupCategory::Extensions,
        }
    }

    /// Static class a change to this group carries for `kind`.
    pub fn change_class(&self, kind: ResourceKind) -> MutationClass {
        match (self, kind) {
            (Self::Name | Self::Location | Self::Priority | Self::EvictionPolicy, _) => {
                MutationClass::RequiresReplacement
            }
            (Self::MaxBidPrice, ResourceKind::ScaleSet) => MutationClass::InPlace,
            (
                Self::Size
                | Self::MaxBidPrice
                | Self::OsDisk
                | Self::DataDisks
                | Self::NetworkInterfaces
                | Self::DiskSize
                | Self::StorageAccountType,
                _,
            ) => MutationClass::RequiresInstanceRefresh,
            (
                Self::Tags
                | Self::Capacity
                | Self::UpgradeMode
                | Self::RollingUpgradePolicy
                | Self::AutomaticOsUpgradePolicy
                | Self::HealthProbe
                | Self::Extensions,
                _,
            ) => MutationClass::InPlace,
        }
    }
}

impl fmt::Display for AttributeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compare two keyed collections element-wise, ignoring order.
///
/// Duplicate keys compare as distinct entries so they still register as a
/// change; the validator rejects them separately.
pub fn keyed_eq<T, K, F>(previous: &[T], next: &[T], key: F) -> bool
where
    T: PartialEq,
    K: Ord,
    F: Fn(&T) -> K,
{
    keyed_eq_by(previous, next, key, T::eq)
}

/// Like [`keyed_eq`], with matched elements compared by `same`.
pub fn keyed_eq_by<T, K, F, S>(previous: &[T], next: &[T], key: F, same: S) -> bool
where
    K: Ord,
    F: Fn(&T) -> K,
    S: Fn(&T, &T) -> bool,
{
    if previous.len() != next.len() {
        return false;
    }
    let before = index_by(previous, &key);
    let after = index_by(next, &key);
    before.len() == after.len()
        && before.iter().all(|(k, items)| {
            after.get(k).is_some_and(|others| {
                items.len() == others.len()
                    && items.iter().zip(others).all(|(a, b)| same(a, b))
            })
        })
}

fn index_by<'a, T, K: Ord>(items: &'a [T], key: &impl Fn(&T) -> K) -> BTreeMap<K, Vec<&'a T>> {
    let mut map: BTreeMap<K, Vec<&'a T>> = BTreeMap::new();
    for item in items {
        map.entry(key(item)).or_default().push(item);
    }
    map
}

impl DeclaredConfiguration {
    /// Structural equality of one group between two configurations.
    pub fn group_eq(&self, other: &Self, group: AttributeGroup) -> bool {
        match group {
            AttributeGroup::Name => self.name == other.name,
            AttributeGroup::Location => self.location.eq_ignore_ascii_case(&other.location),
            AttributeGroup::Tags => self.tags == other.tags,
            AttributeGroup::Size => self.size == other.size,
            AttributeGroup::Capacity => self.capacity == other.capacity,
            AttributeGroup::Priority => self.effective_priority() == other.effective_priority(),
            AttributeGroup::EvictionPolicy => self.eviction_policy == other.eviction_policy,
            AttributeGroup::MaxBidPrice => self.max_bid_price == other.max_bid_price,
            AttributeGroup::OsDisk => self.os_disk == other.os_disk,
            AttributeGroup::DataDisks => keyed_eq(&self.data_disks, &other.data_disks, |d| d.lun),
            AttributeGroup::NetworkInterfaces => keyed_eq_by(
                &self.network_interfaces,
                &other.network_interfaces,
                |nic| nic.id.lock_key(),
                NetworkInterface::same_as,
            ),
            AttributeGroup::UpgradeMode => {
                self.effective_upgrade_mode() == other.effective_upgrade_mode()
            }
            AttributeGroup::RollingUpgradePolicy => {
                self.rolling_upgrade_policy == other.rolling_upgrade_policy
            }
            AttributeGroup::AutomaticOsUpgradePolicy => {
                self.automatic_os_upgrade_policy == other.automatic_os_upgrade_policy
            }
            AttributeGroup::HealthProbe => match (&self.health_probe_id, &other.health_probe_id) {
                (Some(a), Some(b)) => a.eq_ignore_case(b),
                (a, b) => a == b,
            },
            AttributeGroup::Extensions => {
                keyed_eq_by(
                    &self.extensions,
                    &other.extensions,
                    Extension::key,
                    Extension::same_as,
                )
            }
            AttributeGroup::DiskSize => self.disk_size_gb == other.disk_size_gb,
            AttributeGroup::StorageAccountType => {
                self.storage_account_type == other.storage_account_type
            }
        }
    }

    /// JSON value of one group, as sent in an update payload.
    pub fn group_value(&self, group: AttributeGroup) -> serde_json::Result<Value> {
        match group {
            AttributeGroup::Name => serde_json::to_value(&self.name),
            AttributeGroup::Location => serde_json::to_value(&self.location),
            AttributeGroup::Tags => serde_json::to_value(&self.tags),
            AttributeGroup::Size => serde_json::to_value(&self.size),
            AttributeGroup::Capacity => serde_json::to_value(self.capacity),
            AttributeGroup::Priority => serde_json::to_value(self.priority),
            AttributeGroup::EvictionPolicy => serde_json::to_value(self.eviction_policy),
            AttributeGroup::MaxBidPrice => serde_json::to_value(self.max_bid_price),
            AttributeGroup::OsDisk => serde_json::to_value(&self.os_disk),
            AttributeGroup::DataDisks => serde_json::to_value(&self.data_disks),
            AttributeGroup::NetworkInterfaces => serde_json::to_value(&self.network_interfaces),
            AttributeGroup::UpgradeMode => serde_json::to_value(self.upgrade_mode),
            AttributeGroup::RollingUpgradePolicy => {
                serde_json::to_value(&self.rolling_upgrade_policy)
            }
            AttributeGroup::AutomaticOsUpgradePolicy => {
                serde_json::to_value(&self.automatic_os_upgrade_policy)
            }
            AttributeGroup::HealthProbe => serde_json::to_value(&self.health_probe_id),
            AttributeGroup::Extensions => serde_json::to_value(&self.extensions),
            AttributeGroup::DiskSize => serde_json::to_value(self.disk_size_gb),
            AttributeGroup::StorageAccountType => serde_json::to_value(self.storage_account_type),
        }
    }

    /// Build a new configuration with one group replaced by `value`.
    pub fn with_group_value(&self, group: AttributeGroup, value: Value) -> serde_json::Result<Self> {
        let mut next = self.clone();
        match group {
            AttributeGroup::Name => next.name = serde_json::from_value(value)?,
            AttributeGroup::Location => next.location = serde_json::from_value(value)?,
            AttributeGroup::Tags => next.tags = serde_json::from_value(value)?,
            AttributeGroup::Size => next.size = serde_json::from_value(value)?,
            AttributeGroup::Capacity => next.capacity = serde_json::from_value(value)?,
            AttributeGroup::Priority => next.priority = serde_json::from_value(value)?,
            AttributeGroup::EvictionPolicy => next.eviction_policy = serde_json::from_value(value)?,
            AttributeGroup::MaxBidPrice => next.max_bid_price = serde_json::from_value(value)?,
            AttributeGroup::OsDisk => next.os_disk = serde_json::from_value(value)?,
            AttributeGroup::DataDisks => next.data_disks = serde_json::from_value(value)?,
            AttributeGroup::NetworkInterfaces => {
                next.network_interfaces = serde_json::from_value(value)?;
            }
            AttributeGroup::UpgradeMode => next.upgrade_mode = serde_json::from_value(value)?,
            AttributeGroup::RollingUpgradePolicy => {
                next.rolling_upgrade_policy = serde_json::from_value(value)?;
            }
            AttributeGroup::AutomaticOsUpgradePolicy => {
                next.automatic_os_upgrade_policy = serde_json::from_value(value)?;
            }
            AttributeGroup::HealthProbe => next.health_probe_id = serde_json::from_value(value)?,
            AttributeGroup::Extensions => next.extensions = serde_json::from_value(value)?,
            AttributeGroup::DiskSize => next.disk_size_gb = serde_json::from_value(value)?,
            AttributeGroup::StorageAccountType => {
                next.storage_account_type = serde_json::from_value(value)?;
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CachingMode, DataDisk, StorageAccountType};

    fn disk(lun: u32, size: u32) -> DataDisk {
        DataDisk {
            lun,
            name: None,
            caching: CachingMode::ReadOnly,
            storage_account_type: StorageAccountType::PremiumLrs,
            disk_size_gb: size,
        }
    }

    #[test]
    fn test_fixed_classes() {
        let vm = ResourceKind::VirtualMachine;
        assert_eq!(
            AttributeGroup::NetworkInterfaces.change_class(vm),
            MutationClass::RequiresInstanceRefresh
        );
        assert_eq!(
            AttributeGroup::Name.change_class(vm),
            MutationClass::RequiresReplacement
        );
        assert_eq!(AttributeGroup::Tags.change_class(vm), MutationClass::InPlace);
        assert_eq!(
            AttributeGroup::MaxBidPrice.change_class(ResourceKind::ScaleSet),
            MutationClass::InPlace
        );
    }

    #[test]
    fn test_every_kind_lists_identity_groups() {
        for kind in [
            ResourceKind::VirtualMachine,
            ResourceKind::ScaleSet,
            ResourceKind::ManagedDisk,
        ] {
            let groups = AttributeGroup::for_kind(kind);
            assert!(groups.contains(&AttributeGroup::Name));
            assert!(groups.contains(&AttributeGroup::Tags));
        }
        assert!(!AttributeGroup::for_kind(ResourceKind::VirtualMachine)
            .contains(&AttributeGroup::UpgradeMode));
    }

    #[test]
    fn test_keyed_eq_ignores_order() {
        let a = vec![disk(0, 10), disk(1, 20)];
        let b = vec![disk(1, 20), disk(0, 10)];
        assert!(keyed_eq(&a, &b, |d| d.lun));

        let c = vec![disk(1, 30), disk(0, 10)];
        assert!(!keyed_eq(&a, &c, |d| d.lun));

        let d = vec![disk(0, 10)];
        assert!(!keyed_eq(&a, &d, |d| d.lun));
    }

    #[test]
    fn test_keyed_eq_by_uses_element_comparison() {
        let a = vec![disk(0, 10), disk(0, 20)];
        let b = vec![disk(0, 10), disk(0, 30)];
        assert!(!keyed_eq_by(&a, &b, |d| d.lun, |x, y| x == y));
        assert!(keyed_eq_by(&a, &b, |d| d.lun, |x, y| x.lun == y.lun));
    }

    #[test]
    fn test_group_value_round_trips_through_with_group_value() {
        let mut config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web", "eu");
        config.data_disks = vec![disk(2, 64)];
        let value = config.group_value(AttributeGroup::DataDisks).unwrap();

        let empty = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web", "eu");
        let rebuilt = empty
            .with_group_value(AttributeGroup::DataDisks, value)
            .unwrap();
        assert_eq!(rebuilt, config);
    }
}
