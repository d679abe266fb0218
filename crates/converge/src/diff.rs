//! Attribute diff classification between two declared configurations

use crate::group::{AttributeGroup, GroupCategory, MutationClass};
use crate::types::DeclaredConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of one attribute group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDiff {
    /// Group this entry describes
    pub group: AttributeGroup,
    /// How the change must be applied; `NoOp` when unchanged
    pub class: MutationClass,
    /// Whether previous and next differ
    pub changed: bool,
    /// Why the class was escalated beyond the static table, if it was
    pub reason: Option<String>,
}

impl AttributeDiff {
    fn unchanged(group: AttributeGroup) -> Self {
        Self {
            group,
            class: MutationClass::NoOp,
            changed: false,
            reason: None,
        }
    }

    /// Whether this entry gates on the target instance being offline
    pub fn requires_offline(&self) -> bool {
        self.class == MutationClass::RequiresInstanceRefresh
            && self.group.category() == GroupCategory::Disk
    }
}

/// Every group of one resource kind mapped to its diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSet {
    entries: BTreeMap<AttributeGroup, AttributeDiff>,
}

impl DiffSet {
    /// Diff for a group; groups the kind does not know are `NoOp`
    pub fn get(&self, group: AttributeGroup) -> AttributeDiff {
        self.entries
            .get(&group)
            .cloned()
            .unwrap_or_else(|| AttributeDiff::unchanged(group))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDiff> {
        self.entries.values()
    }

    /// Entries whose class is not `NoOp`
    pub fn changed(&self) -> impl Iterator<Item = &AttributeDiff> {
        self.entries
            .values()
            .filter(|d| d.class != MutationClass::NoOp)
    }

    /// Whether every group is unchanged
    pub fn is_noop(&self) -> bool {
        self.changed().next().is_none()
    }

    pub fn has_replacements(&self) -> bool {
        self.changed()
            .any(|d| d.class == MutationClass::RequiresReplacement)
    }

    /// Whether any changed group is a disk group needing the instance offline
    pub fn requires_offline(&self) -> bool {
        self.changed().any(AttributeDiff::requires_offline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts per class, for display
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for diff in self.changed() {
            match diff.class {
                MutationClass::InPlace => summary.in_place += 1,
                MutationClass::RequiresInstanceRefresh => summary.refresh += 1,
                MutationClass::RequiresReplacement => summary.replacement += 1,
                MutationClass::NoOp => {}
            }
        }
        summary
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub in_place: usize,
    pub refresh: usize,
    pub replacement: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.in_place + self.refresh + self.replacement
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Classify every group of `next`'s resource kind against `previous`.
///
/// Never fails. A kind mismatch is reported on the `Name` group as a
/// replacement, since the two configurations describe different resources.
pub fn classify(previous: &DeclaredConfiguration, next: &DeclaredConfiguration) -> DiffSet {
    let kind = next.kind;
    let mut entries = BTreeMap::new();

    for &group in AttributeGroup::for_kind(kind) {
        let changed = !previous.group_eq(next, group);
        let diff = if changed {
            let reason = shrink_reason(group, previous, next);
            let class = if reason.is_some() {
                MutationClass::RequiresReplacement
            } else {
                group.change_class(kind)
            };
            AttributeDiff {
                group,
                class,
                changed,
                reason,
            }
        } else {
            AttributeDiff::unchanged(group)
        };
        entries.insert(group, diff);
    }

    if previous.kind != kind {
        entries.insert(
            AttributeGroup::Name,
            AttributeDiff {
                group: AttributeGroup::Name,
                class: MutationClass::RequiresReplacement,
                changed: true,
                reason: Some(format!(
                    "resource kind changes from {} to {}",
                    previous.kind, kind
                )),
            },
        );
    }

    DiffSet { entries }
}

/// Disks may only grow; a shrink forces replacement.
fn shrink_reason(
    group: AttributeGroup,
    previous: &DeclaredConfiguration,
    next: &DeclaredConfiguration,
) -> Option<String> {
    match group {
        AttributeGroup::OsDisk => {
            let before = previous.os_disk.as_ref()?.disk_size_gb?;
            let after = next.os_disk.as_ref()?.disk_size_gb?;
            (after < before).then(|| format!("os disk shrinks from {before} GB to {after} GB"))
        }
        AttributeGroup::DataDisks => {
            let shrinks: Vec<String> = next
                .data_disks
                .iter()
                .filter_map(|disk| {
                    let old = previous.data_disks.iter().find(|d| d.lun == disk.lun)?;
                    (disk.disk_size_gb < old.disk_size_gb).then(|| {
                        format!(
                            "data disk at LUN {} shrinks from {} GB to {} GB",
                            disk.lun, old.disk_size_gb, disk.disk_size_gb
                        )
                    })
                })
                .collect();
            (!shrinks.is_empty()).then(|| shrinks.join(", "))
        }
        AttributeGroup::DiskSize => {
            let before = previous.disk_size_gb?;
            let after = next.disk_size_gb?;
            (after < before).then(|| format!("disk shrinks from {before} GB to {after} GB"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CachingMode, DataDisk, Extension, NetworkInterface, OsDisk, ResourceId, ResourceKind,
        StorageAccountType,
    };

    fn vm() -> DeclaredConfiguration {
        let mut config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "westeurope");
        config.size = Some("Standard_D2s_v5".to_string());
        config.os_disk = Some(OsDisk {
            caching: CachingMode::ReadWrite,
            storage_account_type: StorageAccountType::PremiumLrs,
            disk_size_gb: Some(10),
            write_accelerator_enabled: false,
        });
        config.data_disks = vec![data_disk(0, 32), data_disk(1, 64)];
        config.network_interfaces = vec![
            NetworkInterface {
                id: ResourceId::new("/nics/a"),
                primary: true,
            },
            NetworkInterface {
                id: ResourceId::new("/nics/b"),
                primary: false,
            },
        ];
        config
    }

    fn data_disk(lun: u32, size: u32) -> DataDisk {
        DataDisk {
            lun,
            name: Some(format!("data-{lun}")),
            caching: CachingMode::ReadOnly,
            storage_account_type: StorageAccountType::PremiumLrs,
            disk_size_gb: size,
        }
    }

    #[test]
    fn test_unchanged_is_all_noop() {
        let diffs = classify(&vm(), &vm());
        assert!(diffs.is_noop());
        assert_eq!(
            diffs.len(),
            AttributeGroup::for_kind(ResourceKind::VirtualMachine).len()
        );
        assert!(diffs.iter().all(|d| d.class == MutationClass::NoOp && !d.changed));
    }

    #[test]
    fn test_reordered_collections_are_noop() {
        let mut next = vm();
        next.data_disks.reverse();
        next.network_interfaces.reverse();
        assert!(classify(&vm(), &next).is_noop());
    }

    #[test]
    fn test_nic_ids_compare_case_insensitively() {
        let mut next = vm();
        next.network_interfaces[0].id = ResourceId::new("/NICS/A");
        assert!(classify(&vm(), &next).is_noop());

        next.network_interfaces[0].primary = false;
        let diffs = classify(&vm(), &next);
        assert!(diffs.get(AttributeGroup::NetworkInterfaces).changed);
    }

    #[test]
    fn test_tags_are_in_place() {
        let mut next = vm();
        next.tags.insert("env".to_string(), "prod".to_string());
        let diffs = classify(&vm(), &next);
        let tags = diffs.get(AttributeGroup::Tags);
        assert!(tags.changed);
        assert_eq!(tags.class, MutationClass::InPlace);
        assert!(!diffs.requires_offline());
    }

    #[test]
    fn test_disk_growth_requires_offline_refresh() {
        let mut next = vm();
        if let Some(os) = next.os_disk.as_mut() {
            os.disk_size_gb = Some(20);
        }
        let diffs = classify(&vm(), &next);
        let os = diffs.get(AttributeGroup::OsDisk);
        assert_eq!(os.class, MutationClass::RequiresInstanceRefresh);
        assert!(diffs.requires_offline());
        assert!(!diffs.has_replacements());
    }

    #[test]
    fn test_disk_shrink_escalates_to_replacement() {
        let mut previous = vm();
        if let Some(os) = previous.os_disk.as_mut() {
            os.disk_size_gb = Some(20);
        }
        let diffs = classify(&previous, &vm());
        let os = diffs.get(AttributeGroup::OsDisk);
        assert_eq!(os.class, MutationClass::RequiresReplacement);
        assert_eq!(
            os.reason.as_deref(),
            Some("os disk shrinks from 20 GB to 10 GB")
        );
    }

    #[test]
    fn test_data_disk_shrink_matched_by_lun() {
        let mut next = vm();
        next.data_disks = vec![data_disk(1, 32), data_disk(0, 32)];
        let diffs = classify(&vm(), &next);
        let disks = diffs.get(AttributeGroup::DataDisks);
        assert_eq!(disks.class, MutationClass::RequiresReplacement);
        assert!(disks.reason.unwrap().contains("LUN 1"));
    }

    #[test]
    fn test_network_interface_change_is_refresh_not_offline() {
        let mut next = vm();
        next.network_interfaces.pop();
        let diffs = classify(&vm(), &next);
        assert_eq!(
            diffs.get(AttributeGroup::NetworkInterfaces).class,
            MutationClass::RequiresInstanceRefresh
        );
        assert!(!diffs.requires_offline());
    }

    #[test]
    fn test_name_change_requires_replacement() {
        let mut next = vm();
        next.name = "web-1".to_string();
        let diffs = classify(&vm(), &next);
        assert!(diffs.has_replacements());
        assert_eq!(diffs.summary().replacement, 1);
    }

    #[test]
    fn test_kind_mismatch_is_replacement() {
        let previous = DeclaredConfiguration::new(ResourceKind::ScaleSet, "web-0", "westeurope");
        let diffs = classify(&previous, &vm());
        let name = diffs.get(AttributeGroup::Name);
        assert_eq!(name.class, MutationClass::RequiresReplacement);
        assert!(name.reason.unwrap().contains("ScaleSet"));
    }

    #[test]
    fn test_extensions_keyed_by_name() {
        let ext = |name: &str| Extension {
            name: name.to_string(),
            publisher: "Contoso".to_string(),
            extension_type: "Agent".to_string(),
            type_handler_version: "1.0".to_string(),
            auto_upgrade_minor_version: true,
            settings: None,
        };
        let mut previous = vm();
        previous.extensions = vec![ext("a"), ext("b")];
        let mut next = vm();
        next.extensions = vec![ext("b"), ext("a")];
        assert!(classify(&previous, &next).is_noop());

        next.extensions[0].name = "B".to_string();
        assert!(classify(&previous, &next).is_noop());

        next.extensions[0].type_handler_version = "2.0".to_string();
        let diffs = classify(&previous, &next);
        assert_eq!(
            diffs.get(AttributeGroup::Extensions).class,
            MutationClass::InPlace
        );
    }

    #[test]
    fn test_managed_disk_groups() {
        let mut previous = DeclaredConfiguration::new(ResourceKind::ManagedDisk, "data", "eu");
        previous.disk_size_gb = Some(10);
        previous.storage_account_type = Some(StorageAccountType::StandardLrs);
        let mut next = previous.clone();
        next.disk_size_gb = Some(20);
        next.storage_account_type = Some(StorageAccountType::PremiumLrs);

        let diffs = classify(&previous, &next);
        assert_eq!(diffs.summary().refresh, 2);
        assert!(diffs.requires_offline());
        assert_eq!(diffs.get(AttributeGroup::Size).class, MutationClass::NoOp);
    }
}
