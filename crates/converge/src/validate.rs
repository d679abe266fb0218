//! Cross-field invariants checked before any remote call.
//!
//! Every rule runs on every configuration and all violations are returned
//! together, so a user can fix everything in one edit.

use crate::group::AttributeGroup;
use crate::types::{
    DeclaredConfiguration, Priority, ResourceKind, RollingUpgradePolicy, UpgradeMode,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Largest managed disk the provider accepts, in GB.
pub const MAX_DISK_SIZE_GB: u32 = 32_767;

/// Identifies one invariant rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    SpotPriceRequiresSpotPriority,
    SpotRequiresEvictionPolicy,
    EvictionPolicyRequiresSpot,
    MaxBidPriceRange,
    RollingPolicyRequiresRollingMode,
    RollingModeRequiresHealthSignal,
    AutomaticOsUpgradeRequiresAutomaticMode,
    UniqueDataDiskLuns,
    UniqueExtensionNames,
    DiskSizeBounds,
    ScaleSetOnlyGroups,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpotPriceRequiresSpotPriority => "spot_price_requires_spot_priority",
            Self::SpotRequiresEvictionPolicy => "spot_requires_eviction_policy",
            Self::EvictionPolicyRequiresSpot => "eviction_policy_requires_spot",
            Self::MaxBidPriceRange => "max_bid_price_range",
            Self::RollingPolicyRequiresRollingMode => "rolling_policy_requires_rolling_mode",
            Self::RollingModeRequiresHealthSignal => "rolling_mode_requires_health_signal",
            Self::AutomaticOsUpgradeRequiresAutomaticMode => {
                "automatic_os_upgrade_requires_automatic_mode"
            }
            Self::UniqueDataDiskLuns => "unique_data_disk_luns",
            Self::UniqueExtensionNames => "unique_extension_names",
            Self::DiskSizeBounds => "disk_size_bounds",
            Self::ScaleSetOnlyGroups => "scale_set_only_groups",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broken rule, with the groups it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub rule: Rule,
    pub groups: Vec<AttributeGroup>,
    pub message: String,
}

impl InvariantViolation {
    pub fn new(rule: Rule, groups: Vec<AttributeGroup>, message: impl Into<String>) -> Self {
        Self {
            rule,
            groups,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

type Check = fn(&DeclaredConfiguration, &mut Vec<InvariantViolation>);

/// Rules in evaluation order.
const CHECKS: &[Check] = &[
    check_spot_price,
    check_spot_eviction,
    check_bid_price_range,
    check_rolling_policy,
    check_rolling_health,
    check_automatic_os_upgrade,
    check_unique_luns,
    check_unique_extensions,
    check_disk_sizes,
    check_scale_set_only,
];

/// Run every rule against `next`.
///
/// Pure; an empty result means the configuration may be planned.
pub fn validate(next: &DeclaredConfiguration) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for check in CHECKS {
        check(next, &mut violations);
    }
    violations
}

fn check_spot_price(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    if config.max_bid_price.is_some() && config.effective_priority() != Priority::Spot {
        out.push(InvariantViolation::new(
            Rule::SpotPriceRequiresSpotPriority,
            vec![AttributeGroup::MaxBidPrice, AttributeGroup::Priority],
            format!(
                "max_bid_price can only be set when priority is Spot (priority is {})",
                config.effective_priority()
            ),
        ));
    }
}

fn check_spot_eviction(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    match (config.effective_priority(), config.eviction_policy) {
        (Priority::Spot, None) => out.push(InvariantViolation::new(
            Rule::SpotRequiresEvictionPolicy,
            vec![AttributeGroup::Priority, AttributeGroup::EvictionPolicy],
            "eviction_policy is required when priority is Spot",
        )),
        (Priority::Regular, Some(policy)) => out.push(InvariantViolation::new(
            Rule::EvictionPolicyRequiresSpot,
            vec![AttributeGroup::EvictionPolicy, AttributeGroup::Priority],
            format!("eviction_policy {policy} can only be set when priority is Spot"),
        )),
        (Priority::Spot, Some(_)) | (Priority::Regular, None) => {}
    }
}

fn check_bid_price_range(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    if let Some(price) = config.max_bid_price
        && !((price - -1.0).abs() < f64::EPSILON || price > 0.0)
    {
        out.push(InvariantViolation::new(
            Rule::MaxBidPriceRange,
            vec![AttributeGroup::MaxBidPrice],
            format!("max_bid_price must be -1 or greater than 0 (got {price})"),
        ));
    }
}

fn check_rolling_policy(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    let mode = config.effective_upgrade_mode();
    if mode == UpgradeMode::Rolling {
        return;
    }
    if let Some(policy) = &config.rolling_upgrade_policy
        && *policy != RollingUpgradePolicy::default()
    {
        out.push(InvariantViolation::new(
            Rule::RollingPolicyRequiresRollingMode,
            vec![
                AttributeGroup::RollingUpgradePolicy,
                AttributeGroup::UpgradeMode,
            ],
            format!(
                "rolling_upgrade_policy must be absent or left at its defaults when upgrade_mode is {mode}"
            ),
        ));
    }
}

fn check_rolling_health(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    if config.effective_upgrade_mode() == UpgradeMode::Rolling
        && config.health_probe_id.is_none()
        && !config.has_health_extension()
    {
        out.push(InvariantViolation::new(
            Rule::RollingModeRequiresHealthSignal,
            vec![
                AttributeGroup::UpgradeMode,
                AttributeGroup::HealthProbe,
                AttributeGroup::Extensions,
            ],
            "upgrade_mode Rolling requires a health_probe_id or an application health extension",
        ));
    }
}

fn check_automatic_os_upgrade(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    let mode = config.effective_upgrade_mode();
    if config.automatic_os_upgrade_policy.is_some() && mode != UpgradeMode::Automatic {
        out.push(InvariantViolation::new(
            Rule::AutomaticOsUpgradeRequiresAutomaticMode,
            vec![
                AttributeGroup::AutomaticOsUpgradePolicy,
                AttributeGroup::UpgradeMode,
            ],
            format!(
                "automatic_os_upgrade_policy can only be set when upgrade_mode is Automatic (upgrade_mode is {mode})"
            ),
        ));
    }
}

fn check_unique_luns(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for disk in &config.data_disks {
        if !seen.insert(disk.lun) && reported.insert(disk.lun) {
            out.push(InvariantViolation::new(
                Rule::UniqueDataDiskLuns,
                vec![AttributeGroup::DataDisks],
                format!("LUN {} is used by more than one data disk", disk.lun),
            ));
        }
    }
}

fn check_unique_extensions(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for ext in &config.extensions {
        let key = ext.key();
        if !seen.insert(key.clone()) && reported.insert(key) {
            out.push(InvariantViolation::new(
                Rule::UniqueExtensionNames,
                vec![AttributeGroup::Extensions],
                format!("extension '{}' is declared more than once", ext.name),
            ));
        }
    }
}

fn check_disk_sizes(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    let mut sizes: Vec<(AttributeGroup, String, u32)> = Vec::new();
    if let Some(size) = config.os_disk.as_ref().and_then(|d| d.disk_size_gb) {
        sizes.push((AttributeGroup::OsDisk, "os disk".to_string(), size));
    }
    for disk in &config.data_disks {
        sizes.push((
            AttributeGroup::DataDisks,
            format!("data disk at LUN {}", disk.lun),
            disk.disk_size_gb,
        ));
    }
    if let Some(size) = config.disk_size_gb {
        sizes.push((AttributeGroup::DiskSize, "disk".to_string(), size));
    }

    for (group, label, size) in sizes {
        if size == 0 || size > MAX_DISK_SIZE_GB {
            out.push(InvariantViolation::new(
                Rule::DiskSizeBounds,
                vec![group],
                format!("{label} size must be between 1 and {MAX_DISK_SIZE_GB} GB (got {size})"),
            ));
        }
    }
}

fn check_scale_set_only(config: &DeclaredConfiguration, out: &mut Vec<InvariantViolation>) {
    if config.kind == ResourceKind::ScaleSet {
        return;
    }
    let mut groups = Vec::new();
    if config.capacity.is_some() {
        groups.push(AttributeGroup::Capacity);
    }
    if config.upgrade_mode.is_some() {
        groups.push(AttributeGroup::UpgradeMode);
    }
    if config.rolling_upgrade_policy.is_some() {
        groups.push(AttributeGroup::RollingUpgradePolicy);
    }
    if config.automatic_os_upgrade_policy.is_some() {
        groups.push(AttributeGroup::AutomaticOsUpgradePolicy);
    }
    if config.health_probe_id.is_some() {
        groups.push(AttributeGroup::HealthProbe);
    }
    if !groups.is_empty() {
        let names: Vec<&str> = groups.iter().map(AttributeGroup::as_str).collect();
        let message = format!(
            "{} can only be set on a ScaleSet (kind is {})",
            names.join(", "),
            config.kind
        );
        out.push(InvariantViolation::new(
            Rule::ScaleSetOnlyGroups,
            groups,
            message,
        ));
    }
}
