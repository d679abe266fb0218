//! Mutation planner - turns a diff and a power state into ordered steps

use crate::diff::DiffSet;
use crate::error::{Error, Result};
use crate::group::{AttributeGroup, GroupCategory, MutationClass};
use crate::power::{PowerState, decide};
use crate::types::{DeclaredConfiguration, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Changed groups sent together in one update call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdatePayload {
    pub groups: BTreeMap<AttributeGroup, Value>,
}

impl UpdatePayload {
    /// Collect the `declared` values of `groups`
    pub fn from_groups(
        declared: &DeclaredConfiguration,
        groups: impl IntoIterator<Item = AttributeGroup>,
    ) -> Result<Self> {
        let mut payload = Self::default();
        for group in groups {
            payload.groups.insert(group, declared.group_value(group)?);
        }
        Ok(payload)
    }

    /// Apply the payload on top of `base`, producing the "after" configuration
    pub fn apply_to(&self, base: &DeclaredConfiguration) -> Result<DeclaredConfiguration> {
        let mut next = base.clone();
        for (group, value) in &self.groups {
            next = next.with_group_value(*group, value.clone())?;
        }
        Ok(next)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Step discriminant, used for ordering and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    Shutdown,
    Deallocate,
    Update,
    Start,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shutdown => "shut down",
            Self::Deallocate => "deallocate",
            Self::Update => "update",
            Self::Start => "start",
        })
    }
}

/// One remote operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MutationStep {
    ShutdownInstance {
        instance: ResourceId,
    },
    DeallocateInstance {
        instance: ResourceId,
    },
    UpdateResource {
        resource: ResourceId,
        payload: UpdatePayload,
    },
    StartInstance {
        instance: ResourceId,
    },
}

impl MutationStep {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::ShutdownInstance { .. } => StepKind::Shutdown,
            Self::DeallocateInstance { .. } => StepKind::Deallocate,
            Self::UpdateResource { .. } => StepKind::Update,
            Self::StartInstance { .. } => StepKind::Start,
        }
    }

    /// Resource the step is sent to
    pub fn target(&self) -> &ResourceId {
        match self {
            Self::ShutdownInstance { instance }
            | Self::DeallocateInstance { instance }
            | Self::StartInstance { instance } => instance,
            Self::UpdateResource { resource, .. } => resource,
        }
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        match self {
            Self::UpdateResource { resource, payload } => {
                let groups: Vec<&str> = payload.groups.keys().map(AttributeGroup::as_str).collect();
                format!("update {} ({})", resource.name(), groups.join(", "))
            }
            other => format!("{} {}", other.kind(), other.target().name()),
        }
    }
}

/// Facts about a plan the caller should know but that need no step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum PlanNote {
    /// Power state was unreadable and the instance is handled as running
    AssumedRunning { instance: ResourceId },
    /// Instance was already mid-transition; no power step was added
    AlreadyTransitioning {
        instance: ResourceId,
        state: PowerState,
    },
    /// Instance will not be restarted because the caller asked to leave it off
    LeftOffline { instance: ResourceId },
    /// Groups that only take effect once instances are refreshed or upgraded
    InstanceRefreshPending { groups: Vec<AttributeGroup> },
}

impl fmt::Display for PlanNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssumedRunning { instance } => write!(
                f,
                "power state of {} is unknown; treating it as running",
                instance.name()
            ),
            Self::AlreadyTransitioning { instance, state } => write!(
                f,
                "{} is already {}; no power step planned",
                instance.name(),
                state
            ),
            Self::LeftOffline { instance } => {
                write!(f, "{} will be left deallocated", instance.name())
            }
            Self::InstanceRefreshPending { groups } => {
                let names: Vec<&str> = groups.iter().map(AttributeGroup::as_str).collect();
                write!(
                    f,
                    "{} take effect after instances are refreshed",
                    names.join(", ")
                )
            }
        }
    }
}

/// Ordered steps for one reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub resource: ResourceId,
    pub steps: Vec<MutationStep>,
    pub notes: Vec<PlanNote>,
    /// Power state observed before planning, when it was consulted
    pub original_power: Option<PowerState>,
}

impl MutationPlan {
    pub fn empty(resource: ResourceId) -> Self {
        Self {
            resource,
            steps: Vec::new(),
            notes: Vec::new(),
            original_power: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(MutationStep::kind).collect()
    }

    /// blake3 digest of the plan's canonical JSON
    ///
    /// Two plans with the same fingerprint issue the same remote calls.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&(&self.resource, &self.steps))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Check ordering and cardinality before anything is sent.
    ///
    /// Each kind appears at most once and kinds appear in
    /// shutdown < deallocate < update < start order.
    pub fn verify(&self) -> Result<()> {
        let mut previous: Option<StepKind> = None;
        for step in &self.steps {
            let kind = step.kind();
            if let Some(prev) = previous
                && prev >= kind
            {
                return Err(Error::InvalidPlan(format!(
                    "step '{kind}' cannot follow '{prev}'"
                )));
            }
            previous = Some(kind);
        }
        let has = |kind: StepKind| self.steps.iter().any(|s| s.kind() == kind);
        if has(StepKind::Start) && !has(StepKind::Update) {
            return Err(Error::InvalidPlan(
                "start planned without an update".to_string(),
            ));
        }
        Ok(())
    }
}

/// Inputs the planner needs besides the diff and power state
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// Resource the update is sent to
    pub resource: &'a ResourceId,
    /// Desired configuration the payload is built from
    pub declared: &'a DeclaredConfiguration,
    /// Instance whose power gates disk mutations, if any
    pub power_target: Option<&'a ResourceId>,
    /// Do not restart the instance after the mutation
    pub leave_offline: bool,
}

/// Build the ordered plan for one pass. Pure.
///
/// Any group needing replacement fails the whole plan; this crate never
/// destroys resources itself.
pub fn plan(diffs: &DiffSet, power: PowerState, ctx: &PlanContext<'_>) -> Result<MutationPlan> {
    let replacements: Vec<String> = diffs
        .changed()
        .filter(|d| d.class == MutationClass::RequiresReplacement)
        .map(|d| match &d.reason {
            Some(reason) => format!("{} ({reason})", d.group),
            None => d.group.to_string(),
        })
        .collect();
    if !replacements.is_empty() {
        return Err(Error::RequiresReplacement {
            resource: ctx.resource.to_string(),
            reasons: replacements,
        });
    }

    let mut plan = MutationPlan::empty(ctx.resource.clone());
    if diffs.is_noop() {
        return Ok(plan);
    }

    let payload = UpdatePayload::from_groups(ctx.declared, diffs.changed().map(|d| d.group))?;

    let offline_target = ctx.power_target.filter(|_| diffs.requires_offline());
    let mut restart = None;

    if let Some(instance) = offline_target {
        let decision = decide(power);
        plan.original_power = Some(power);

        if decision.assumed_running {
            log::warn!(
                "power state of {instance} is unknown; assuming running and shutting it down"
            );
            plan.notes.push(PlanNote::AssumedRunning {
                instance: instance.clone(),
            });
        }
        if matches!(power, PowerState::Stopping | PowerState::Deallocating) {
            plan.notes.push(PlanNote::AlreadyTransitioning {
                instance: instance.clone(),
                state: power,
            });
        }
        if decision.shutdown {
            plan.steps.push(MutationStep::ShutdownInstance {
                instance: instance.clone(),
            });
        }
        if decision.deallocate {
            plan.steps.push(MutationStep::DeallocateInstance {
                instance: instance.clone(),
            });
        }
        if decision.restart {
            restart = Some(instance.clone());
        }
    }

    plan.steps.push(MutationStep::UpdateResource {
        resource: ctx.resource.clone(),
        payload,
    });

    if let Some(instance) = restart {
        if ctx.leave_offline {
            plan.notes.push(PlanNote::LeftOffline { instance });
        } else {
            plan.steps.push(MutationStep::StartInstance { instance });
        }
    }

    let pending: Vec<AttributeGroup> = diffs
        .changed()
        .filter(|d| d.class == MutationClass::RequiresInstanceRefresh)
        .filter(|d| d.group.category() != GroupCategory::Disk || offline_target.is_none())
        .map(|d| d.group)
        .collect();
    if !pending.is_empty() {
        plan.notes.push(PlanNote::InstanceRefreshPending { groups: pending });
    }

    Ok(plan)
}
