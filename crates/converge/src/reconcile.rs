//! One reconciliation pass over a single resource instance.
//!
//! Order is fixed: validate, lock, fetch, classify, read power (only when a
//! disk mutation needs the instance offline), plan, confirm, execute. No
//! remote call happens before validation succeeds.
//!
//! A managed disk is gated by the instance it is attached to, so its pass
//! also holds that instance's lock. Locks are always taken in key order.

use crate::context::{ConfirmCallback, ProgressCallback, ReconciliationContext};
use crate::diff::{DiffSet, classify};
use crate::error::{Error, Result};
use crate::executor::{ExecutionReport, execute};
use crate::planner::{MutationPlan, PlanContext, plan};
use crate::power::PowerState;
use crate::types::{DeclaredConfiguration, ObservedState, ResourceId};
use crate::validate::validate;
use std::time::Instant;

/// Result of a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The resource does not exist; nothing was planned
    Absent,
    /// Observed state already matches the declaration
    Unchanged,
    /// Dry run: the plan that would have been executed
    Planned(MutationPlan),
    /// The confirmation callback refused the plan
    Declined(MutationPlan),
    Applied {
        plan: MutationPlan,
        report: ExecutionReport,
    },
}

impl PassOutcome {
    pub fn plan(&self) -> Option<&MutationPlan> {
        match self {
            Self::Planned(plan) | Self::Declined(plan) | Self::Applied { plan, .. } => Some(plan),
            Self::Absent | Self::Unchanged => None,
        }
    }
}

/// Observed state with the plan computed from it, before anything executes.
#[derive(Debug, Clone)]
pub struct PlannedPass {
    pub observed: ObservedState,
    pub diffs: DiffSet,
    pub plan: MutationPlan,
}

/// Reject `declared` with every violated invariant, if any.
pub fn check_invariants(declared: &DeclaredConfiguration) -> Result<()> {
    let violations = validate(declared);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

/// Fetch, classify and plan without mutating anything.
///
/// The caller must hold the locks on `id` and on its power target if it
/// intends to execute the plan.
pub fn prepare(
    ctx: &ReconciliationContext<'_>,
    id: &ResourceId,
    declared: &DeclaredConfiguration,
) -> Result<Option<PlannedPass>> {
    check_invariants(declared)?;

    log::debug!("fetching state of {id}");
    let observed = match ctx.provider.fetch_state(id) {
        Ok(observed) => observed,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    let diffs = classify(&observed.configuration, declared);
    log::debug!(
        "{id}: {} of {} attribute groups changed",
        diffs.changed().count(),
        diffs.len()
    );

    let power_target = observed.power_target();
    let power = match power_target {
        Some(target) if !diffs.has_replacements() && diffs.requires_offline() => {
            let power = ctx.provider.power_state(target)?;
            log::debug!("{target} is {power}");
            power
        }
        _ => PowerState::Unknown,
    };

    let plan = plan(
        &diffs,
        power,
        &PlanContext {
            resource: id,
            declared,
            power_target,
            leave_offline: ctx.options.leave_offline,
        },
    )?;

    Ok(Some(PlannedPass {
        observed,
        diffs,
        plan,
    }))
}

/// Run one pass for `id`, converging it to `declared`.
///
/// Holds the lock on `id`, and on the instance gating it, from planning
/// until execution ends. The whole pass, lock wait included, is bounded by
/// `ctx.options.timeout`.
pub fn reconcile(
    ctx: &ReconciliationContext<'_>,
    id: &ResourceId,
    declared: &DeclaredConfiguration,
    progress: &mut dyn ProgressCallback,
    confirm: &mut dyn ConfirmCallback,
) -> Result<PassOutcome> {
    check_invariants(declared)?;

    let deadline = Instant::now() + ctx.options.timeout;
    let mut held = vec![ctx.locks.acquire(id, Some(deadline))?];

    let pass = loop {
        let Some(pass) = prepare(ctx, id, declared)? else {
            log::debug!("{id} does not exist");
            return Ok(PassOutcome::Absent);
        };
        let Some(target) = pass.observed.power_target().cloned() else {
            break pass;
        };
        if held.iter().any(|lock| lock.covers(&target)) {
            break pass;
        }
        if Instant::now() >= deadline {
            return Err(Error::LockTimeout {
                resource: target.to_string(),
            });
        }
        // Re-plan once both locks are held; the attachment may have moved.
        log::debug!("{id} is gated by {target}, locking both");
        held.clear();
        held = ctx.locks.acquire_all(&[id, &target], Some(deadline))?;
    };
    let plan = pass.plan;

    if plan.is_empty() {
        return Ok(PassOutcome::Unchanged);
    }

    if let Some(expected) = &ctx.options.expected_fingerprint {
        let actual = plan.fingerprint()?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::InvalidPlan(format!(
                "plan fingerprint {actual} does not match expected {expected}"
            )));
        }
    }

    progress.on_plan(&plan);

    if ctx.options.dry_run {
        return Ok(PassOutcome::Planned(plan));
    }
    if !confirm.confirm(&plan)? {
        return Ok(PassOutcome::Declined(plan));
    }

    let report = execute(&plan, ctx, deadline, progress)?;
    log::debug!(
        "{id}: {} steps completed in {:?}",
        report.completed.len(),
        report.elapsed
    );
    Ok(PassOutcome::Applied { plan, report })
}
