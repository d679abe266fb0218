//! Mutation executor - runs a verified plan step by step

use crate::context::{ProgressCallback, ReconciliationContext};
use crate::error::{Error, Result};
use crate::planner::{MutationPlan, MutationStep, StepKind};
use crate::provider::OperationHandle;
use crate::wait::wait_for_completion;
use serde::Serialize;
use std::time::{Duration, Instant};

/// What an execution accomplished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Steps that reached a terminal success, in order
    pub completed: Vec<StepKind>,
    pub elapsed: Duration,
}

/// Run `plan` in order, waiting for each operation before the next.
///
/// The first failure halts execution. Steps already applied are not rolled
/// back; if the failure leaves an instance powered off, the returned
/// [`Error::StepFailed`] names it.
pub fn execute(
    plan: &MutationPlan,
    ctx: &ReconciliationContext<'_>,
    deadline: Instant,
    progress: &mut dyn ProgressCallback,
) -> Result<ExecutionReport> {
    plan.verify()?;

    let started = Instant::now();
    let total = plan.steps.len();
    let mut completed = Vec::with_capacity(total);

    for (index, step) in plan.steps.iter().enumerate() {
        progress.on_step_start(index, total, step);

        let result = if Instant::now() >= deadline {
            Err(Error::Timeout {
                operation: step.describe(),
                waited: started.elapsed(),
            })
        } else {
            run_step(step, ctx, deadline)
        };

        if let Err(source) = result {
            progress.on_step_failed(index, step, &source);
            let offline_instance = offline_after(plan, &completed);
            if let Some(instance) = &offline_instance {
                log::warn!("{instance} was powered off by this plan and has not been restarted");
            }
            return Err(Error::StepFailed {
                index,
                step: step.kind(),
                offline_instance,
                source: Box::new(source),
            });
        }

        completed.push(step.kind());
        progress.on_step_complete(index, step);
    }

    Ok(ExecutionReport {
        completed,
        elapsed: started.elapsed(),
    })
}

fn run_step(step: &MutationStep, ctx: &ReconciliationContext<'_>, deadline: Instant) -> Result<()> {
    log::info!("{}", step.describe());
    let provider = ctx.provider;
    let handle: OperationHandle = match step {
        MutationStep::ShutdownInstance { instance } => provider.power_off(instance)?,
        MutationStep::DeallocateInstance { instance } => provider.deallocate(instance)?,
        MutationStep::UpdateResource { resource, payload } => {
            provider.send_update(resource, payload)?
        }
        MutationStep::StartInstance { instance } => provider.start(instance)?,
    };
    wait_for_completion(provider, &handle, deadline, &ctx.options.wait)
}

/// Instance left powered off when execution stops after `completed`.
fn offline_after(plan: &MutationPlan, completed: &[StepKind]) -> Option<String> {
    let powered_off = completed
        .iter()
        .any(|k| matches!(k, StepKind::Shutdown | StepKind::Deallocate));
    if !powered_off || completed.contains(&StepKind::Start) {
        return None;
    }
    plan.steps.iter().find_map(|step| match step {
        MutationStep::ShutdownInstance { instance }
        | MutationStep::DeallocateInstance { instance } => Some(instance.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::lock::LockRegistry;
    use crate::planner::UpdatePayload;
    use crate::provider::{CallKind, MockFailure, MockProvider};
    use crate::types::{DeclaredConfiguration, ObservedState, ResourceId, ResourceKind};
    use crate::wait::WaitPolicy;

    struct Recorder(Vec<String>);

    impl ProgressCallback for Recorder {
        fn on_plan(&mut self, _plan: &MutationPlan) {}
        fn on_step_start(&mut self, index: usize, total: usize, _step: &MutationStep) {
            self.0.push(format!("start {}/{total}", index + 1));
        }
        fn on_step_complete(&mut self, index: usize, _step: &MutationStep) {
            self.0.push(format!("done {}", index + 1));
        }
        fn on_step_failed(&mut self, index: usize, _step: &MutationStep, _error: &Error) {
            self.0.push(format!("failed {}", index + 1));
        }
    }

    fn setup() -> (MockProvider, ResourceId) {
        let config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "eu");
        let mock = MockProvider::new().with_resource(ObservedState::new("/vms/web-0", config));
        (mock, ResourceId::new("/vms/web-0"))
    }

    fn full_plan(id: &ResourceId) -> MutationPlan {
        let mut plan = MutationPlan::empty(id.clone());
        plan.steps = vec![
            MutationStep::ShutdownInstance {
                instance: id.clone(),
            },
            MutationStep::DeallocateInstance {
                instance: id.clone(),
            },
            MutationStep::UpdateResource {
                resource: id.clone(),
                payload: UpdatePayload::default(),
            },
            MutationStep::StartInstance {
                instance: id.clone(),
            },
        ];
        plan
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_executes_steps_in_order() {
        let (mock, id) = setup();
        let locks = LockRegistry::new();
        let mut ctx = ReconciliationContext::new(&mock, &locks);
        ctx.options.wait = WaitPolicy::immediate();
        let mut progress = Recorder(Vec::new());

        let report = execute(&full_plan(&id), &ctx, deadline(), &mut progress).unwrap();

        assert_eq!(report.completed.len(), 4);
        let kinds: Vec<CallKind> = mock.mutating_calls().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CallKind::PowerOff,
                CallKind::Deallocate,
                CallKind::SendUpdate,
                CallKind::Start
            ]
        );
        assert_eq!(progress.0.first().map(String::as_str), Some("start 1/4"));
        assert_eq!(progress.0.last().map(String::as_str), Some("done 4"));
    }

    #[test]
    fn test_failure_halts_and_reports_offline_instance() {
        let (mock, id) = setup();
        let locks = LockRegistry::new();
        let ctx = ReconciliationContext::new(&mock, &locks);
        mock.fail_next(
            CallKind::SendUpdate,
            MockFailure::Conflict("Operation not allowed while disk is attached".to_string()),
        );

        let err = execute(&full_plan(&id), &ctx, deadline(), &mut NoProgress).unwrap_err();

        match &err {
            Error::StepFailed {
                index,
                step,
                offline_instance,
                source,
            } => {
                assert_eq!(*index, 2);
                assert_eq!(*step, StepKind::Update);
                assert_eq!(offline_instance.as_deref(), Some("/vms/web-0"));
                assert_eq!(
                    source.to_string(),
                    "Operation not allowed while disk is attached"
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!mock.call_kinds().contains(&CallKind::Start));
    }

    #[test]
    fn test_first_step_failure_has_no_offline_instance() {
        let (mock, id) = setup();
        let locks = LockRegistry::new();
        let ctx = ReconciliationContext::new(&mock, &locks);
        mock.fail_next(CallKind::PowerOff, MockFailure::Conflict("busy".to_string()));

        let err = execute(&full_plan(&id), &ctx, deadline(), &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::StepFailed {
                index: 0,
                offline_instance: None,
                ..
            }
        ));
        assert_eq!(mock.mutating_calls().len(), 1);
    }

    #[test]
    fn test_invalid_plan_issues_no_calls() {
        let (mock, id) = setup();
        let locks = LockRegistry::new();
        let ctx = ReconciliationContext::new(&mock, &locks);
        let mut plan = full_plan(&id);
        plan.steps.reverse();

        let err = execute(&plan, &ctx, deadline(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(_)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_expired_deadline_fails_first_step() {
        let (mock, id) = setup();
        let locks = LockRegistry::new();
        let ctx = ReconciliationContext::new(&mock, &locks);

        let err = execute(&full_plan(&id), &ctx, Instant::now(), &mut NoProgress).unwrap_err();
        assert!(matches!(err.root(), Error::Timeout { .. }));
        assert!(mock.calls().is_empty());
    }
}
