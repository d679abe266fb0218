//! Pass context and caller callbacks
//!
//! These traits let the reconciliation pass report progress and ask for
//! confirmation without depending on a terminal UI.

use crate::error::{Error, Result};
use crate::lock::LockRegistry;
use crate::planner::{MutationPlan, MutationStep};
use crate::provider::Provider;
use crate::wait::WaitPolicy;
use std::time::Duration;

/// Options for one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Upper bound for the whole pass, lock wait included
    pub timeout: Duration,
    /// Backoff used while waiting on async operations
    pub wait: WaitPolicy,
    /// Do not restart an instance that had to be powered off
    pub leave_offline: bool,
    /// Plan only; never issue a mutating call
    pub dry_run: bool,
    /// Refuse to execute unless the fresh plan has this fingerprint
    pub expected_fingerprint: Option<String>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            wait: WaitPolicy::default(),
            leave_offline: false,
            dry_run: false,
            expected_fingerprint: None,
        }
    }
}

/// Everything a pass needs; there is no global state.
pub struct ReconciliationContext<'a> {
    pub provider: &'a dyn Provider,
    pub locks: &'a LockRegistry,
    pub options: ReconcileOptions,
}

impl<'a> ReconciliationContext<'a> {
    pub fn new(provider: &'a dyn Provider, locks: &'a LockRegistry) -> Self {
        Self {
            provider,
            locks,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }
}

/// Progress callback for plan execution
///
/// Implement this trait to receive progress updates during a pass.
pub trait ProgressCallback: Send {
    /// Called once the plan is known, before confirmation
    fn on_plan(&mut self, plan: &MutationPlan);

    /// Called before a step's remote call is issued
    fn on_step_start(&mut self, index: usize, total: usize, step: &MutationStep);

    /// Called after a step's operation reached a terminal success
    fn on_step_complete(&mut self, index: usize, step: &MutationStep);

    /// Called when a step fails; execution halts afterwards
    fn on_step_failed(&mut self, index: usize, step: &MutationStep, error: &Error);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask whether `plan` may be executed
    fn confirm(&mut self, plan: &MutationPlan) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan(&mut self, _plan: &MutationPlan) {}
    fn on_step_start(&mut self, _index: usize, _total: usize, _step: &MutationStep) {}
    fn on_step_complete(&mut self, _index: usize, _step: &MutationStep) {}
    fn on_step_failed(&mut self, _index: usize, _step: &MutationStep, _error: &Error) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &MutationPlan) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &MutationPlan) -> Result<bool> {
        Ok(false)
    }
}
