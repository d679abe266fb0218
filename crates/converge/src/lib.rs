//! # Converge
//!
//! Mutation planning and safe sequencing for cloud compute resources:
//! virtual machines, scale sets and managed disks.
//!
//! A reconciliation pass compares a resource's observed configuration with
//! a declared one, works out which remote operations are needed, and issues
//! them in an order the provider accepts.
//!
//! ## Core Concepts
//!
//! - **DeclaredConfiguration**: typed desired state, one field per attribute group
//! - **DiffSet**: every attribute group of the resource kind with its mutation class
//! - **PowerState**: parsed from instance-view status codes
//! - **MutationPlan**: ordered shutdown / deallocate / update / start steps
//! - **Provider**: the remote API, with [`MockProvider`] for tests
//!
//! ## Example
//!
//! ```
//! use converge::{
//!     AutoConfirm, DeclaredConfiguration, LockRegistry, MockProvider, NoProgress,
//!     ObservedState, PassOutcome, ReconciliationContext, ResourceKind, reconcile,
//! };
//!
//! let current = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "westeurope");
//! let provider = MockProvider::new().with_resource(ObservedState::new("/vms/web-0", current.clone()));
//! let locks = LockRegistry::new();
//! let ctx = ReconciliationContext::new(&provider, &locks);
//!
//! let mut declared = current;
//! declared.tags.insert("env".into(), "prod".into());
//!
//! let outcome = reconcile(&ctx, &"/vms/web-0".into(), &declared, &mut NoProgress, &mut AutoConfirm)?;
//! assert!(matches!(outcome, PassOutcome::Applied { .. }));
//! # Ok::<(), converge::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: remote state reads and mutating operations
//! - [`ProgressCallback`]: receives per-step progress
//! - [`ConfirmCallback`]: approves a plan before execution

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod group;
pub mod lock;
pub mod planner;
pub mod power;
pub mod provider;
pub mod reconcile;
pub mod types;
pub mod validate;
pub mod wait;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback, ReconcileOptions,
    ReconciliationContext,
};
pub use diff::{AttributeDiff, DiffSet, DiffSummary, classify};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{ExecutionReport, execute};
pub use group::{AttributeGroup, GroupCategory, MutationClass};
pub use lock::{LockRegistry, ResourceLock};
pub use planner::{
    MutationPlan, MutationStep, PlanContext, PlanNote, StepKind, UpdatePayload, plan,
};
pub use power::{PowerDecision, PowerState, decide};
pub use provider::{
    CallKind, MockFailure, MockProvider, OperationHandle, OperationStatus, Provider, RecordedCall,
};
pub use reconcile::{PassOutcome, PlannedPass, check_invariants, prepare, reconcile};
pub use types::{
    AutomaticOsUpgradePolicy, CachingMode, DataDisk, DeclaredConfiguration, EvictionPolicy,
    Extension, InstanceStatus, NetworkInterface, ObservedState, OsDisk, Priority, ResourceId,
    ResourceKind, RollingUpgradePolicy, StorageAccountType, UpgradeMode,
};
pub use validate::{InvariantViolation, MAX_DISK_SIZE_GB, Rule, validate};
pub use wait::{WaitPolicy, wait_for_completion};
