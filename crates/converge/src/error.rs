//! Error types for reconciliation passes.
//!
//! Errors are categorized so callers can tell "fix your configuration"
//! apart from "the provider refused" and "try the pass again later".
//! Every variant carries enough context to act on without re-reading logs.

use crate::planner::StepKind;
use crate::validate::InvariantViolation;
use std::time::Duration;
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Declared configuration breaks a cross-field rule
    Validation,
    /// Resource or one of its dependencies does not exist
    NotFound,
    /// Provider rejected the request because of the resource's current state
    Conflict,
    /// A started operation reached a failed terminal state
    AsyncFailure,
    /// A deadline elapsed
    Timeout,
    /// The change cannot be applied without destroying the resource
    Replacement,
    /// Network or provider-side transport fault
    Transport,
    /// Internal inconsistency (malformed plan, serialization)
    Internal,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid configuration",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Rejected by provider",
            Self::AsyncFailure => "Remote operation failed",
            Self::Timeout => "Timed out",
            Self::Replacement => "Replacement required",
            Self::Transport => "Provider unreachable",
            Self::Internal => "Internal error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Fix every listed rule in the declared configuration and run again",
            Self::NotFound => "Create the resource first, or check the resource id",
            Self::Conflict => "Read the provider message above; the resource state blocks this change",
            Self::AsyncFailure => "Inspect the resource; the next pass re-reads state and replans",
            Self::Timeout => "Raise the timeout or run again; completed steps stay applied",
            Self::Replacement => "Destroy and recreate the resource to apply this change",
            Self::Transport => "Check connectivity and credentials, then run again",
            Self::Internal => "Report this as a bug",
        }
    }
}

/// Errors that can occur while planning or executing a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more invariants are violated; every violation is listed
    #[error("{}", describe_violations(.0))]
    Validation(Vec<InvariantViolation>),

    /// Resource or dependency is absent
    #[error("resource not found: {resource}")]
    NotFound {
        /// Identifier that could not be found
        resource: String,
    },

    /// Provider rejected the request; the message is the provider's own
    #[error("{message}")]
    Conflict {
        /// Provider message, unmodified
        message: String,
    },

    /// Async operation finished in a failed or canceled state
    #[error("{operation} finished with status {status}: {message}")]
    AsyncOperationFailed {
        /// Operation description (e.g. "deallocate web-0")
        operation: String,
        /// Terminal status reported by the provider
        status: String,
        /// Provider error message
        message: String,
    },

    /// Deadline elapsed while waiting
    #[error("timed out after {}s waiting for {operation}", .waited.as_secs())]
    Timeout {
        /// What was being waited on
        operation: String,
        /// How long the wait lasted
        waited: Duration,
    },

    /// Change requires destroy-and-recreate
    #[error("{resource} must be destroyed and recreated: {}", .reasons.join("; "))]
    RequiresReplacement {
        /// Resource that needs replacing
        resource: String,
        /// One entry per attribute group forcing replacement
        reasons: Vec<String>,
    },

    /// Transport-level failure talking to the provider
    #[error("transport error: {message}")]
    Transport {
        /// Failure description
        message: String,
        /// Whether the same request may succeed if repeated
        retryable: bool,
    },

    /// Could not acquire the per-resource lock before the deadline
    #[error("timed out waiting for the reconciliation lock on {resource}")]
    LockTimeout {
        /// Resource whose lock was contended
        resource: String,
    },

    /// A plan broke its ordering or cardinality rules
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A plan step failed; earlier steps remain applied
    #[error("step {} ({step}) failed: {source}", .index + 1)]
    StepFailed {
        /// Zero-based index of the failing step
        index: usize,
        /// Kind of the failing step
        step: StepKind,
        /// Instance that was powered off by this plan and not restarted
        offline_instance: Option<String>,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Innermost error, looking through `StepFailed` wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the error category, looking through `StepFailed`.
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::AsyncOperationFailed { .. } => ErrorCategory::AsyncFailure,
            Self::Timeout { .. } | Self::LockTimeout { .. } => ErrorCategory::Timeout,
            Self::RequiresReplacement { .. } => ErrorCategory::Replacement,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::InvalidPlan(_) | Self::Json(_) | Self::StepFailed { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether repeating the failed request may succeed.
    ///
    /// Only transport faults flagged retryable qualify; everything else
    /// needs a fresh pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::Transport {
                retryable: true,
                ..
            }
        )
    }

    /// Whether this error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Violations carried by a validation error.
    pub fn violations(&self) -> &[InvariantViolation] {
        match self.root() {
            Self::Validation(violations) => violations,
            _ => &[],
        }
    }
}

fn describe_violations(violations: &[InvariantViolation]) -> String {
    let mut out = format!(
        "declared configuration violates {} rule{}",
        violations.len(),
        if violations.len() == 1 { "" } else { "s" }
    );
    for violation in violations {
        out.push_str("\n  - ");
        out.push_str(&violation.to_string());
    }
    out
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
