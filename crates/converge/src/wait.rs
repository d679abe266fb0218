//! Bounded waiting on async provider operations.
//!
//! Polls with jittered exponential backoff until the operation reaches a
//! terminal status or the deadline passes. Nothing here runs in the
//! background; the caller's thread sleeps between polls.

use crate::error::{Error, Result};
use crate::provider::{OperationHandle, OperationStatus, Provider};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Backoff settings for [`wait_for_completion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Delay before the second poll
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Fraction of the delay added or removed at random (0.0 disables)
    pub jitter: f64,
    /// Retryable poll errors tolerated in a row before giving up
    pub max_transient_errors: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.2,
            max_transient_errors: 5,
        }
    }
}

impl WaitPolicy {
    /// Millisecond delays and no jitter, for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: 0.0,
            max_transient_errors: 3,
        }
    }

    /// Un-jittered delay after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay for `attempt` with up to `jitter` of it added or removed.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(base)
            .min(self.max_delay)
    }
}

/// Poll `handle` until it reaches a terminal status or `deadline` passes.
///
/// `Failed` and `Canceled` become [`Error::AsyncOperationFailed`]. Retryable
/// poll errors are tolerated up to `max_transient_errors` in a row; any other
/// poll error is returned as-is. A handle that completed synchronously
/// returns without polling.
pub fn wait_for_completion(
    provider: &dyn Provider,
    handle: &OperationHandle,
    deadline: Instant,
    policy: &WaitPolicy,
) -> Result<()> {
    if handle.is_complete() {
        return Ok(());
    }

    let started = Instant::now();
    let mut attempt = 0u32;
    let mut transient_errors = 0u32;

    loop {
        match provider.poll_operation(handle) {
            Ok(OperationStatus::Succeeded) => {
                log::debug!(
                    "{} finished after {:?}",
                    handle.operation,
                    started.elapsed()
                );
                return Ok(());
            }
            Ok(OperationStatus::Failed { message }) => {
                return Err(Error::AsyncOperationFailed {
                    operation: handle.operation.clone(),
                    status: "Failed".to_string(),
                    message,
                });
            }
            Ok(OperationStatus::Canceled) => {
                return Err(Error::AsyncOperationFailed {
                    operation: handle.operation.clone(),
                    status: "Canceled".to_string(),
                    message: "operation was canceled".to_string(),
                });
            }
            Ok(OperationStatus::InProgress) => transient_errors = 0,
            Err(e) if e.is_retryable() && transient_errors < policy.max_transient_errors => {
                transient_errors += 1;
                log::debug!(
                    "polling {} failed ({transient_errors}/{}): {e}",
                    handle.operation,
                    policy.max_transient_errors
                );
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                operation: handle.operation.clone(),
                waited: started.elapsed(),
            });
        }
        thread::sleep(policy.jittered_delay(attempt).min(deadline - now));
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CallKind, MockFailure, MockProvider};
    use crate::types::{DeclaredConfiguration, ObservedState, ResourceId, ResourceKind};

    fn mock(pending_polls: u32) -> (MockProvider, ResourceId) {
        let config = DeclaredConfiguration::new(ResourceKind::VirtualMachine, "web-0", "eu");
        let mock = MockProvider::new()
            .with_resource(ObservedState::new("/vms/web-0", config))
            .with_pending_polls(pending_polls);
        (mock, ResourceId::new("/vms/web-0"))
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_default_policy() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_transient_errors, 5);
    }

    #[test]
    fn test_delay_for_attempt_backs_off_and_caps() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = WaitPolicy::default();
        for _ in 0..50 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_millis(3200));
            assert!(delay <= Duration::from_millis(4800));
        }
        assert!(policy.jittered_delay(10) <= policy.max_delay);
    }

    #[test]
    fn test_completed_handle_does_not_poll() {
        let (mock, id) = mock(0);
        let handle = mock.start(&id).unwrap();
        wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate()).unwrap();
        assert!(!mock.call_kinds().contains(&CallKind::PollOperation));
    }

    #[test]
    fn test_polls_until_succeeded() {
        let (mock, id) = mock(3);
        let handle = mock.start(&id).unwrap();
        wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate()).unwrap();
        let polls = mock
            .call_kinds()
            .into_iter()
            .filter(|k| *k == CallKind::PollOperation)
            .count();
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_failed_operation_is_error() {
        let (mock, id) = mock(1);
        mock.fail_next(CallKind::Deallocate, MockFailure::AsyncFailed("quota".to_string()));
        let handle = mock.deallocate(&id).unwrap();
        let err = wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate())
            .unwrap_err();
        match err {
            Error::AsyncOperationFailed {
                status, message, ..
            } => {
                assert_eq!(status, "Failed");
                assert_eq!(message, "quota");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_canceled_operation_is_error() {
        let (mock, id) = mock(0);
        mock.fail_next(CallKind::Start, MockFailure::AsyncCanceled);
        let handle = mock.start(&id).unwrap();
        let err = wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate())
            .unwrap_err();
        assert!(err.to_string().contains("Canceled"));
    }

    #[test]
    fn test_deadline_yields_timeout() {
        let (mock, id) = mock(u32::MAX);
        let handle = mock.start(&id).unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let err =
            wait_for_completion(&mock, &handle, deadline, &WaitPolicy::immediate()).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_transient_poll_errors_are_tolerated() {
        let (mock, id) = mock(1);
        let handle = mock.start(&id).unwrap();
        for _ in 0..2 {
            mock.fail_next(
                CallKind::PollOperation,
                MockFailure::Transport {
                    message: "429".to_string(),
                    retryable: true,
                },
            );
        }
        wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate()).unwrap();
    }

    #[test]
    fn test_too_many_transient_errors_give_up() {
        let (mock, id) = mock(1);
        let handle = mock.start(&id).unwrap();
        for _ in 0..4 {
            mock.fail_next(
                CallKind::PollOperation,
                MockFailure::Transport {
                    message: "503".to_string(),
                    retryable: true,
                },
            );
        }
        let err = wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_non_retryable_poll_error_is_immediate() {
        let (mock, id) = mock(1);
        let handle = mock.start(&id).unwrap();
        mock.fail_next(
            CallKind::PollOperation,
            MockFailure::Transport {
                message: "400".to_string(),
                retryable: false,
            },
        );
        let err = wait_for_completion(&mock, &handle, far_deadline(), &WaitPolicy::immediate())
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
