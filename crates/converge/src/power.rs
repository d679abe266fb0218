//! Power-state parsing and the pre-mutation decision table.
//!
//! Provider statuses share one channel between provisioning codes
//! (`ProvisioningState/succeeded`) and power codes (`PowerState/running`).
//! Only the most recent power code counts. Parsing never fails: anything
//! unrecognised is [`PowerState::Unknown`], which the decision table treats
//! like `Running`.

use crate::types::InstanceStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

const POWER_STATE_PREFIX: &str = "powerstate/";

/// Provider-reported power status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    Unknown,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
}

impl PowerState {
    /// Decode the `<value>` part of a `PowerState/<value>` code.
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "deallocating" => Self::Deallocating,
            "deallocated" => Self::Deallocated,
            _ => Self::Unknown,
        }
    }

    /// Authoritative power state among `statuses`.
    ///
    /// The latest timestamped power code wins; codes without a timestamp rank
    /// below timestamped ones, and ties go to the later list entry.
    pub fn from_statuses(statuses: &[InstanceStatus]) -> Self {
        statuses
            .iter()
            .enumerate()
            .filter_map(|(index, status)| {
                power_value(&status.code).map(|value| (status.time, index, value))
            })
            .max_by_key(|(time, index, _)| (*time, *index))
            .map_or(Self::Unknown, |(_, _, value)| Self::from_value(value))
    }

    /// Whether the instance is fully off and safe for disk mutation.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Deallocated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deallocating => "deallocating",
            Self::Deallocated => "deallocated",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn power_value(code: &str) -> Option<&str> {
    let prefix = code.get(..POWER_STATE_PREFIX.len())?;
    prefix
        .eq_ignore_ascii_case(POWER_STATE_PREFIX)
        .then(|| &code[POWER_STATE_PREFIX.len()..])
}

/// What must happen around a mutation that needs the instance offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDecision {
    pub shutdown: bool,
    pub deallocate: bool,
    pub restart: bool,
    /// The state was `Unknown` and has been treated as `Running`
    pub assumed_running: bool,
}

/// Decision table for "must be offline to mutate".
///
/// Restart is only planned for instances that were running before; an
/// instance someone stopped on purpose stays stopped.
pub fn decide(current: PowerState) -> PowerDecision {
    match current {
        PowerState::Running => PowerDecision {
            shutdown: true,
            deallocate: true,
            restart: true,
            assumed_running: false,
        },
        PowerState::Unknown => PowerDecision {
            shutdown: true,
            deallocate: true,
            restart: true,
            assumed_running: true,
        },
        PowerState::Stopped => PowerDecision {
            shutdown: false,
            deallocate: true,
            restart: false,
            assumed_running: false,
        },
        PowerState::Stopping | PowerState::Deallocating | PowerState::Deallocated => {
            PowerDecision {
                shutdown: false,
                deallocate: false,
                restart: false,
                assumed_running: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_provisioning_codes_are_ignored() {
        let statuses = vec![
            InstanceStatus::new("ProvisioningState/succeeded"),
            InstanceStatus::new("PowerState/deallocated"),
            InstanceStatus::new("ProvisioningState/updating"),
        ];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Deallocated);
    }

    #[test]
    fn test_latest_power_code_wins() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        let statuses = vec![
            InstanceStatus::at("PowerState/running", late),
            InstanceStatus::at("PowerState/stopping", early),
        ];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Running);
    }

    #[test]
    fn test_untimestamped_codes_rank_below_timestamped() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let statuses = vec![
            InstanceStatus::at("PowerState/stopped", time),
            InstanceStatus::new("PowerState/running"),
        ];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Stopped);
    }

    #[test]
    fn test_ties_go_to_later_entry() {
        let statuses = vec![
            InstanceStatus::new("PowerState/stopping"),
            InstanceStatus::new("powerstate/STOPPED"),
        ];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Stopped);
    }

    #[test]
    fn test_unparseable_is_unknown() {
        assert_eq!(PowerState::from_statuses(&[]), PowerState::Unknown);
        let statuses = vec![InstanceStatus::new("PowerState/hibernated")];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Unknown);
        let statuses = vec![InstanceStatus::new("Power")];
        assert_eq!(PowerState::from_statuses(&statuses), PowerState::Unknown);
    }

    #[test]
    fn test_decision_table() {
        let running = decide(PowerState::Running);
        assert!(running.shutdown && running.deallocate && running.restart);
        assert!(!running.assumed_running);

        let unknown = decide(PowerState::Unknown);
        assert!(unknown.shutdown && unknown.deallocate && unknown.restart);
        assert!(unknown.assumed_running);

        let stopped = decide(PowerState::Stopped);
        assert!(!stopped.shutdown && stopped.deallocate && !stopped.restart);

        for state in [
            PowerState::Stopping,
            PowerState::Deallocating,
            PowerState::Deallocated,
        ] {
            let decision = decide(state);
            assert!(!decision.shutdown && !decision.deallocate && !decision.restart);
        }
    }
}
