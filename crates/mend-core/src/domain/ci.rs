//! Per-iteration CI observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CI status as observed from the forge.
///
/// `NoCi` is internal only; the public artifact maps it to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Running,
    Passed,
    Failed,
    NoCi,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Pending => "pending",
            CiStatus::Running => "running",
            CiStatus::Passed => "passed",
            CiStatus::Failed => "failed",
            CiStatus::NoCi => "no_ci",
        }
    }

    /// The contract-safe public spelling (`no_ci` never leaves the core).
    pub fn public(&self) -> &'static str {
        match self {
            CiStatus::NoCi => "failed",
            other => other.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CiStatus::Passed | CiStatus::Failed | CiStatus::NoCi)
    }
}

/// One CI iteration result, appended by the CI watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiRun {
    pub iteration: u32,
    pub status: CiStatus,
    pub forge_run_id: Option<u64>,
    pub failures_before: u32,
    pub failures_after: u32,
    pub regression: bool,
    pub rollback_triggered: bool,
    pub rollback_commit_sha: Option<String>,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
}

impl CiRun {
    pub fn new(iteration: u32, status: CiStatus) -> Self {
        Self {
            iteration,
            status,
            forge_run_id: None,
            failures_before: 0,
            failures_after: 0,
            regression: false,
            rollback_triggered: false,
            rollback_commit_sha: None,
            duration_secs: 0.0,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ci_maps_to_failed_publicly() {
        assert_eq!(CiStatus::NoCi.public(), "failed");
        assert_eq!(CiStatus::Passed.public(), "passed");
        assert_eq!(CiStatus::Pending.public(), "pending");
    }

    #[test]
    fn terminal_states() {
        assert!(CiStatus::Passed.is_terminal());
        assert!(CiStatus::Failed.is_terminal());
        assert!(CiStatus::NoCi.is_terminal());
        assert!(!CiStatus::Running.is_terminal());
        assert!(!CiStatus::Pending.is_terminal());
    }
}
