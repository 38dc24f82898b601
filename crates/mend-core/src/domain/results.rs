//! The public `results.json` artifact.
//!
//! Built once by the scorer from the final run state. Internal-only values
//! never appear here: `no_ci` maps to `failed` in the CI log, and fix
//! statuses collapse to `FIXED`/`FAILED`.

use serde::{Deserialize, Serialize};

use super::bug::BugType;
use super::fix::{FixRecord, FixStatus};
use super::run::{FinalStatus, RunState};
use super::score::ScoreBreakdown;

/// Public status of one fix row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicFixStatus {
    Fixed,
    Failed,
}

/// One row of the public fix table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFixRow {
    pub file: String,
    pub bug_type: BugType,
    pub line_number: u32,
    pub commit_message: String,
    pub status: PublicFixStatus,
}

/// One row of the public CI log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCiRow {
    pub iteration: u32,
    pub status: String,
    pub timestamp: String,
    pub regression: bool,
}

/// The finalized result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsJson {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub final_status: FinalStatus,
    pub total_failures: u32,
    pub total_fixes: u32,
    pub total_time_secs: f64,
    pub score: ScoreBreakdown,
    pub fixes: Vec<ResultFixRow>,
    pub ci_log: Vec<ResultCiRow>,
}

impl ResultsJson {
    /// Project the final run state into the public artifact.
    pub fn from_state(
        state: &RunState,
        final_status: FinalStatus,
        score: ScoreBreakdown,
        total_failures: u32,
        total_fixes: u32,
        total_time_secs: f64,
    ) -> Self {
        Self {
            run_id: state.run_id.clone(),
            repo_url: state.repo_url.clone(),
            team_name: state.team_name.clone(),
            leader_name: state.leader_name.clone(),
            branch_name: state.branch_name.clone(),
            final_status,
            total_failures,
            total_fixes,
            total_time_secs,
            score,
            fixes: state.fixes.iter().map(public_fix_row).collect(),
            ci_log: state
                .ci_runs
                .iter()
                .map(|cr| ResultCiRow {
                    iteration: cr.iteration,
                    status: cr.status.public().to_string(),
                    timestamp: cr.timestamp.to_rfc3339(),
                    regression: cr.regression,
                })
                .collect(),
        }
    }
}

fn public_fix_row(fix: &FixRecord) -> ResultFixRow {
    let commit_message = if fix.commit_message.is_empty() {
        format!("[AI-AGENT] Fix {}", fix.bug_type)
    } else {
        fix.commit_message.clone()
    };
    ResultFixRow {
        file: fix.file_path.clone(),
        bug_type: fix.bug_type,
        line_number: fix.line_number.max(1),
        commit_message,
        status: if fix.status == FixStatus::Applied {
            PublicFixStatus::Fixed
        } else {
            PublicFixStatus::Failed
        },
    }
}
