//! Journal trait definition for the mend agent.
//!
//! The journal is the durable sink for everything a run produces: the run
//! row itself, per-failure fix rows, per-iteration CI events, per-node
//! execution traces, and the final report bytes. The core never talks to a
//! database directly; it only sees this trait. An in-memory fake satisfying
//! the same contract lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JournalError;

/// Result type for journal operations
pub type JournalResult<T> = std::result::Result<T, JournalError>;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// The top-level run row.
///
/// `status` holds one of `queued | running | passed | failed | quarantined`.
/// Terminal fields stay `None` until the scorer fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_secs: Option<f64>,
    pub base_score: Option<f64>,
    pub speed_bonus: Option<f64>,
    pub efficiency_penalty: Option<f64>,
    pub final_score: Option<f64>,
    pub total_failures: Option<u32>,
    pub total_fixes: Option<u32>,
    pub total_commits: Option<u32>,
    pub total_iterations: Option<u32>,
    pub quarantine_reason: Option<String>,
}

impl RunRow {
    /// A fresh `queued` row with all terminal fields unset.
    pub fn new(
        run_id: impl Into<String>,
        repo_url: impl Into<String>,
        team_name: impl Into<String>,
        leader_name: impl Into<String>,
        branch_name: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            repo_url: repo_url.into(),
            team_name: team_name.into(),
            leader_name: leader_name.into(),
            branch_name: branch_name.into(),
            status: "queued".to_string(),
            start_time: Utc::now(),
            end_time: None,
            total_time_secs: None,
            base_score: None,
            speed_bonus: None,
            efficiency_penalty: None,
            final_score: None,
            total_failures: None,
            total_fixes: None,
            total_commits: None,
            total_iterations: None,
            quarantine_reason: None,
        }
    }
}

/// Partial update applied to a run row.
///
/// `None` fields keep the stored value (coalesce semantics); `status` is
/// always written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPatch {
    pub status: String,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_secs: Option<f64>,
    pub base_score: Option<f64>,
    pub speed_bonus: Option<f64>,
    pub efficiency_penalty: Option<f64>,
    pub final_score: Option<f64>,
    pub total_failures: Option<u32>,
    pub total_fixes: Option<u32>,
    pub total_commits: Option<u32>,
    pub total_iterations: Option<u32>,
    pub quarantine_reason: Option<String>,
}

impl RunPatch {
    /// A status-only patch.
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }
}

/// One fix row. `bug_type` holds one of the six canonical classes
/// (`LINTING | SYNTAX | LOGIC | TYPE_ERROR | IMPORT | INDENTATION`);
/// `status` one of `applied | failed | rolled_back | skipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRow {
    pub fix_id: String,
    pub run_id: String,
    pub file_path: String,
    pub bug_type: String,
    pub line_number: u32,
    pub description: String,
    pub fix_description: String,
    pub original_code: String,
    pub fixed_code: String,
    pub status: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub confidence_score: f64,
    pub model_used: String,
    pub applied_at: DateTime<Utc>,
}

/// One CI event row, appended per iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiEventRow {
    pub event_id: String,
    pub run_id: String,
    pub iteration: u32,
    pub status: String,
    pub forge_run_id: Option<u64>,
    pub failures_before: u32,
    pub failures_after: u32,
    pub regression_detected: bool,
    pub rollback_triggered: bool,
    pub rollback_commit_sha: Option<String>,
    pub duration_secs: f64,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One execution-trace row, recorded per node visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRow {
    pub trace_id: String,
    pub run_id: String,
    pub step_index: u32,
    pub agent_node: String,
    pub action_type: String,
    pub action_label: String,
    pub payload: Option<serde_json::Value>,
    pub thought_text: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Whether a stored run status is terminal (accepts no further writes).
pub fn is_terminal_status(status: &str) -> bool {
    matches!(status, "passed" | "failed" | "quarantined")
}

// ---------------------------------------------------------------------------
// Journal trait
// ---------------------------------------------------------------------------

/// Durable sink for run state, fixes, CI events, traces and the report.
///
/// Guarantees:
/// - One row per `run_id`; `create_run` fails on duplicates.
/// - Fix rows are returned ordered by `applied_at`, CI events by
///   `iteration`, traces by `step_index`.
/// - `update_run` coalesces: `None` patch fields keep the stored value.
/// - A run transitions `queued` → `running` → `passed | failed |
///   quarantined`; once the stored status is terminal, `update_run`
///   rejects further writes with [`JournalError::TerminalRun`].
#[async_trait]
pub trait Journal: Send + Sync {
    /// Insert a fresh run row. Fails if the run already exists.
    async fn create_run(&self, row: RunRow) -> JournalResult<()>;

    /// Apply a partial update to an existing run row.
    async fn update_run(&self, run_id: &str, patch: RunPatch) -> JournalResult<()>;

    /// Append a fix row, returning its id.
    async fn record_fix(&self, fix: FixRow) -> JournalResult<String>;

    /// Append a CI event row, returning its id.
    async fn record_ci_event(&self, event: CiEventRow) -> JournalResult<String>;

    /// Append an execution-trace row, returning its id.
    async fn record_trace(&self, trace: TraceRow) -> JournalResult<String>;

    /// Store the rendered report bytes for a run.
    async fn store_report(&self, run_id: &str, bytes: Vec<u8>) -> JournalResult<()>;

    /// Fetch a run row by id.
    async fn get_run(&self, run_id: &str) -> JournalResult<RunRow>;

    /// All fix rows for a run, ordered by `applied_at`.
    async fn fixes_for_run(&self, run_id: &str) -> JournalResult<Vec<FixRow>>;

    /// All CI events for a run, ordered by `iteration`.
    async fn ci_events_for_run(&self, run_id: &str) -> JournalResult<Vec<CiEventRow>>;

    /// All traces for a run, ordered by `step_index`.
    async fn traces_for_run(&self, run_id: &str) -> JournalResult<Vec<TraceRow>>;
}
