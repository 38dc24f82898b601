//! Run-scoped state: the spec that starts a run, the full state record the
//! orchestrator owns, and the partial update each node returns.
//!
//! Nodes never hold a mutable reference to the state. They receive `&RunState`
//! and return a [`StateUpdate`]; the orchestrator merges. This keeps the
//! routing predicates pure and rules out partial-merge ordering questions.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ci::{CiRun, CiStatus};
use super::failure::TestFailure;
use super::fix::{FixRecord, FixStatus};
use super::score::ScoreBreakdown;

/// Per-run feature toggles, carried opaquely from the run-start command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_kb_lookup: bool,
    pub enable_speculative_branches: bool,
    pub enable_adversarial_tests: bool,
    pub enable_causal_graph: bool,
    pub enable_provenance_pass: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_kb_lookup: true,
            enable_speculative_branches: false,
            enable_adversarial_tests: true,
            enable_causal_graph: true,
            enable_provenance_pass: true,
        }
    }
}

/// The run-start command: identity plus initial configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub max_iterations: u32,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
}

/// Run lifecycle status. Transitions are monotonic toward a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Quarantined,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Quarantined => "quarantined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Quarantined
        )
    }

    fn rank(&self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::Running => 1,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Quarantined => 2,
        }
    }
}

/// User-visible terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Passed,
    Failed,
    Quarantined,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Passed => "PASSED",
            FinalStatus::Failed => "FAILED",
            FinalStatus::Quarantined => "QUARANTINED",
        }
    }

    pub fn run_status(&self) -> RunStatus {
        match self {
            FinalStatus::Passed => RunStatus::Passed,
            FinalStatus::Failed => RunStatus::Failed,
            FinalStatus::Quarantined => RunStatus::Quarantined,
        }
    }
}

/// Pipeline node names, used for tracing and the `step_index` convention
/// (`iteration * 10 + offset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Scanner,
    Runner,
    Analyzer,
    Synthesizer,
    Publisher,
    CiWatcher,
    Bootstrap,
    Scorer,
    Retry,
}

impl NodeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::Scanner => "scanner",
            NodeName::Runner => "runner",
            NodeName::Analyzer => "analyzer",
            NodeName::Synthesizer => "synthesizer",
            NodeName::Publisher => "publisher",
            NodeName::CiWatcher => "ci_watcher",
            NodeName::Bootstrap => "bootstrap",
            NodeName::Scorer => "scorer",
            NodeName::Retry => "retry",
        }
    }

    /// Offset within an iteration for the step-index scheme.
    pub fn step_offset(&self) -> u32 {
        match self {
            NodeName::Retry => 0,
            NodeName::Scanner => 1,
            NodeName::Runner => 3,
            NodeName::Analyzer => 4,
            NodeName::Synthesizer => 5,
            NodeName::Publisher => 6,
            NodeName::CiWatcher => 7,
            NodeName::Bootstrap => 8,
            NodeName::Scorer => 9,
        }
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full run-scoped state record, exclusively owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunState {
    // Identity
    pub run_id: String,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub max_iterations: u32,
    pub feature_flags: FeatureFlags,

    // Repo scanning
    pub repo_dir: PathBuf,
    pub language: String,
    pub framework: String,
    pub test_files: Vec<String>,

    // Test running / analysis
    pub test_output: String,
    pub test_exit_code: i32,
    pub failures: Vec<TestFailure>,

    // Fix generation
    pub fixes: Vec<FixRecord>,
    pub total_commits: u32,
    pub pushed_this_iteration: bool,

    // CI monitoring
    pub ci_runs: Vec<CiRun>,
    pub current_ci_status: CiStatus,
    pub regression_detected: bool,
    pub ci_workflow_created: bool,

    // Iteration control
    pub iteration: u32,
    pub current_node: NodeName,
    pub status: RunStatus,

    // Scoring
    pub score: Option<ScoreBreakdown>,
    pub total_time_secs: f64,
    pub started_at: Instant,
    pub started_wallclock: DateTime<Utc>,

    // Outputs
    pub results_path: Option<PathBuf>,
    pub report_url: Option<String>,

    // Error / quarantine
    pub error_message: Option<String>,
    pub quarantine_reason: Option<String>,
}

impl RunState {
    /// Initial state for a validated spec (`running`, iteration 1).
    pub fn from_spec(spec: &RunSpec) -> Self {
        Self {
            run_id: spec.run_id.clone(),
            repo_url: spec.repo_url.clone(),
            team_name: spec.team_name.clone(),
            leader_name: spec.leader_name.clone(),
            branch_name: spec.branch_name.clone(),
            max_iterations: spec.max_iterations,
            feature_flags: spec.feature_flags.clone(),
            repo_dir: PathBuf::new(),
            language: String::new(),
            framework: String::new(),
            test_files: Vec::new(),
            test_output: String::new(),
            test_exit_code: 0,
            failures: Vec::new(),
            fixes: Vec::new(),
            total_commits: 0,
            pushed_this_iteration: false,
            ci_runs: Vec::new(),
            current_ci_status: CiStatus::Failed,
            regression_detected: false,
            ci_workflow_created: false,
            iteration: 1,
            current_node: NodeName::Scanner,
            status: RunStatus::Running,
            score: None,
            total_time_secs: 0.0,
            started_at: Instant::now(),
            started_wallclock: Utc::now(),
            results_path: None,
            report_url: None,
            error_message: None,
            quarantine_reason: None,
        }
    }

    /// Step index for a node visit under the `iteration*10 + offset` scheme.
    pub fn step_index(&self, node: NodeName) -> u32 {
        self.iteration * 10 + node.step_offset()
    }

    /// Merge a node's partial update into the record.
    ///
    /// Status changes are monotonic: a lower-ranked status never replaces a
    /// higher-ranked one, and a terminal status is never replaced by a
    /// different terminal.
    pub fn merge(&mut self, update: StateUpdate) {
        if let Some(dir) = update.repo_dir {
            self.repo_dir = dir;
        }
        if let Some(language) = update.language {
            self.language = language;
        }
        if let Some(framework) = update.framework {
            self.framework = framework;
        }
        if let Some(test_files) = update.test_files {
            self.test_files = test_files;
        }
        if let Some(output) = update.test_output {
            self.test_output = output;
        }
        if let Some(code) = update.test_exit_code {
            self.test_exit_code = code;
        }
        if let Some(failures) = update.failures {
            self.failures = failures;
        }
        if let Some(fixes) = update.fixes {
            self.fixes = fixes;
        }
        for (index, status) in update.fix_status_changes {
            if let Some(fix) = self.fixes.get_mut(index) {
                fix.status = status;
            }
        }
        if let Some(commits) = update.total_commits {
            self.total_commits = commits;
        }
        if let Some(pushed) = update.pushed_this_iteration {
            self.pushed_this_iteration = pushed;
        }
        if let Some(ci_run) = update.ci_run {
            self.ci_runs.push(ci_run);
        }
        if let Some(status) = update.current_ci_status {
            self.current_ci_status = status;
        }
        if let Some(regression) = update.regression_detected {
            self.regression_detected = regression;
        }
        if let Some(created) = update.ci_workflow_created {
            self.ci_workflow_created = created;
        }
        if let Some(status) = update.status {
            if status.rank() >= self.status.rank() && !self.status.is_terminal() {
                self.status = status;
            } else if self.status == status {
                // idempotent re-assertion of the same terminal is fine
            }
        }
        if let Some(score) = update.score {
            self.score = Some(score);
        }
        if let Some(secs) = update.total_time_secs {
            self.total_time_secs = secs;
        }
        if let Some(path) = update.results_path {
            self.results_path = Some(path);
        }
        if let Some(url) = update.report_url {
            self.report_url = Some(url);
        }
        if let Some(error) = update.error_message {
            self.error_message = Some(error);
        }
        if let Some(reason) = update.quarantine_reason {
            self.quarantine_reason = Some(reason);
        }
        if let Some(node) = update.current_node {
            self.current_node = node;
        }
        if let Some(iteration) = update.iteration {
            // The back-edge only moves forward.
            if iteration > self.iteration {
                self.iteration = iteration;
            }
        }
    }

    /// Fixes still waiting on a commit SHA, by index handle.
    pub fn pending_fix_indexes(&self) -> Vec<usize> {
        self.fixes
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pending_commit())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Partial state returned by a node; `None` fields are left untouched.
///
/// `ci_run` appends; `fix_status_changes` addresses fixes by index handle
/// rather than by shared pointer.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub repo_dir: Option<PathBuf>,
    pub language: Option<String>,
    pub framework: Option<String>,
    pub test_files: Option<Vec<String>>,
    pub test_output: Option<String>,
    pub test_exit_code: Option<i32>,
    pub failures: Option<Vec<TestFailure>>,
    pub fixes: Option<Vec<FixRecord>>,
    pub fix_status_changes: Vec<(usize, FixStatus)>,
    pub total_commits: Option<u32>,
    pub pushed_this_iteration: Option<bool>,
    pub ci_run: Option<CiRun>,
    pub current_ci_status: Option<CiStatus>,
    pub regression_detected: Option<bool>,
    pub ci_workflow_created: Option<bool>,
    pub status: Option<RunStatus>,
    pub score: Option<ScoreBreakdown>,
    pub total_time_secs: Option<f64>,
    pub results_path: Option<PathBuf>,
    pub report_url: Option<String>,
    pub error_message: Option<String>,
    pub quarantine_reason: Option<String>,
    pub current_node: Option<NodeName>,
    pub iteration: Option<u32>,
}
