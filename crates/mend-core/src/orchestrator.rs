//! Orchestrator: drives the pipeline for one run.
//!
//! Holds the state record, invokes nodes, merges their partial updates,
//! routes transitions through pure predicates, enforces the recursion and
//! iteration budgets, observes cancellation between nodes, and turns any
//! uncaught node error into a terminal `failed` run.
//!
//! Pipeline shape (one back-edge):
//!
//! ```text
//! scanner → runner → analyzer → [fix?]
//!     yes → synthesizer → publisher → [ci?]
//!         yes → ci_watcher → [retry | bootstrap | score]
//!             bootstrap → ci_watcher (one-time)
//!             retry → runner (iteration += 1)
//!         no → scorer
//!     no → scorer
//! ```

use chrono::Utc;
use tracing::{error, info};

use mend_state::{RunPatch, RunRow};

use crate::context::AgentContext;
use crate::domain::{
    CiStatus, FinalStatus, MendError, NodeName, Result, RunSpec, RunState, RunStatus,
    ScoreBreakdown, StateUpdate,
};
use crate::{analyzer, ci_watcher, publisher, runner, scanner, scorer, synthesizer};

/// Guard against accidental cycles, independent of the iteration budget.
/// Each iteration visits at most seven nodes; twenty iterations stay far
/// below this.
const RECURSION_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Routing predicates (pure)
// ---------------------------------------------------------------------------

/// After the analyzer: a green suite or an empty failure list goes straight
/// to the scorer.
pub fn route_after_analyzer(state: &RunState) -> NodeName {
    if state.test_exit_code == 0 || state.failures.is_empty() {
        NodeName::Scorer
    } else {
        NodeName::Synthesizer
    }
}

/// After the publisher: a failed or absent push makes CI polling pointless.
pub fn route_after_publisher(state: &RunState) -> NodeName {
    let push_failed = state
        .error_message
        .as_deref()
        .map(|e| e.to_lowercase().contains("commit/push failed"))
        .unwrap_or(false);
    if push_failed || !state.pushed_this_iteration {
        NodeName::Scorer
    } else {
        NodeName::CiWatcher
    }
}

/// After the CI watcher: bootstrap a workflow once, finish on success,
/// quarantine or budget exhaustion, otherwise take the back-edge.
pub fn route_after_ci(state: &RunState) -> NodeName {
    if state.current_ci_status == CiStatus::NoCi && !state.ci_workflow_created {
        return NodeName::Bootstrap;
    }
    if state.current_ci_status == CiStatus::Passed && state.test_exit_code == 0 {
        return NodeName::Scorer;
    }
    if state.quarantine_reason.is_some() {
        return NodeName::Scorer;
    }
    if state.iteration >= state.max_iterations {
        return NodeName::Scorer;
    }
    NodeName::Retry
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Pipeline driver for a single run.
pub struct Orchestrator {
    ctx: AgentContext,
}

impl Orchestrator {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Execute the full pipeline for one run.
    ///
    /// On any uncaught node error the run is marked `failed`, a terminal
    /// `run_complete` event goes out, and the error propagates to the
    /// caller.
    pub async fn execute(&self, spec: RunSpec) -> Result<RunState> {
        crate::domain::validate_run_spec(&spec)?;

        let mut state = RunState::from_spec(&spec);
        self.ctx
            .journal
            .create_run(RunRow::new(
                &spec.run_id,
                &spec.repo_url,
                &spec.team_name,
                &spec.leader_name,
                &spec.branch_name,
            ))
            .await?;
        self.ctx
            .journal
            .update_run(&spec.run_id, RunPatch::status("running"))
            .await?;

        info!(run_id = %spec.run_id, repo = %spec.repo_url, "starting run");

        match self.drive(&mut state).await {
            Ok(()) => {
                info!(run_id = %state.run_id, status = state.status.as_str(), "run finished");
                Ok(state)
            }
            Err(e) => {
                error!(run_id = %state.run_id, error = %e, "run crashed");
                self.fail_run(&mut state, &e).await;
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut RunState) -> Result<()> {
        let mut node = NodeName::Scanner;
        let mut visits = 0u32;

        loop {
            visits += 1;
            if visits > RECURSION_LIMIT {
                return Err(MendError::RecursionLimit(visits));
            }
            if self.ctx.cancel.is_cancelled() {
                return Err(MendError::Cancelled);
            }

            let update = self.run_node(node, state).await?;
            state.merge(update);

            if node == NodeName::Scorer {
                return Ok(());
            }
            node = self.next_node(node, state);
        }
    }

    async fn run_node(&self, node: NodeName, state: &RunState) -> Result<StateUpdate> {
        match node {
            NodeName::Scanner => scanner::scan(state, &self.ctx).await,
            NodeName::Runner => runner::run_tests(state, &self.ctx).await,
            NodeName::Analyzer => analyzer::analyze(state, &self.ctx).await,
            NodeName::Synthesizer => synthesizer::synthesize(state, &self.ctx).await,
            NodeName::Publisher => publisher::publish(state, &self.ctx).await,
            NodeName::CiWatcher => ci_watcher::watch(state, &self.ctx).await,
            NodeName::Bootstrap => ci_watcher::bootstrap_workflow(state, &self.ctx).await,
            NodeName::Scorer => scorer::score(state, &self.ctx).await,
            NodeName::Retry => Ok(self.retry_transition(state)),
        }
    }

    /// The thin transition on the back-edge: bump the iteration, reset the
    /// per-iteration push flag.
    fn retry_transition(&self, state: &RunState) -> StateUpdate {
        let iteration = state.iteration + 1;
        self.ctx.events(&state.run_id).thought(
            "retry",
            format!("Starting iteration {iteration}…"),
            iteration * 10,
        );
        StateUpdate {
            iteration: Some(iteration),
            pushed_this_iteration: Some(false),
            current_node: Some(NodeName::Retry),
            ..StateUpdate::default()
        }
    }

    fn next_node(&self, node: NodeName, state: &RunState) -> NodeName {
        match node {
            NodeName::Scanner => NodeName::Runner,
            NodeName::Runner => NodeName::Analyzer,
            NodeName::Analyzer => route_after_analyzer(state),
            NodeName::Synthesizer => NodeName::Publisher,
            NodeName::Publisher => route_after_publisher(state),
            NodeName::CiWatcher => route_after_ci(state),
            NodeName::Bootstrap => NodeName::CiWatcher,
            NodeName::Retry => NodeName::Runner,
            NodeName::Scorer => NodeName::Scorer,
        }
    }

    /// Crash-to-failed: persist the terminal row and emit `run_complete`
    /// so the caller-facing surface stays structured.
    async fn fail_run(&self, state: &mut RunState, error: &MendError) {
        state.merge(StateUpdate {
            status: Some(RunStatus::Failed),
            error_message: Some(error.to_string()),
            ..StateUpdate::default()
        });

        let patch = RunPatch {
            status: "failed".to_string(),
            end_time: Some(Utc::now()),
            total_time_secs: Some(state.started_at.elapsed().as_secs_f64()),
            total_iterations: Some(state.iteration),
            ..RunPatch::default()
        };
        if let Err(e) = self.ctx.journal.update_run(&state.run_id, patch).await {
            error!(run_id = %state.run_id, error = %e, "failed to persist crash state");
        }

        self.ctx.events(&state.run_id).run_complete(
            FinalStatus::Failed,
            state.score.unwrap_or(ScoreBreakdown {
                base: 0.0,
                speed_bonus: 0.0,
                efficiency_penalty: 0.0,
                total: 0.0,
            }),
            state.started_at.elapsed().as_secs_f64(),
            String::new(),
            state.iteration * 10 + 9,
        );
    }
}
