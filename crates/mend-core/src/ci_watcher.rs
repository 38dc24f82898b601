//! CI watcher node: poll the forge for the healing branch's latest run
//! until it is terminal, detect regressions across iterations, and the
//! one-shot workflow bootstrap when the repository has no CI at all.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use mend_state::CiEventRow;

use crate::context::AgentContext;
use crate::domain::{
    CiRun, CiStatus, FixStatus, MendError, NodeName, Result, RunState, StateUpdate,
};
use crate::git;

/// Poll CI for this iteration.
pub async fn watch(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::CiWatcher);
    let started = std::time::Instant::now();

    events.thought(
        "ci_watcher",
        format!("Polling CI for branch {}…", state.branch_name),
        step,
    );

    // No workflow at all → signal the bootstrap route (once per run).
    if !state.ci_workflow_created {
        match ctx.forge.workflow_exists().await {
            Ok(false) => {
                events.thought("ci_watcher", "No CI workflow found on the repository", step);
                let ci_run = CiRun {
                    failures_before: state.failures.len() as u32,
                    failures_after: state.failures.len() as u32,
                    duration_secs: started.elapsed().as_secs_f64(),
                    ..CiRun::new(state.iteration, CiStatus::NoCi)
                };
                record_ci_event(state, ctx, &ci_run).await?;
                events.ci_update(state.iteration, CiStatus::NoCi, false, step + 1);
                return Ok(StateUpdate {
                    ci_run: Some(ci_run),
                    current_ci_status: Some(CiStatus::NoCi),
                    current_node: Some(NodeName::CiWatcher),
                    ..StateUpdate::default()
                });
            }
            Ok(true) => {}
            Err(e) => warn!(run_id = %state.run_id, error = %e, "workflow lookup failed"),
        }
    }

    // Poll until terminal or the per-iteration budget runs out.
    let deadline = Duration::from_secs(ctx.config.ci_poll_timeout_secs);
    let interval = Duration::from_secs(ctx.config.ci_poll_interval_secs.max(1));
    let mut status = CiStatus::Pending;
    let mut forge_run_id = None;
    let mut last_emitted = None;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(MendError::Cancelled);
        }

        match ctx.forge.latest_run(&state.branch_name).await {
            Ok(Some(run)) => {
                status = run.ci_status();
                forge_run_id = Some(run.id);
            }
            Ok(None) => status = CiStatus::Pending,
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "forge poll failed");
                status = CiStatus::Failed;
            }
        }

        if last_emitted != Some(status) {
            events.ci_update(state.iteration, status, false, step + 1);
            last_emitted = Some(status);
        }

        if status.is_terminal() {
            break;
        }
        if started.elapsed() >= deadline {
            warn!(run_id = %state.run_id, "CI poll budget exhausted");
            status = CiStatus::Failed;
            break;
        }
        tokio::time::sleep(interval).await;
    }

    // Regression detection against the previous iteration.
    let failures_before = state
        .ci_runs
        .last()
        .map(|prev| prev.failures_after)
        .unwrap_or(state.failures.len() as u32);
    let failures_after = if status == CiStatus::Passed {
        0
    } else {
        state.failures.len() as u32
    };
    let previous_after = state.ci_runs.last().map(|prev| prev.failures_after);
    let regression = previous_after
        .map(|prev| failures_after > prev)
        .unwrap_or(false);

    let mut fix_status_changes = Vec::new();
    let mut rollback_sha = None;
    if regression {
        // Record-only rollback: flip the last pushed batch, keep the commit.
        let last_sha = state
            .fixes
            .iter()
            .rev()
            .find_map(|f| f.commit_sha.clone());
        if let Some(sha) = last_sha {
            for (i, fix) in state.fixes.iter().enumerate() {
                if fix.commit_sha.as_deref() == Some(sha.as_str())
                    && fix.status == FixStatus::Applied
                {
                    fix_status_changes.push((i, FixStatus::RolledBack));
                }
            }
            rollback_sha = Some(sha);
        }
        warn!(
            run_id = %state.run_id,
            failures_after,
            previous_after = previous_after.unwrap_or(0),
            "regression detected — marking last batch rolled back"
        );
    }

    let ci_run = CiRun {
        iteration: state.iteration,
        status,
        forge_run_id,
        failures_before,
        failures_after,
        regression,
        rollback_triggered: regression,
        rollback_commit_sha: rollback_sha,
        duration_secs: started.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    };
    record_ci_event(state, ctx, &ci_run).await?;

    info!(
        run_id = %state.run_id,
        status = status.as_str(),
        regression,
        "CI iteration observed"
    );
    events.ci_update(state.iteration, status, regression, step + 1);
    ctx.trace(
        state,
        NodeName::CiWatcher,
        "ci_poll",
        format!("CI {} for iteration {}", status.as_str(), state.iteration),
        Some(json!({
            "status": status.as_str(),
            "forge_run_id": ci_run.forge_run_id,
            "regression": regression,
        })),
        None,
    )
    .await?;

    Ok(StateUpdate {
        ci_run: Some(ci_run),
        current_ci_status: Some(status),
        regression_detected: Some(regression),
        fix_status_changes,
        current_node: Some(NodeName::CiWatcher),
        ..StateUpdate::default()
    })
}

async fn record_ci_event(state: &RunState, ctx: &AgentContext, ci_run: &CiRun) -> Result<()> {
    ctx.journal
        .record_ci_event(CiEventRow {
            event_id: Uuid::new_v4().to_string(),
            run_id: state.run_id.clone(),
            iteration: ci_run.iteration,
            status: ci_run.status.as_str().to_string(),
            forge_run_id: ci_run.forge_run_id,
            failures_before: ci_run.failures_before,
            failures_after: ci_run.failures_after,
            regression_detected: ci_run.regression,
            rollback_triggered: ci_run.rollback_triggered,
            rollback_commit_sha: ci_run.rollback_commit_sha.clone(),
            duration_secs: ci_run.duration_secs,
            triggered_at: ci_run.timestamp,
            completed_at: ci_run.status.is_terminal().then(Utc::now),
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Workflow bootstrap
// ---------------------------------------------------------------------------

/// Minimal language-appropriate workflow file content.
pub fn workflow_template(language: &str, framework: &str) -> String {
    let (setup, test_cmd) = match language {
        "python" => (
            "      - uses: actions/setup-python@v5\n        with:\n          python-version: '3.12'\n      - run: pip install -r requirements.txt pytest || pip install pytest\n",
            "python -m pytest --tb=short -q",
        ),
        "javascript" | "typescript" => (
            "      - uses: actions/setup-node@v4\n        with:\n          node-version: '20'\n      - run: npm install\n",
            "npm test",
        ),
        "go" => ("", "go test ./..."),
        "rust" => ("", "cargo test"),
        _ => {
            if framework == "mix-test" {
                ("", "mix test")
            } else {
                ("", "echo 'no test command configured'")
            }
        }
    };

    format!(
        "name: mend-ci\n\
         on:\n\
         \x20\x20push:\n\
         \x20\x20\x20\x20branches: ['**']\n\
         jobs:\n\
         \x20\x20test:\n\
         \x20\x20\x20\x20runs-on: ubuntu-latest\n\
         \x20\x20\x20\x20steps:\n\
         \x20\x20\x20\x20\x20\x20- uses: actions/checkout@v4\n\
         {setup}\
         \x20\x20\x20\x20\x20\x20- run: {test_cmd}\n"
    )
}

/// One-shot bootstrap: commit a minimal workflow file and push it.
pub async fn bootstrap_workflow(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Bootstrap);
    events.thought("bootstrap", "Creating a minimal CI workflow…", step);

    let workflow_dir = state.repo_dir.join(".github").join("workflows");
    std::fs::create_dir_all(&workflow_dir)?;
    std::fs::write(
        workflow_dir.join("mend-ci.yml"),
        workflow_template(&state.language, &state.framework),
    )?;

    let repo_dir = state.repo_dir.clone();
    let branch = state.branch_name.clone();
    let user_name = ctx.config.git_user_name.clone();
    let user_email = ctx.config.git_user_email.clone();
    let token = ctx.config.forge_token.clone();

    let push_result = tokio::task::spawn_blocking(move || -> Result<()> {
        git::configure_identity(&repo_dir, &user_name, &user_email)?;
        git::stage_all(&repo_dir)?;
        git::commit(&repo_dir, "[AI-AGENT] Add CI workflow")?;
        git::push_force(&repo_dir, &branch, token.as_deref())?;
        Ok(())
    })
    .await
    .map_err(|e| MendError::Git(format!("bootstrap task panicked: {e}")))?;

    let mut update = StateUpdate {
        // One attempt per run, whatever the push outcome.
        ci_workflow_created: Some(true),
        current_node: Some(NodeName::Bootstrap),
        ..StateUpdate::default()
    };

    match push_result {
        Ok(()) => {
            events.thought("bootstrap", "Pushed CI workflow", step + 1);
            update.total_commits = Some(state.total_commits + 1);
        }
        Err(e) => {
            warn!(run_id = %state.run_id, error = %e, "workflow bootstrap push failed");
            events.thought("bootstrap", format!("Workflow push failed: {e}"), step + 1);
        }
    }

    ctx.trace(
        state,
        NodeName::Bootstrap,
        "workflow_bootstrap",
        "Committed minimal CI workflow",
        None,
        None,
    )
    .await?;

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_templates_are_language_appropriate() {
        let python = workflow_template("python", "pytest");
        assert!(python.contains("setup-python"));
        assert!(python.contains("pytest"));

        let node = workflow_template("typescript", "jest");
        assert!(node.contains("setup-node"));
        assert!(node.contains("npm test"));

        let rust = workflow_template("rust", "cargo-test");
        assert!(rust.contains("cargo test"));

        let other = workflow_template("cobol", "unknown");
        assert!(other.contains("no test command configured"));
    }

    #[test]
    fn workflow_template_is_valid_shape() {
        let yaml = workflow_template("go", "go-test");
        assert!(yaml.starts_with("name: mend-ci\n"));
        assert!(yaml.contains("runs-on: ubuntu-latest"));
        assert!(yaml.contains("actions/checkout@v4"));
        assert!(yaml.contains("go test ./..."));
    }
}
