//! Publisher node: stage, commit and force-push pending fixes to the
//! healing branch.
//!
//! Hard safety rule: a branch name matching a protected branch
//! (case-insensitive) quarantines the run before any git action. The
//! force push is safe because the healing branch is per-run and protected
//! branches never get this far.

use serde_json::json;
use tracing::{error, info};

use crate::context::AgentContext;
use crate::domain::{
    FixStatus, MendError, NodeName, Result, RunState, RunStatus, StateUpdate,
};
use crate::git;

const PROTECTED_BRANCHES: &[&str] = &["main", "master", "develop", "release"];

/// Whether pushing to this branch is forbidden.
pub fn is_protected_branch(branch: &str) -> bool {
    let lowered = branch.to_lowercase();
    PROTECTED_BRANCHES.contains(&lowered.as_str())
}

/// Summary commit message for a batch of fixes.
pub fn batch_commit_message(bug_types: &[&str], fix_count: usize, iteration: u32) -> String {
    let mut sorted: Vec<&str> = bug_types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    format!(
        "[AI-AGENT] Fix {fix_count} issue(s): {} (iter {iteration})",
        sorted.join(", ")
    )
}

/// Per-fix commit message recorded on the fix row.
pub fn fix_commit_message(bug_type: &str, description: &str) -> String {
    let head: String = description.chars().take(80).collect();
    format!("[AI-AGENT] Fix {bug_type}: {head}")
}

/// Commit all pending applied fixes and push to the healing branch.
pub async fn publish(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Publisher);

    if is_protected_branch(&state.branch_name) {
        let reason = format!(
            "BLOCKED: Refusing to push to protected branch '{}'",
            state.branch_name
        );
        error!(run_id = %state.run_id, branch = %state.branch_name, "refusing push to protected branch");
        events.thought("publisher", reason.clone(), step);
        return Ok(StateUpdate {
            error_message: Some(reason.clone()),
            status: Some(RunStatus::Quarantined),
            quarantine_reason: Some(reason),
            pushed_this_iteration: Some(false),
            current_node: Some(NodeName::Publisher),
            ..StateUpdate::default()
        });
    }

    let pending = state.pending_fix_indexes();
    if pending.is_empty() {
        events.thought("publisher", "No new fixes to commit", step);
        return Ok(StateUpdate {
            pushed_this_iteration: Some(false),
            current_node: Some(NodeName::Publisher),
            ..StateUpdate::default()
        });
    }

    events.thought(
        "publisher",
        format!(
            "Committing {} fix(es) to branch {}…",
            pending.len(),
            state.branch_name
        ),
        step,
    );

    let bug_types: Vec<&str> = pending
        .iter()
        .map(|&i| state.fixes[i].bug_type.as_str())
        .collect();
    let message = batch_commit_message(&bug_types, pending.len(), state.iteration);

    let repo_dir = state.repo_dir.clone();
    let branch = state.branch_name.clone();
    let user_name = ctx.config.git_user_name.clone();
    let user_email = ctx.config.git_user_email.clone();
    let token = ctx.config.forge_token.clone();
    let commit_message = message.clone();

    let push_result = tokio::task::spawn_blocking(move || -> Result<String> {
        git::configure_identity(&repo_dir, &user_name, &user_email)?;
        git::checkout_branch(&repo_dir, &branch)?;
        git::stage_all(&repo_dir)?;
        let sha = git::commit(&repo_dir, &commit_message)?;
        git::push_force(&repo_dir, &branch, token.as_deref())?;
        Ok(sha)
    })
    .await
    .map_err(|e| MendError::Git(format!("publish task panicked: {e}")))?;

    let mut fixes = state.fixes.clone();
    match push_result {
        Ok(sha) => {
            for &i in &pending {
                fixes[i].commit_sha = Some(sha.clone());
                fixes[i].commit_message =
                    fix_commit_message(fixes[i].bug_type.as_str(), &fixes[i].description);
            }
            info!(run_id = %state.run_id, sha = %sha, branch = %state.branch_name, "pushed fixes");
            events.thought(
                "publisher",
                format!("Pushed commit {sha} to {}", state.branch_name),
                step + 1,
            );
            ctx.trace(
                state,
                NodeName::Publisher,
                "git_push",
                format!("Committed and pushed {} fix(es)", pending.len()),
                Some(json!({
                    "commit_sha": sha,
                    "branch": state.branch_name,
                    "fixes_committed": pending.len(),
                })),
                None,
            )
            .await?;

            Ok(StateUpdate {
                fixes: Some(fixes),
                total_commits: Some(state.total_commits + 1),
                pushed_this_iteration: Some(true),
                current_node: Some(NodeName::Publisher),
                ..StateUpdate::default()
            })
        }
        Err(e) => {
            let error_message = format!("Git commit/push failed: {e}");
            error!(run_id = %state.run_id, error = %error_message, "push failed");
            events.thought("publisher", error_message.clone(), step + 1);

            for &i in &pending {
                fixes[i].status = FixStatus::Failed;
            }

            Ok(StateUpdate {
                fixes: Some(fixes),
                error_message: Some(error_message),
                pushed_this_iteration: Some(false),
                current_node: Some(NodeName::Publisher),
                ..StateUpdate::default()
            })
        }
    }
}
