//! Scorer node: compute the final score, write `results.json`, hand the
//! finalized record to the report renderer, persist the terminal row and
//! emit the completion event.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use mend_state::RunPatch;

use crate::config::ScoreConfig;
use crate::context::AgentContext;
use crate::domain::{
    CiStatus, FinalStatus, FixStatus, NodeName, Result, ResultsJson, RunState, ScoreBreakdown,
    StateUpdate,
};

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// SHA-256 hex digest of the serialized artifact, written alongside it so
/// downstream consumers can verify integrity.
pub fn artifact_digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Score formula.
///
/// Base scales with the fix rate when failures were found; a PASSED run
/// restores the full base and re-evaluates the speed bonus on time alone.
/// The total never goes below zero.
pub fn compute_score(
    config: &ScoreConfig,
    total_time_secs: f64,
    total_commits: u32,
    total_failures: u32,
    fixes_applied: u32,
    passed: bool,
) -> ScoreBreakdown {
    let mut base = config.base;

    let mut speed_bonus = 0.0;
    if fixes_applied > 0 && total_time_secs < config.speed_threshold_secs {
        speed_bonus = config.speed_bonus;
    }

    let efficiency_penalty =
        config.penalty_per_commit * f64::from(total_commits.saturating_sub(config.free_commits));

    if total_failures > 0 {
        base *= f64::from(fixes_applied) / f64::from(total_failures);
    }

    if passed {
        base = config.base;
        speed_bonus = if total_time_secs < config.speed_threshold_secs {
            config.speed_bonus
        } else {
            0.0
        };
    }

    let total = base + speed_bonus - efficiency_penalty;
    ScoreBreakdown {
        base: round1(base),
        speed_bonus,
        efficiency_penalty,
        total: round1(total.max(0.0)),
    }
}

/// Final status: PASSED when CI passed or the local suite is green,
/// QUARANTINED when a safety rule fired, FAILED otherwise.
pub fn final_status(state: &RunState) -> FinalStatus {
    if state.current_ci_status == CiStatus::Passed || state.test_exit_code == 0 {
        FinalStatus::Passed
    } else if state.quarantine_reason.is_some() {
        FinalStatus::Quarantined
    } else {
        FinalStatus::Failed
    }
}

/// Compute the score and emit the terminal artifact and events.
pub async fn score(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Scorer);
    events.thought("scorer", "Computing final score…", step);

    let total_time_secs = round2(state.started_at.elapsed().as_secs_f64());
    let status = final_status(state);
    let passed = status == FinalStatus::Passed;

    // Rolled-back entries are bookkeeping; skipped fixes are still
    // unresolved failures and count against the fix rate.
    let total_failures = state
        .fixes
        .iter()
        .filter(|f| f.status != FixStatus::RolledBack)
        .count() as u32;
    let fixes_applied = state
        .fixes
        .iter()
        .filter(|f| f.status == FixStatus::Applied)
        .count() as u32;

    let breakdown = compute_score(
        &ctx.config.score,
        total_time_secs,
        state.total_commits,
        total_failures,
        fixes_applied,
        passed,
    );

    let results = ResultsJson::from_state(
        state,
        status,
        breakdown,
        total_failures,
        fixes_applied,
        total_time_secs,
    );

    // Write results.json (plus its digest) under the outputs directory.
    let output_dir = ctx.config.outputs_dir.join(&state.run_id);
    std::fs::create_dir_all(&output_dir)?;
    let results_path = output_dir.join("results.json");
    let results_bytes = serde_json::to_vec_pretty(&results)?;
    std::fs::write(&results_path, &results_bytes)?;
    std::fs::write(output_dir.join("results.digest"), artifact_digest(&results_bytes))?;
    info!(run_id = %state.run_id, path = %results_path.display(), "wrote results artifact");

    // Render and store the report. Non-fatal: results.json is the primary
    // artifact.
    let report_url = format!("/outputs/{}/report.pdf", state.run_id);
    match ctx.renderer.render(&results).await {
        Ok(bytes) => {
            if let Err(e) = ctx.journal.store_report(&state.run_id, bytes).await {
                warn!(run_id = %state.run_id, error = %e, "failed to store report");
            } else {
                events.thought("scorer", "Stored run report", step);
            }
        }
        Err(e) => warn!(run_id = %state.run_id, error = %e, "report rendering failed"),
    }

    // Persist the terminal row.
    ctx.journal
        .update_run(
            &state.run_id,
            RunPatch {
                status: status.run_status().as_str().to_string(),
                end_time: Some(Utc::now()),
                total_time_secs: Some(total_time_secs),
                base_score: Some(breakdown.base),
                speed_bonus: Some(breakdown.speed_bonus),
                efficiency_penalty: Some(breakdown.efficiency_penalty),
                final_score: Some(breakdown.total),
                total_failures: Some(total_failures),
                total_fixes: Some(fixes_applied),
                total_commits: Some(state.total_commits),
                total_iterations: Some(state.iteration),
                quarantine_reason: state.quarantine_reason.clone(),
            },
        )
        .await?;

    events.run_complete(status, breakdown, total_time_secs, report_url.clone(), step + 1);
    events.thought(
        "scorer",
        format!(
            "Run complete — {}, score={:.0} (base={:.0} +speed={:.0} -eff={:.0})",
            status.as_str(),
            breakdown.total,
            breakdown.base,
            breakdown.speed_bonus,
            breakdown.efficiency_penalty
        ),
        step + 1,
    );

    ctx.trace(
        state,
        NodeName::Scorer,
        "scoring",
        format!("Final: {} — score {:.0}", status.as_str(), breakdown.total),
        Some(json!({
            "score": breakdown,
            "total_time_secs": total_time_secs,
        })),
        None,
    )
    .await?;

    Ok(StateUpdate {
        score: Some(breakdown),
        total_time_secs: Some(total_time_secs),
        results_path: Some(results_path),
        report_url: Some(report_url),
        status: Some(status.run_status()),
        current_node: Some(NodeName::Scorer),
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScoreConfig {
        ScoreConfig::default()
    }

    #[test]
    fn clean_pass_scores_full_base() {
        let score = compute_score(&config(), 10.0, 0, 0, 0, true);
        assert_eq!(score.base, 100.0);
        // No fixes applied but PASSED: bonus depends only on time.
        assert_eq!(score.speed_bonus, 10.0);
        assert_eq!(score.efficiency_penalty, 0.0);
        assert_eq!(score.total, 110.0);
    }

    #[test]
    fn base_scales_with_fix_rate_on_failure() {
        let score = compute_score(&config(), 400.0, 2, 5, 2, false);
        assert_eq!(score.base, 40.0);
        assert_eq!(score.speed_bonus, 0.0);
        assert_eq!(score.total, 40.0);
    }

    #[test]
    fn speed_bonus_requires_work_when_not_passed() {
        // Fixes applied and fast → bonus.
        let fast = compute_score(&config(), 100.0, 1, 2, 2, false);
        assert_eq!(fast.speed_bonus, 10.0);

        // No fixes applied → no bonus even when fast.
        let idle = compute_score(&config(), 100.0, 0, 2, 0, false);
        assert_eq!(idle.speed_bonus, 0.0);
    }

    #[test]
    fn passed_run_restores_full_base() {
        let score = compute_score(&config(), 100.0, 3, 5, 2, true);
        assert_eq!(score.base, 100.0);
        assert_eq!(score.speed_bonus, 10.0);
        assert_eq!(score.total, 110.0);
    }

    #[test]
    fn efficiency_penalty_kicks_in_past_free_commits() {
        let score = compute_score(&config(), 400.0, 25, 0, 0, false);
        assert_eq!(score.efficiency_penalty, 10.0);
        assert_eq!(score.total, 90.0);

        let under = compute_score(&config(), 400.0, 20, 0, 0, false);
        assert_eq!(under.efficiency_penalty, 0.0);
    }

    #[test]
    fn total_never_goes_negative() {
        let score = compute_score(&config(), 400.0, 100, 10, 0, false);
        assert_eq!(score.base, 0.0);
        assert_eq!(score.efficiency_penalty, 160.0);
        assert_eq!(score.total, 0.0);
    }

    #[test]
    fn artifact_digest_is_stable_hex() {
        let digest = artifact_digest(b"results");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, artifact_digest(b"results"));
        assert_ne!(digest, artifact_digest(b"other"));
    }
}
