//! Run-spec validation and healing-branch construction.

use std::sync::OnceLock;

use regex::Regex;

use super::error::{MendError, Result};
use super::run::RunSpec;

/// Iteration budget bounds.
pub const MIN_ITERATIONS: u32 = 1;
pub const MAX_ITERATIONS: u32 = 20;

const NAME_MAX: usize = 120;
const RUN_ID_MAX: usize = 64;

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9_]+_[A-Z0-9_]+_AI_Fix$").unwrap())
}

fn run_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

/// Build the healing branch name `<TEAM>_<LEADER>_AI_Fix`.
///
/// Non-alphanumeric characters are flattened to underscores and the whole
/// name is uppercased.
pub fn healing_branch_name(team_name: &str, leader_name: &str) -> String {
    format!(
        "{}_{}_AI_Fix",
        flatten(team_name),
        flatten(leader_name)
    )
}

fn flatten(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Validate the run-start command before any side effect.
pub fn validate_run_spec(spec: &RunSpec) -> Result<()> {
    if spec.run_id.is_empty() || spec.run_id.len() > RUN_ID_MAX {
        return Err(MendError::InvalidRunSpec(format!(
            "run_id must be 1..={RUN_ID_MAX} chars"
        )));
    }
    if !run_id_re().is_match(&spec.run_id) {
        return Err(MendError::InvalidRunSpec(
            "run_id must be URL-safe ([A-Za-z0-9_-])".to_string(),
        ));
    }
    if spec.repo_url.is_empty() || spec.repo_url.chars().any(char::is_whitespace) {
        return Err(MendError::InvalidRunSpec(
            "repo_url must be a non-empty URL without whitespace".to_string(),
        ));
    }
    for (label, value) in [("team_name", &spec.team_name), ("leader_name", &spec.leader_name)] {
        if value.is_empty() || value.len() > NAME_MAX {
            return Err(MendError::InvalidRunSpec(format!(
                "{label} must be 1..={NAME_MAX} chars"
            )));
        }
    }
    if !branch_re().is_match(&spec.branch_name) {
        return Err(MendError::InvalidRunSpec(format!(
            "branch_name '{}' does not match <TEAM>_<LEADER>_AI_Fix",
            spec.branch_name
        )));
    }
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&spec.max_iterations) {
        return Err(MendError::InvalidRunSpec(format!(
            "max_iterations must be {MIN_ITERATIONS}..={MAX_ITERATIONS}"
        )));
    }
    Ok(())
}
