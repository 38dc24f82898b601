//! Agent configuration resolved from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable carrying comma-separated primary completion keys.
pub const ENV_COMPLETION_KEYS: &str = "MEND_COMPLETION_KEYS";

/// Environment variable carrying the single fallback-provider key.
pub const ENV_FALLBACK_KEY: &str = "MEND_FALLBACK_KEY";

/// Environment variable carrying the forge (git remote + CI) token.
pub const ENV_FORGE_TOKEN: &str = "MEND_FORGE_TOKEN";

const ENV_REPOS_DIR: &str = "MEND_REPOS_DIR";
const ENV_OUTPUTS_DIR: &str = "MEND_OUTPUTS_DIR";

/// Scoring constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreConfig {
    /// Starting base score.
    pub base: f64,

    /// Bonus awarded for finishing under the speed threshold.
    pub speed_bonus: f64,

    /// Wall-clock threshold for the speed bonus, in seconds.
    pub speed_threshold_secs: f64,

    /// Penalty per commit beyond the free allowance.
    pub penalty_per_commit: f64,

    /// Commits that carry no penalty.
    pub free_commits: u32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            base: 100.0,
            speed_bonus: 10.0,
            speed_threshold_secs: 300.0,
            penalty_per_commit: 2.0,
            free_commits: 20,
        }
    }
}

/// Runner knobs. `command_override` replaces the framework command table
/// for hermetic tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    pub command_override: Option<Vec<String>>,
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Per-run working copies live under `<repos_dir>/<run_id>`.
    pub repos_dir: PathBuf,

    /// Result artifacts land under `<outputs_dir>/<run_id>`.
    pub outputs_dir: PathBuf,

    /// Hard wall clock for one test invocation, in seconds.
    pub test_timeout_secs: u64,

    /// Hard wall clock for one dependency-install step, in seconds.
    pub install_timeout_secs: u64,

    /// Total CI polling budget per iteration, in seconds.
    pub ci_poll_timeout_secs: u64,

    /// Delay between CI polls, in seconds.
    pub ci_poll_interval_secs: u64,

    /// Token injected into HTTPS remotes for pushes and sent to the forge API.
    pub forge_token: Option<String>,

    /// Commit identity configured repo-locally before committing.
    pub git_user_name: String,
    pub git_user_email: String,

    pub score: ScoreConfig,
    pub runner: RunnerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from("/tmp/mend/repos"),
            outputs_dir: PathBuf::from("/tmp/mend/outputs"),
            test_timeout_secs: 120,
            install_timeout_secs: 180,
            ci_poll_timeout_secs: 300,
            ci_poll_interval_secs: 10,
            forge_token: None,
            git_user_name: "Mend Agent".to_string(),
            git_user_email: "mend-agent@noreply.github.com".to_string(),
            score: ScoreConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Resolve directories and the forge token from the environment,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(ENV_REPOS_DIR) {
            if !dir.is_empty() {
                config.repos_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var(ENV_OUTPUTS_DIR) {
            if !dir.is_empty() {
                config.outputs_dir = PathBuf::from(dir);
            }
        }
        if let Ok(token) = std::env::var(ENV_FORGE_TOKEN) {
            if !token.is_empty() {
                config.forge_token = Some(token);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_budgets() {
        let config = AgentConfig::default();
        assert_eq!(config.test_timeout_secs, 120);
        assert_eq!(config.install_timeout_secs, 180);
        assert_eq!(config.score.speed_threshold_secs, 300.0);
        assert_eq!(config.score.free_commits, 20);
        assert!(config.runner.command_override.is_none());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = AgentConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: AgentConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }
}
