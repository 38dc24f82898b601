//! mendd - drive one repair run from the command line.
//!
//! The HTTP gateway normally feeds run-start commands to the orchestrator;
//! this binary is the same entrypoint without the gateway, useful for local
//! operation and smoke testing.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use mend_core::{
    cancellation_pair, healing_branch_name, AgentConfig, AgentContext, EventBus, FeatureFlags,
    GitHubForge, HttpCompletionClient, JsonReportRenderer, Orchestrator, RunSpec,
};
use mend_state::fakes::MemoryJournal;

#[derive(Parser)]
#[command(name = "mendd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous test-repair agent", long_about = None)]
struct Cli {
    /// Emit newline-delimited JSON log lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one repair run against a repository
    Run {
        /// HTTPS URL of the repository to repair
        repo_url: String,

        /// Team name (used to derive the healing branch)
        #[arg(short, long)]
        team: String,

        /// Team leader name (used to derive the healing branch)
        #[arg(short, long)]
        leader: String,

        /// Iteration budget (1-20)
        #[arg(short, long, default_value = "5")]
        max_iterations: u32,

        /// Run identifier; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    mend_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            repo_url,
            team,
            leader,
            max_iterations,
            run_id,
        } => run(repo_url, team, leader, max_iterations, run_id).await,
    }
}

async fn run(
    repo_url: String,
    team: String,
    leader: String,
    max_iterations: u32,
    run_id: Option<String>,
) -> Result<()> {
    let run_id = run_id.unwrap_or_else(|| {
        format!("run_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
    });
    let spec = RunSpec {
        run_id: run_id.clone(),
        repo_url: repo_url.clone(),
        team_name: team.clone(),
        leader_name: leader.clone(),
        branch_name: healing_branch_name(&team, &leader),
        max_iterations,
        feature_flags: FeatureFlags::default(),
    };

    let config = AgentConfig::from_env();
    let forge = GitHubForge::from_repo_url(&repo_url, config.forge_token.clone())
        .context("repository URL must point at a GitHub repository")?;
    let completion: Option<Arc<dyn mend_core::CompletionClient>> =
        HttpCompletionClient::from_env().map(|c| Arc::new(c) as _);
    if completion.is_none() {
        tracing::warn!("no completion keys configured — rule-based fixes only");
    }

    let (cancel_handle, cancel_token) = cancellation_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received — cancelling run");
            cancel_handle.cancel();
        }
    });

    let ctx = AgentContext {
        config,
        journal: Arc::new(MemoryJournal::new()),
        bus: Arc::new(EventBus::new()),
        forge: Arc::new(forge),
        completion,
        renderer: Arc::new(JsonReportRenderer),
        cancel: cancel_token,
    };

    let orchestrator = Orchestrator::new(ctx);
    let state = orchestrator.execute(spec).await?;

    println!("run:        {run_id}");
    println!("status:     {}", state.status.as_str());
    println!("iterations: {}", state.iteration);
    println!("commits:    {}", state.total_commits);
    if let Some(score) = state.score {
        println!(
            "score:      {:.1} (base {:.1}, speed +{:.1}, efficiency -{:.1})",
            score.total, score.base, score.speed_bonus, score.efficiency_penalty
        );
    }
    if let Some(path) = &state.results_path {
        println!("results:    {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_subcommand_parses() {
        let cli = Cli::parse_from([
            "mendd",
            "run",
            "https://github.com/org/repo",
            "--team",
            "ACME",
            "--leader",
            "Jordan",
            "--max-iterations",
            "3",
        ]);
        match cli.command {
            Commands::Run {
                repo_url,
                team,
                leader,
                max_iterations,
                run_id,
            } => {
                assert_eq!(repo_url, "https://github.com/org/repo");
                assert_eq!(team, "ACME");
                assert_eq!(leader, "Jordan");
                assert_eq!(max_iterations, 3);
                assert!(run_id.is_none());
            }
        }
    }
}
