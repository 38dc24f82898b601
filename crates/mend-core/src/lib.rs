//! Mend Core Library
//!
//! The agent orchestration pipeline: repository acquisition, multi-language
//! test execution, failure analysis, fix synthesis, safe commit/push, CI
//! monitoring and scoring, driven by a run-scoped state machine.

pub mod analyzer;
pub mod ci_watcher;
pub mod completion;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod forge;
pub mod git;
pub mod orchestrator;
pub mod publisher;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod scorer;
pub mod synthesizer;
pub mod telemetry;

pub use completion::{CompletionClient, HttpCompletionClient, KeyRotator};
pub use config::{AgentConfig, RunnerConfig, ScoreConfig};
pub use context::{cancellation_pair, AgentContext, CancelHandle, CancelToken};
pub use domain::{
    healing_branch_name, validate_run_spec, BugType, CiRun, CiStatus, FeatureFlags, FinalStatus,
    FixRecord, FixStatus, MendError, NodeName, Result, ResultsJson, RunSpec, RunState, RunStatus,
    ScoreBreakdown, StateUpdate, TestFailure,
};
pub use events::{AgentEvent, AgentEventKind, EventBus, RunEvents};
pub use forge::{Forge, ForgeRun, ForgeRunStatus, GitHubForge, ScriptedForge};
pub use orchestrator::{
    route_after_analyzer, route_after_ci, route_after_publisher, Orchestrator,
};
pub use report::{JsonReportRenderer, ReportRenderer};
pub use telemetry::init_tracing;

/// Mend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
