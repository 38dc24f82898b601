//! Live progress events, published per run over a best-effort bus.
//!
//! Events are the ground truth for observers following a run in flight. The
//! journal is the durable record; the bus may drop events when nobody is
//! listening and that is fine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{BugType, CiStatus, FinalStatus, FixStatus, ScoreBreakdown};

const TOPIC_CAPACITY: usize = 256;

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEventKind {
    /// Narration from a node.
    Thought { node: String, message: String },

    /// A fix was applied (or attempted and failed).
    FixApplied {
        file: String,
        bug_type: BugType,
        line: u32,
        status: FixStatus,
        confidence: f64,
        commit_sha: Option<String>,
    },

    /// CI status changed for an iteration.
    CiUpdate {
        iteration: u32,
        status: CiStatus,
        regression: bool,
    },

    /// Periodic resource telemetry.
    TelemetryTick { cpu_pct: f64, mem_mb: f64 },

    /// Terminal event, emitted exactly once per run.
    RunComplete {
        final_status: FinalStatus,
        score: ScoreBreakdown,
        total_time_secs: f64,
        report_url: String,
    },
}

/// One event on a run topic. `step_index` is strictly increasing within a
/// run under the `iteration*10 + node_offset` convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub run_id: String,
    pub step_index: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AgentEventKind,
}

/// Per-run broadcast topics. Cheap to clone via `Arc`.
#[derive(Debug, Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<AgentEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic name for a run, `/run/<run_id>`.
    pub fn topic(run_id: &str) -> String {
        format!("/run/{run_id}")
    }

    /// Subscribe to a run's event stream.
    pub fn subscribe(&self, run_id: &str) -> broadcast::Receiver<AgentEvent> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event. Best-effort: delivery failures are ignored.
    pub fn emit(&self, event: AgentEvent) {
        let sender = {
            let mut topics = self.topics.lock().unwrap();
            topics
                .entry(event.run_id.clone())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
                .clone()
        };
        let _ = sender.send(event);
    }

    /// Drop a run's topic after termination.
    pub fn close(&self, run_id: &str) {
        let mut topics = self.topics.lock().unwrap();
        topics.remove(run_id);
    }
}

/// Handle binding a bus to one run; what nodes use to publish.
#[derive(Clone)]
pub struct RunEvents {
    bus: Arc<EventBus>,
    run_id: String,
}

impl RunEvents {
    pub fn new(bus: Arc<EventBus>, run_id: impl Into<String>) -> Self {
        Self {
            bus,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn emit(&self, step_index: u32, kind: AgentEventKind) {
        self.bus.emit(AgentEvent {
            run_id: self.run_id.clone(),
            step_index,
            timestamp: Utc::now(),
            kind,
        });
    }

    pub fn thought(&self, node: &str, message: impl Into<String>, step_index: u32) {
        self.emit(
            step_index,
            AgentEventKind::Thought {
                node: node.to_string(),
                message: message.into(),
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fix_applied(
        &self,
        file: impl Into<String>,
        bug_type: BugType,
        line: u32,
        status: FixStatus,
        confidence: f64,
        commit_sha: Option<String>,
        step_index: u32,
    ) {
        self.emit(
            step_index,
            AgentEventKind::FixApplied {
                file: file.into(),
                bug_type,
                line,
                status,
                confidence,
                commit_sha,
            },
        );
    }

    pub fn ci_update(&self, iteration: u32, status: CiStatus, regression: bool, step_index: u32) {
        self.emit(
            step_index,
            AgentEventKind::CiUpdate {
                iteration,
                status,
                regression,
            },
        );
    }

    pub fn run_complete(
        &self,
        final_status: FinalStatus,
        score: ScoreBreakdown,
        total_time_secs: f64,
        report_url: impl Into<String>,
        step_index: u32,
    ) {
        self.emit(
            step_index,
            AgentEventKind::RunComplete {
                final_status,
                score,
                total_time_secs,
                report_url: report_url.into(),
            },
        );
    }
}
