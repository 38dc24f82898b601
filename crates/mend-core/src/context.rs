//! Shared per-run context handed to every pipeline node, plus the
//! cancellation primitive the orchestrator checks between nodes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use mend_state::{Journal, TraceRow};

use crate::completion::CompletionClient;
use crate::config::AgentConfig;
use crate::domain::{NodeName, Result, RunState};
use crate::events::{EventBus, RunEvents};
use crate::forge::Forge;
use crate::report::ReportRenderer;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Sender half; owned by whoever may cancel the run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half; observed by the orchestrator between nodes and at
/// suspension points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A token that can never fire (for callers without cancellation).
    pub fn never() -> Self {
        cancellation_pair().1
    }
}

/// Create a linked cancel handle/token pair.
pub fn cancellation_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a node needs besides the state record: configuration, the
/// durable journal, the event bus, and the external service clients.
pub struct AgentContext {
    pub config: AgentConfig,
    pub journal: Arc<dyn Journal>,
    pub bus: Arc<EventBus>,
    pub forge: Arc<dyn Forge>,
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub cancel: CancelToken,
}

impl AgentContext {
    /// Event publisher bound to one run.
    pub fn events(&self, run_id: &str) -> RunEvents {
        RunEvents::new(self.bus.clone(), run_id)
    }

    /// Record one execution trace row for a node visit.
    pub async fn trace(
        &self,
        state: &RunState,
        node: NodeName,
        action_type: &str,
        action_label: impl Into<String>,
        payload: Option<serde_json::Value>,
        thought_text: Option<String>,
    ) -> Result<()> {
        self.journal
            .record_trace(TraceRow {
                trace_id: Uuid::new_v4().to_string(),
                run_id: state.run_id.clone(),
                step_index: state.step_index(node),
                agent_node: node.as_str().to_string(),
                action_type: action_type.to_string(),
                action_label: action_label.into(),
                payload,
                thought_text,
                recorded_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_observes_handle() {
        let (handle, token) = cancellation_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn never_token_stays_live() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }
}
