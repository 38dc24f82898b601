//! Report rendering seam.
//!
//! The actual PDF renderer is an external collaborator; the core hands it
//! the finalized result record and stores whatever bytes come back through
//! the journal.

use async_trait::async_trait;

use crate::domain::{Result, ResultsJson};

/// Renders the terminal report from the finalized result record.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, results: &ResultsJson) -> Result<Vec<u8>>;
}

/// Passthrough renderer: pretty-printed JSON bytes. Stands in where no PDF
/// service is wired up, so the journal still receives a report artifact.
#[derive(Debug, Default)]
pub struct JsonReportRenderer;

#[async_trait]
impl ReportRenderer for JsonReportRenderer {
    async fn render(&self, results: &ResultsJson) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(results)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeatureFlags, FinalStatus, RunSpec, RunState, ScoreBreakdown};

    #[tokio::test]
    async fn json_renderer_round_trips() {
        let spec = RunSpec {
            run_id: "run_1".to_string(),
            repo_url: "https://github.com/org/repo".to_string(),
            team_name: "ACME".to_string(),
            leader_name: "Jordan".to_string(),
            branch_name: "ACME_JORDAN_AI_Fix".to_string(),
            max_iterations: 3,
            feature_flags: FeatureFlags::default(),
        };
        let state = RunState::from_spec(&spec);
        let results = ResultsJson::from_state(
            &state,
            FinalStatus::Passed,
            ScoreBreakdown::default(),
            0,
            0,
            1.0,
        );

        let bytes = JsonReportRenderer.render(&results).await.unwrap();
        let back: ResultsJson = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.run_id, "run_1");
        assert_eq!(back.final_status, FinalStatus::Passed);
    }
}
