//! Final score breakdown, assigned exactly once by the scorer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub speed_bonus: f64,
    pub efficiency_penalty: f64,
    pub total: f64,
}

impl Default for ScoreBreakdown {
    fn default() -> Self {
        Self {
            base: 100.0,
            speed_bonus: 0.0,
            efficiency_penalty: 0.0,
            total: 100.0,
        }
    }
}
