//! Fix records: one per failure handled, whether or not a patch landed.

use serde::{Deserialize, Serialize};

use super::bug::BugType;

/// Lifecycle status of a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Applied,
    Failed,
    RolledBack,
    Skipped,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Applied => "applied",
            FixStatus::Failed => "failed",
            FixStatus::RolledBack => "rolled_back",
            FixStatus::Skipped => "skipped",
        }
    }
}

/// A fix applied (or attempted) for a single failure.
///
/// Created by the synthesizer; the publisher backfills `commit_sha` and
/// `commit_message`; the CI watcher may flip the status to `RolledBack`
/// when a regression is detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub file_path: String,
    pub bug_type: BugType,
    pub line_number: u32,
    pub description: String,
    pub fix_description: String,
    pub original_code: String,
    pub fixed_code: String,
    pub status: FixStatus,
    pub commit_sha: Option<String>,
    pub commit_message: String,
    pub confidence: f64,
    pub model_used: String,
}

impl FixRecord {
    /// A pending record for a fix that did not produce a patch.
    pub fn unpatched(
        file_path: impl Into<String>,
        bug_type: BugType,
        line_number: u32,
        description: impl Into<String>,
        fix_description: impl Into<String>,
        status: FixStatus,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            bug_type,
            line_number,
            description: description.into(),
            fix_description: fix_description.into(),
            original_code: String::new(),
            fixed_code: String::new(),
            status,
            commit_sha: None,
            commit_message: String::new(),
            confidence: 0.0,
            model_used: "rule-based".to_string(),
        }
    }

    /// Whether this fix is waiting for the publisher (applied, no SHA yet).
    pub fn pending_commit(&self) -> bool {
        self.status == FixStatus::Applied && self.commit_sha.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FixStatus::RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }

    #[test]
    fn pending_commit_requires_applied_without_sha() {
        let mut fix = FixRecord::unpatched(
            "a.py",
            BugType::Syntax,
            4,
            "SyntaxError",
            "added colon",
            FixStatus::Applied,
        );
        assert!(fix.pending_commit());

        fix.commit_sha = Some("abc1234".to_string());
        assert!(!fix.pending_commit());

        fix.commit_sha = None;
        fix.status = FixStatus::Failed;
        assert!(!fix.pending_commit());
    }
}
