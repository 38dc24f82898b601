//! Parsed test failures.

use serde::{Deserialize, Serialize};

use super::bug::BugType;

/// Persistence cap for error messages.
pub const ERROR_MESSAGE_MAX: usize = 500;

/// Persistence cap for raw output blocks.
pub const RAW_OUTPUT_MAX: usize = 1000;

/// A single test failure parsed from runner output.
///
/// Created by the analyzer from one runner capture; never mutated after
/// creation. `error_message` and `raw_output` are truncated to their
/// persistence caps at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub file_path: String,
    pub test_name: String,
    pub line_number: u32,
    pub error_message: String,
    pub bug_type: BugType,
    pub raw_output: String,
}

impl TestFailure {
    pub fn new(
        file_path: impl Into<String>,
        test_name: impl Into<String>,
        line_number: u32,
        error_message: impl Into<String>,
        bug_type: BugType,
        raw_output: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            test_name: test_name.into(),
            line_number: line_number.max(1),
            error_message: truncate(error_message.into(), ERROR_MESSAGE_MAX),
            bug_type,
            raw_output: truncate(raw_output.into(), RAW_OUTPUT_MAX),
        }
    }
}

/// Truncate to at most `max` chars on a char boundary.
pub(crate) fn truncate(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_message_and_raw_output() {
        let failure = TestFailure::new(
            "tests/test_x.py",
            "test_a",
            3,
            "e".repeat(600),
            BugType::Logic,
            "r".repeat(1500),
        );
        assert_eq!(failure.error_message.len(), ERROR_MESSAGE_MAX);
        assert_eq!(failure.raw_output.len(), RAW_OUTPUT_MAX);
    }

    #[test]
    fn line_number_floors_at_one() {
        let failure = TestFailure::new("a.py", "t", 0, "boom", BugType::Logic, "");
        assert_eq!(failure.line_number, 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "αβγδε".to_string();
        assert_eq!(truncate(s, 3), "αβγ");
    }
}
