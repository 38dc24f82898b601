//! The six canonical bug classes used by classification and scoring.

use serde::{Deserialize, Serialize};

/// Canonical bug taxonomy. Every parsed failure is assigned exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugType {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
}

impl BugType {
    /// Persistence/wire spelling (`TYPE_ERROR`, `IMPORT`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            BugType::Linting => "LINTING",
            BugType::Syntax => "SYNTAX",
            BugType::Logic => "LOGIC",
            BugType::TypeError => "TYPE_ERROR",
            BugType::Import => "IMPORT",
            BugType::Indentation => "INDENTATION",
        }
    }
}

impl std::fmt::Display for BugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&BugType::TypeError).unwrap(),
            "\"TYPE_ERROR\""
        );
        assert_eq!(
            serde_json::from_str::<BugType>("\"INDENTATION\"").unwrap(),
            BugType::Indentation
        );
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(BugType::Import.to_string(), "IMPORT");
        assert_eq!(BugType::Linting.to_string(), "LINTING");
    }
}
