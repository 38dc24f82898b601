//! Error types for the journal abstraction.

use thiserror::Error;

/// Errors surfaced by journal implementations.
#[derive(Error, Debug)]
pub enum JournalError {
    /// Run not found in the journal
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A run with this id already exists
    #[error("run already exists: {run_id}")]
    DuplicateRun { run_id: String },

    /// Run is terminal and may not accept further writes
    #[error("run {run_id} is {status}, expected an active run")]
    TerminalRun { run_id: String, status: String },

    /// Backend I/O error
    #[error("journal backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Serialization(err.to_string())
    }
}
