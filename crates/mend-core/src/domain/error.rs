//! Domain-level error taxonomy for the mend agent.

/// Mend domain errors.
#[derive(Debug, thiserror::Error)]
pub enum MendError {
    #[error("invalid run spec: {0}")]
    InvalidRunSpec(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("forge error: {0}")]
    Forge(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("no completion provider configured")]
    CompletionUnconfigured,

    #[error("run cancelled")]
    Cancelled,

    #[error("recursion limit exceeded after {0} node visits")]
    RecursionLimit(u32),

    #[error("journal error: {0}")]
    Journal(#[from] mend_state::JournalError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mend domain operations.
pub type Result<T> = std::result::Result<T, MendError>;
