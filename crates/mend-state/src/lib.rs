//! Mend-State: journal abstractions for the mend agent
//!
//! The journal is the durable sink for runs, fixes, CI events, execution
//! traces and the rendered report. This crate defines the backend-agnostic
//! trait plus the row types, and ships an in-memory fake for tests. The
//! relational backend lives outside the core and implements [`Journal`]
//! against the same contract.

pub mod error;
pub mod fakes;
pub mod journal;

pub use error::JournalError;
pub use journal::{
    is_terminal_status, CiEventRow, FixRow, Journal, JournalResult, RunPatch, RunRow, TraceRow,
};

/// Result type for mend-state operations
pub type Result<T> = std::result::Result<T, JournalError>;
