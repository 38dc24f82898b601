//! Domain model for the mend agent: run-scoped state, sub-records,
//! validation, and the error taxonomy.

pub mod bug;
pub mod ci;
pub mod error;
pub mod failure;
pub mod fix;
pub mod results;
pub mod run;
pub mod score;
pub mod validation;

pub use bug::BugType;
pub use ci::{CiRun, CiStatus};
pub use error::{MendError, Result};
pub use failure::TestFailure;
pub use fix::{FixRecord, FixStatus};
pub use results::{PublicFixStatus, ResultCiRow, ResultFixRow, ResultsJson};
pub use run::{
    FeatureFlags, FinalStatus, NodeName, RunSpec, RunState, RunStatus, StateUpdate,
};
pub use score::ScoreBreakdown;
pub use validation::{healing_branch_name, validate_run_spec};
