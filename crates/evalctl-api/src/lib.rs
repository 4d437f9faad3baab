//! Submission API (C8, spec §4.9): the only write path into the system.
//! Validates, mints eval ids, enqueues, and gives callers a read-through
//! view of storage while C5's projection catches up.

pub mod error;
pub mod metrics;
pub mod pending;
pub mod routes;
pub mod state;
pub mod types;
pub mod validation;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
