//! State machine library (C9): the reusable transition table and
//! precedence/monotonicity rules used by C5, C6, and C7. A pure function,
//! [`next`] — this is the single place the rules from spec §3.3 live; no
//! other component re-implements them.

pub mod outcome;
pub mod replay;
pub mod transitions;

pub use outcome::{ConflictReason, NoopReason, Outcome};
pub use replay::{apply, derive_status};
pub use transitions::next;
