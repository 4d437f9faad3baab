//! Ambient metric names (SPEC_FULL.md "Supplemented features"). Not a
//! billing surface — plain counter/gauge identifiers that `evalctl-api` and
//! `evalctl-worker` expose as in-process atomics under `/metrics`.

pub const EVALUATIONS_SUBMITTED_TOTAL: &str = "evaluations_submitted_total";
pub const EVALUATIONS_TERMINAL_TOTAL: &str = "evaluations_terminal_total";
