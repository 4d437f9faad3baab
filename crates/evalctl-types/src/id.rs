use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, globally-unique identifier for an [`crate::Evaluation`].
///
/// Either client-supplied (validated against [`EvalId::is_valid`]) or
/// server-minted with [`EvalId::generate`]. URL-safe by construction so it
/// can appear directly in a path segment (`GET /evaluations/{id}`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvalId(String);

impl EvalId {
    /// Mint a fresh server-side identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a client-supplied identifier, rejecting anything not URL-safe.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidEvalId> {
        let raw = raw.into();
        if !Self::is_valid(&raw) {
            return Err(InvalidEvalId { value: raw });
        }
        Ok(Self(raw))
    }

    /// `true` for non-empty strings of ASCII alphanumerics, `-`, and `_`,
    /// bounded to a sane length so the id can't be used to smuggle payload.
    pub fn is_valid(raw: &str) -> bool {
        !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EvalId> for String {
    fn from(id: EvalId) -> Self {
        id.0
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid eval_id: {value:?}")]
pub struct InvalidEvalId {
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        let id = EvalId::generate();
        assert!(EvalId::is_valid(id.as_str()));
    }

    #[test]
    fn rejects_empty_and_non_url_safe() {
        assert!(EvalId::parse("").is_err());
        assert!(EvalId::parse("has space").is_err());
        assert!(EvalId::parse("has/slash").is_err());
        assert!(EvalId::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn accepts_client_supplied_id() {
        let id = EvalId::parse("client-eval-001").unwrap();
        assert_eq!(id.as_str(), "client-eval-001");
    }
}
