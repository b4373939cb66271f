//! Screening error taxonomy.
//!
//! Modeled as explicit variants rather than a catch-all so downstream code
//! pattern-matches on outcomes: only a capability-wide outage aborts a whole
//! run, everything else is isolated to the document it hit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScreenError {
    /// The document carried an unrecognized kind tag. Rejects that document only.
    #[error("unsupported document kind: {kind}")]
    UnsupportedFormat { kind: String },

    /// The external model capability is unreachable (network/auth/rate limit)
    /// or timed out. Fatal to the run when it hits the job document; a
    /// failures-list entry when it hits a single candidate.
    #[error("extraction capability unavailable: {detail}")]
    ExtractionUnavailable { detail: String },

    /// The model responded but the payload failed schema validation.
    /// Recovered locally: one corrective retry, then a low-confidence empty
    /// profile.
    #[error("model response failed schema validation: {detail}")]
    SchemaMismatch { detail: String },

    /// Rationale enrichment failed. Recovered locally — the deterministic
    /// score stands.
    #[error("rationale generation degraded: {detail}")]
    ScoringDegraded { detail: String },
}

impl ScreenError {
    /// Stable machine-readable kind, used in run failure records and the API.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ScreenError::UnsupportedFormat { .. } => "unsupported_format",
            ScreenError::ExtractionUnavailable { .. } => "extraction_unavailable",
            ScreenError::SchemaMismatch { .. } => "schema_mismatch",
            ScreenError::ScoringDegraded { .. } => "scoring_degraded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_str_is_stable() {
        let err = ScreenError::UnsupportedFormat {
            kind: "cover_letter".to_string(),
        };
        assert_eq!(err.kind_str(), "unsupported_format");

        let err = ScreenError::ExtractionUnavailable {
            detail: "connection refused".to_string(),
        };
        assert_eq!(err.kind_str(), "extraction_unavailable");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ScreenError::SchemaMismatch {
            detail: "missing field `skills`".to_string(),
        };
        assert!(err.to_string().contains("missing field `skills`"));
    }
}
