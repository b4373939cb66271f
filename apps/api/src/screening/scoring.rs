//! Match/Scoring Engine — deterministic weighted overlap between a candidate
//! profile and a job profile, with optional model-assisted rationale.
//!
//! The score is a pure function of the two profiles and the weights:
//! skills coverage (required skills the candidate has), experience proximity,
//! and a categorical education match. The model-assisted rationale is an
//! enrichment only — it can fail without touching the score.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm_client::Capability;
use crate::screening::error::ScreenError;
use crate::screening::extractor::StructuredProfile;
use crate::screening::prompts::{RATIONALE_SYSTEM, RATIONALE_TEMPLATE};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ────────────────────────────────────────────────────────────────────────────
// Weights
// ────────────────────────────────────────────────────────────────────────────

/// Per-field scoring weights. Must sum to 1.0.
/// Defaults: skills 0.5, experience 0.3, education 0.2.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub skills: f64,
    pub experience: f64,
    pub education: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            skills: 0.5,
            experience: 0.3,
            education: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        if self.skills < 0.0 || self.experience < 0.0 || self.education < 0.0 {
            bail!("scoring weights must be non-negative");
        }
        let sum = self.skills + self.experience + self.education;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("scoring weights must sum to 1.0 (got {sum})");
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Match result
// ────────────────────────────────────────────────────────────────────────────

/// One candidate's fit against one job. Created once per pipeline run and
/// immutable thereafter (the rationale enrichment happens before the run is
/// assembled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate_id: String,
    pub job_id: String,
    /// Weighted fit in [0, 1].
    pub score: f64,
    /// Deterministic per-component breakdown, optionally followed by one
    /// model-generated paragraph.
    pub rationale: Vec<String>,
    /// Carried forward from either profile so ranking can distinguish
    /// degraded extractions without excluding them.
    pub low_confidence: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Deterministic scoring
// ────────────────────────────────────────────────────────────────────────────

/// Computes the deterministic fit score for a candidate against a job.
/// Never calls the capability; safe to run on low-confidence profiles.
pub fn score(
    candidate_id: &str,
    job_id: &str,
    candidate: &StructuredProfile,
    job: &StructuredProfile,
    weights: &ScoringWeights,
) -> MatchResult {
    let (skills, skills_line) = skills_component(candidate, job);
    let (experience, experience_line) = experience_component(candidate, job);
    let (education, education_line) = education_component(candidate, job);

    let total = (weights.skills * skills
        + weights.experience * experience
        + weights.education * education)
        .clamp(0.0, 1.0);

    MatchResult {
        candidate_id: candidate_id.to_string(),
        job_id: job_id.to_string(),
        score: total,
        rationale: vec![skills_line, experience_line, education_line],
        low_confidence: candidate.low_confidence || job.low_confidence,
    }
}

/// Coverage of the job's required skills: |required ∩ candidate| / |required|.
/// Extra candidate skills neither help nor hurt. Case-insensitive.
fn skills_component(candidate: &StructuredProfile, job: &StructuredProfile) -> (f64, String) {
    let required = match job.required_skills() {
        Some(req) if !req.is_empty() => req,
        _ => return (1.0, "skills: no required skills listed".to_string()),
    };

    let have: BTreeSet<String> = candidate
        .skills()
        .map(|s| s.iter().map(|skill| skill.to_lowercase()).collect())
        .unwrap_or_default();

    let missing: Vec<&str> = required
        .iter()
        .filter(|r| !have.contains(&r.to_lowercase()))
        .map(String::as_str)
        .collect();
    let covered = required.len() - missing.len();
    let ratio = covered as f64 / required.len() as f64;

    let line = if missing.is_empty() {
        format!("skills: {covered}/{} required skills covered", required.len())
    } else {
        format!(
            "skills: {covered}/{} required skills covered (missing: {})",
            required.len(),
            missing.join(", ")
        )
    };
    (ratio, line)
}

/// Proximity to the job's minimum years: at-or-above scores 1.0, below scores
/// proportionally. Missing data on either side is neutral.
fn experience_component(candidate: &StructuredProfile, job: &StructuredProfile) -> (f64, String) {
    match (job.min_years_experience(), candidate.years_experience()) {
        (Some(min), Some(years)) => {
            if min <= 0.0 || years >= min {
                (
                    1.0,
                    format!("experience: {years:.1} years meets the {min:.1} year minimum"),
                )
            } else {
                (
                    (years / min).clamp(0.0, 1.0),
                    format!("experience: {years:.1} years against a {min:.1} year minimum"),
                )
            }
        }
        _ => (
            0.5,
            "experience: not stated on both sides — treated as neutral".to_string(),
        ),
    }
}

/// Categorical education match on an ordered ladder. Meets-or-exceeds scores
/// 1.0, one level short scores 0.5, further short scores 0.0. Missing or
/// unrecognized levels are neutral.
fn education_component(candidate: &StructuredProfile, job: &StructuredProfile) -> (f64, String) {
    let required = job.required_education().and_then(education_rank);
    let attained = candidate.education_level().and_then(education_rank);

    match (required, attained) {
        (Some(req), Some(have)) => {
            let required_label = job.required_education().unwrap_or_default();
            let attained_label = candidate.education_level().unwrap_or_default();
            if have >= req {
                (
                    1.0,
                    format!("education: {attained_label} meets required {required_label}"),
                )
            } else if req - have == 1 {
                (
                    0.5,
                    format!("education: {attained_label} is one level below required {required_label}"),
                )
            } else {
                (
                    0.0,
                    format!("education: {attained_label} is below required {required_label}"),
                )
            }
        }
        _ => (
            0.5,
            "education: not comparable — treated as neutral".to_string(),
        ),
    }
}

/// none < high school < associate < bachelor < master < doctorate.
fn education_rank(level: &str) -> Option<u8> {
    let level = level.to_lowercase();
    if level.contains("phd") || level.contains("doctor") {
        Some(5)
    } else if level.contains("master") {
        Some(4)
    } else if level.contains("bachelor") {
        Some(3)
    } else if level.contains("associate") {
        Some(2)
    } else if level.contains("high school") || level.contains("secondary") || level.contains("ged")
    {
        Some(1)
    } else if level.trim() == "none" {
        Some(0)
    } else {
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Model-assisted rationale
// ────────────────────────────────────────────────────────────────────────────

/// Appends one model-generated rationale paragraph to `result`.
///
/// Attempted only when both profiles are non-empty. Any failure (transport,
/// timeout, empty response) is logged as `ScoringDegraded` and leaves the
/// deterministic rationale untouched — never aborts scoring.
pub async fn enrich_rationale(
    result: &mut MatchResult,
    candidate: &StructuredProfile,
    job: &StructuredProfile,
    capability: &dyn Capability,
    per_call_timeout: Duration,
) {
    if candidate.is_empty() || job.is_empty() {
        return;
    }

    let (candidate_json, job_json) = match (
        serde_json::to_string(&candidate.fields),
        serde_json::to_string(&job.fields),
    ) {
        (Ok(c), Ok(j)) => (c, j),
        _ => return,
    };

    let prompt = RATIONALE_TEMPLATE
        .replace("{candidate_json}", &candidate_json)
        .replace("{job_json}", &job_json)
        .replace("{score}", &format!("{:.2}", result.score));

    let detail = match tokio::time::timeout(
        per_call_timeout,
        capability.invoke(&prompt, RATIONALE_SYSTEM),
    )
    .await
    {
        Ok(Ok(text)) => {
            let text = text.trim();
            if text.is_empty() {
                "empty rationale response".to_string()
            } else {
                result.rationale.push(text.to_string());
                return;
            }
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!(
            "rationale call timed out after {}ms",
            per_call_timeout.as_millis()
        ),
    };

    let degraded = ScreenError::ScoringDegraded { detail };
    warn!(candidate_id = %result.candidate_id, "{degraded}");
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
