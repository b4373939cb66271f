//! Ranking Pipeline — orchestrates normalization → extraction → scoring across
//! a batch of candidates for one job.
//!
//! Candidates are embarrassingly parallel: each is processed in its own task,
//! bounded by a semaphore so the shared model capability is not hammered past
//! its rate limits. One bad document never aborts the batch — per-candidate
//! errors land in the run's failures list. Final ordering is a pure function
//! of scores and identifiers, independent of task completion order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::llm_client::Capability;
use crate::screening::document::{normalize, Document};
use crate::screening::error::ScreenError;
use crate::screening::extractor::{extract, StructuredProfile};
use crate::screening::scoring::{enrich_rationale, score, MatchResult, ScoringWeights};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables recognized by the pipeline. Snapshotted into every `PipelineRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Max candidate tasks in flight at once.
    pub concurrency_limit: usize,
    /// Timeout applied to each individual capability call.
    pub per_call_timeout: Duration,
    /// Documents longer than this are truncated (flagged, never silent).
    pub max_document_length: usize,
    pub weights: ScoringWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            per_call_timeout: Duration::from_secs(30),
            max_document_length: 20_000,
            weights: ScoringWeights::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency_limit == 0 {
            anyhow::bail!("concurrency_limit must be at least 1");
        }
        if self.per_call_timeout.is_zero() {
            anyhow::bail!("per_call_timeout must be positive");
        }
        if self.max_document_length == 0 {
            anyhow::bail!("max_document_length must be at least 1");
        }
        self.weights.validate()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Run output
// ────────────────────────────────────────────────────────────────────────────

/// A candidate excluded from the result list, with why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub candidate_id: String,
    pub error_kind: String,
    pub detail: String,
}

/// One job screened against a batch of candidates. Results are sorted
/// descending by score, ties broken by candidate id ascending.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub results: Vec<MatchResult>,
    pub failures: Vec<RunFailure>,
    /// True when the run was cancelled before every candidate was processed.
    pub partial: bool,
}

enum CandidateOutcome {
    Scored(MatchResult),
    Failed(RunFailure),
    Skipped,
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Runs the full screening pipeline for one job against `candidates`.
///
/// The job document is normalized and extracted once; job-side failures are
/// fatal. Candidates then fan out concurrently under `concurrency_limit`
/// permits. Cancellation stops issuing new capability calls; in-flight work
/// finishes and whatever completed is returned with `partial = true`.
pub async fn run_pipeline(
    run_id: Uuid,
    job: &Document,
    candidates: Vec<Document>,
    config: &PipelineConfig,
    capability: Arc<dyn Capability>,
    cancel: CancellationToken,
) -> Result<PipelineRun, ScreenError> {
    let created_at = Utc::now();
    info!(
        run_id = %run_id,
        job_id = %job.id,
        candidates = candidates.len(),
        "Starting screening run"
    );

    let job_kind = job.document_kind()?;
    let job_normalized = normalize(job, config.max_document_length)?;
    if job_normalized.truncated {
        warn!(job_id = %job.id, "Job document truncated during normalization");
    }

    if cancel.is_cancelled() {
        warn!(run_id = %run_id, "Run cancelled before extraction started");
        return Ok(PipelineRun {
            id: run_id,
            job_id: job.id.clone(),
            created_at,
            config: config.clone(),
            results: Vec::new(),
            failures: Vec::new(),
            partial: true,
        });
    }

    let job_profile = extract(
        &job_normalized,
        job_kind,
        capability.as_ref(),
        config.per_call_timeout,
    )
    .await?;
    if job_profile.low_confidence {
        warn!(job_id = %job.id, "Job profile extracted with low confidence");
    }
    let job_profile = Arc::new(job_profile);

    let semaphore = Arc::new(Semaphore::new(config.concurrency_limit));
    let mut tasks: JoinSet<CandidateOutcome> = JoinSet::new();
    let mut partial = false;

    for candidate in candidates {
        if cancel.is_cancelled() {
            partial = true;
            break;
        }
        let semaphore = Arc::clone(&semaphore);
        let capability = Arc::clone(&capability);
        let job_profile = Arc::clone(&job_profile);
        let job_id = job.id.clone();
        let cancel = cancel.clone();
        let weights = config.weights;
        let per_call_timeout = config.per_call_timeout;
        let max_document_length = config.max_document_length;

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            if cancel.is_cancelled() {
                return CandidateOutcome::Skipped;
            }
            process_candidate(
                candidate,
                &job_id,
                &job_profile,
                capability.as_ref(),
                &cancel,
                &weights,
                per_call_timeout,
                max_document_length,
            )
            .await
        });
    }

    let mut results = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(CandidateOutcome::Scored(result)) => results.push(result),
            Ok(CandidateOutcome::Failed(failure)) => {
                warn!(
                    candidate_id = %failure.candidate_id,
                    error_kind = %failure.error_kind,
                    "Candidate excluded from run"
                );
                failures.push(failure);
            }
            Ok(CandidateOutcome::Skipped) => partial = true,
            Err(e) => error!("Candidate task panicked: {e}"),
        }
    }

    // `partial` is set only when work was actually skipped; a cancel that
    // lands after every candidate completed leaves the run complete.
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
    failures.sort_by(|a, b| a.candidate_id.cmp(&b.candidate_id));

    info!(
        run_id = %run_id,
        results = results.len(),
        failures = failures.len(),
        partial,
        "Screening run complete"
    );

    Ok(PipelineRun {
        id: run_id,
        job_id: job.id.clone(),
        created_at,
        config: config.clone(),
        results,
        failures,
        partial,
    })
}

/// Processes one candidate end to end. Every error becomes a `RunFailure`
/// for this candidate alone; extraction must complete (possibly degraded to
/// low confidence) before scoring is attempted.
#[allow(clippy::too_many_arguments)]
async fn process_candidate(
    candidate: Document,
    job_id: &str,
    job_profile: &StructuredProfile,
    capability: &dyn Capability,
    cancel: &CancellationToken,
    weights: &ScoringWeights,
    per_call_timeout: Duration,
    max_document_length: usize,
) -> CandidateOutcome {
    let kind = match candidate.document_kind() {
        Ok(kind) => kind,
        Err(e) => return fail(&candidate.id, e),
    };
    let normalized = match normalize(&candidate, max_document_length) {
        Ok(normalized) => normalized,
        Err(e) => return fail(&candidate.id, e),
    };

    if cancel.is_cancelled() {
        return CandidateOutcome::Skipped;
    }

    let profile = match extract(&normalized, kind, capability, per_call_timeout).await {
        Ok(profile) => profile,
        Err(e) => return fail(&candidate.id, e),
    };

    let mut result = score(&candidate.id, job_id, &profile, job_profile, weights);

    if !cancel.is_cancelled() {
        enrich_rationale(&mut result, &profile, job_profile, capability, per_call_timeout).await;
    }

    CandidateOutcome::Scored(result)
}

fn fail(candidate_id: &str, error: ScreenError) -> CandidateOutcome {
    CandidateOutcome::Failed(RunFailure {
        candidate_id: candidate_id.to_string(),
        error_kind: error.kind_str().to_string(),
        detail: error.to_string(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use async_trait::async_trait;

    const JOB_JSON: &str = r#"{"required_skills": ["python", "sql"], "min_years_experience": 3}"#;
    const STRONG_JSON: &str = r#"{"skills": ["python", "sql", "go"], "years_experience": 6}"#;
    const WEAK_JSON: &str = r#"{"skills": ["go"], "years_experience": 1}"#;

    struct Rule {
        needle: &'static str,
        delay_ms: u64,
        reply: Result<&'static str, ()>,
    }

    /// Answers extraction prompts by matching a marker token embedded in the
    /// document text. Rationale prompts carry no marker and fall through to
    /// an error, exercising the degraded-rationale path.
    struct Keyed {
        rules: Vec<Rule>,
    }

    #[async_trait]
    impl Capability for Keyed {
        async fn invoke(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
            for rule in &self.rules {
                if prompt.contains(rule.needle) {
                    if rule.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
                    }
                    return rule
                        .reply
                        .map(str::to_owned)
                        .map_err(|_| LlmError::Api {
                            status: 503,
                            message: "capability down".to_string(),
                        });
                }
            }
            Err(LlmError::Api {
                status: 404,
                message: "no scripted reply".to_string(),
            })
        }
    }

    fn job_doc() -> Document {
        Document::new("job-1", "job_description", "JOBDOC data engineer, python and sql")
    }

    fn candidate_doc(id: &str, marker: &'static str) -> Document {
        Document::new(id, "resume", format!("{marker} resume body"))
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn rule(needle: &'static str, reply: &'static str) -> Rule {
        Rule {
            needle,
            delay_ms: 0,
            reply: Ok(reply),
        }
    }

    #[tokio::test]
    async fn test_run_scores_and_ranks_candidates() {
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                rule("CAND-A", STRONG_JSON),
                rule("CAND-B", WEAK_JSON),
            ],
        });
        let candidates = vec![candidate_doc("a", "CAND-A"), candidate_doc("b", "CAND-B")];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 2);
        assert!(run.failures.is_empty());
        assert!(!run.partial);
        assert_eq!(run.results[0].candidate_id, "a");
        assert!(run.results[0].score > run.results[1].score);
        assert!(run.results.iter().all(|r| r.job_id == "job-1"));
    }

    #[tokio::test]
    async fn test_one_unavailable_candidate_does_not_abort_batch() {
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                rule("CAND-A", STRONG_JSON),
                rule("CAND-B", WEAK_JSON),
                Rule {
                    needle: "CAND-C",
                    delay_ms: 0,
                    reply: Err(()),
                },
            ],
        });
        let candidates = vec![
            candidate_doc("a", "CAND-A"),
            candidate_doc("b", "CAND-B"),
            candidate_doc("c", "CAND-C"),
        ];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 2);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].candidate_id, "c");
        assert_eq!(run.failures[0].error_kind, "extraction_unavailable");
    }

    #[tokio::test]
    async fn test_ordering_is_independent_of_completion_order() {
        // The strong candidate answers slowly; it must still rank first.
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                Rule {
                    needle: "CAND-A",
                    delay_ms: 150,
                    reply: Ok(STRONG_JSON),
                },
                rule("CAND-B", WEAK_JSON),
            ],
        });
        let candidates = vec![candidate_doc("a", "CAND-A"), candidate_doc("b", "CAND-B")];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results[0].candidate_id, "a");
        assert_eq!(run.results[1].candidate_id, "b");
    }

    #[tokio::test]
    async fn test_equal_scores_break_ties_by_candidate_id() {
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                rule("CAND-A", STRONG_JSON),
                rule("CAND-B", STRONG_JSON),
            ],
        });
        // Submitted out of order on purpose.
        let candidates = vec![candidate_doc("b", "CAND-B"), candidate_doc("a", "CAND-A")];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results[0].score, run.results[1].score);
        assert_eq!(run.results[0].candidate_id, "a");
        assert_eq!(run.results[1].candidate_id, "b");
    }

    #[tokio::test]
    async fn test_degraded_extraction_still_produces_a_result() {
        // The candidate's replies never validate; extraction degrades to an
        // empty low-confidence profile, which is scored, not failed.
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                rule("CAND-A", "this is not the JSON you asked for"),
            ],
        });
        let candidates = vec![candidate_doc("a", "CAND-A")];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(run.failures.is_empty());
        assert_eq!(run.results.len(), 1);
        assert!(run.results[0].low_confidence);
        assert!((0.0..=1.0).contains(&run.results[0].score));
    }

    #[tokio::test]
    async fn test_unsupported_candidate_kind_is_recorded_not_fatal() {
        let capability = Arc::new(Keyed {
            rules: vec![rule("JOBDOC", JOB_JSON), rule("CAND-A", STRONG_JSON)],
        });
        let candidates = vec![
            candidate_doc("a", "CAND-A"),
            Document::new("x", "cover_letter", "dear hiring manager"),
        ];

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 1);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].error_kind, "unsupported_format");
    }

    #[tokio::test]
    async fn test_per_candidate_timeout_becomes_a_failure() {
        let capability = Arc::new(Keyed {
            rules: vec![
                rule("JOBDOC", JOB_JSON),
                rule("CAND-A", STRONG_JSON),
                Rule {
                    needle: "CAND-B",
                    delay_ms: 300,
                    reply: Ok(WEAK_JSON),
                },
            ],
        });
        let candidates = vec![candidate_doc("a", "CAND-A"), candidate_doc("b", "CAND-B")];
        let config = PipelineConfig {
            per_call_timeout: Duration::from_millis(80),
            ..PipelineConfig::default()
        };

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config,
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].candidate_id, "a");
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].error_kind, "extraction_unavailable");
    }

    #[tokio::test]
    async fn test_job_side_outage_is_fatal() {
        let capability = Arc::new(Keyed {
            rules: vec![Rule {
                needle: "JOBDOC",
                delay_ms: 0,
                reply: Err(()),
            }],
        });
        let candidates = vec![candidate_doc("a", "CAND-A")];

        let err = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            candidates,
            &config(),
            capability,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind_str(), "extraction_unavailable");
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_partial() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let capability = Arc::new(Keyed { rules: vec![] });

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            vec![candidate_doc("a", "CAND-A")],
            &config(),
            capability,
            cancel,
        )
        .await
        .unwrap();

        assert!(run.partial);
        assert!(run.results.is_empty());
    }

    /// Cancels its own token when the rationale prompt arrives, i.e. after
    /// all extraction work for the batch has finished.
    struct CancelDuringRationale {
        token: CancellationToken,
    }

    #[async_trait]
    impl Capability for CancelDuringRationale {
        async fn invoke(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
            if prompt.contains("JOBDOC") {
                return Ok(JOB_JSON.to_string());
            }
            if prompt.contains("CAND-A") {
                return Ok(STRONG_JSON.to_string());
            }
            self.token.cancel();
            Err(LlmError::Api {
                status: 503,
                message: "capability down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_after_all_candidates_complete_is_not_partial() {
        let cancel = CancellationToken::new();
        let capability = Arc::new(CancelDuringRationale {
            token: cancel.clone(),
        });

        let run = run_pipeline(
            Uuid::new_v4(),
            &job_doc(),
            vec![candidate_doc("a", "CAND-A")],
            &config(),
            capability,
            cancel,
        )
        .await
        .unwrap();

        assert_eq!(run.results.len(), 1);
        assert!(!run.partial, "no candidate was skipped");
    }

    #[test]
    fn test_config_defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let config = PipelineConfig {
            concurrency_limit: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_bad_weights() {
        let config = PipelineConfig {
            weights: ScoringWeights {
                skills: 0.9,
                experience: 0.3,
                education: 0.2,
            },
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
