//! Axum route handlers for the Screening API.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::{MatchResultRow, RunFailureRow, ScreeningRunRow};
use crate::screening::document::{normalize, Document};
use crate::screening::extractor::{extract, StructuredProfile};
use crate::screening::pipeline::{run_pipeline, PipelineConfig, PipelineRun};
use crate::screening::scoring::ScoringWeights;
use crate::state::{ActiveRunGuard, AppState};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// A document as supplied by the caller: plain text plus a kind tag.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub id: String,
    pub kind: String,
    pub text: String,
}

impl From<DocumentInput> for Document {
    fn from(input: DocumentInput) -> Self {
        Document::new(input.id, input.kind, input.text)
    }
}

/// Per-request overrides of the service-level pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    pub concurrency_limit: Option<usize>,
    pub per_call_timeout_secs: Option<u64>,
    pub max_document_length: Option<usize>,
    pub scoring_weights: Option<ScoringWeights>,
}

impl ConfigOverrides {
    pub fn apply(&self, base: &PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            concurrency_limit: self.concurrency_limit.unwrap_or(base.concurrency_limit),
            per_call_timeout: self
                .per_call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.per_call_timeout),
            max_document_length: self
                .max_document_length
                .unwrap_or(base.max_document_length),
            weights: self.scoring_weights.unwrap_or(base.weights),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunScreeningRequest {
    pub job: DocumentInput,
    pub candidates: Vec<DocumentInput>,
    #[serde(default)]
    pub config: ConfigOverrides,
}

#[derive(Debug, Deserialize)]
pub struct ExtractPreviewRequest {
    pub document: DocumentInput,
}

#[derive(Debug, Serialize)]
pub struct ExtractPreviewResponse {
    pub profile: StructuredProfile,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct ScreeningDetailResponse {
    pub run: ScreeningRunRow,
    pub results: Vec<MatchResultRow>,
    pub failures: Vec<RunFailureRow>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/screenings
///
/// Runs the full pipeline for one job against a batch of candidates,
/// persists the finished run, and returns it. The run is registered in
/// `active_runs` for the duration so it can be cancelled mid-flight.
pub async fn handle_run_screening(
    State(state): State<AppState>,
    Json(request): Json<RunScreeningRequest>,
) -> Result<Json<PipelineRun>, AppError> {
    validate_request(&request)?;

    let config = request.config.apply(&state.config.pipeline);
    config
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let run_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    // Guard removes the registry entry on drop, even if axum drops this
    // future because the client disconnected mid-run.
    let _guard = ActiveRunGuard::register(
        Arc::clone(&state.active_runs),
        run_id,
        cancel.clone(),
    )
    .await;

    let job: Document = request.job.into();
    let candidates: Vec<Document> = request.candidates.into_iter().map(Document::from).collect();

    let run = run_pipeline(
        run_id,
        &job,
        candidates,
        &config,
        state.capability.clone(),
        cancel,
    )
    .await?;
    persist_run(&state.db, &run).await?;

    Ok(Json(run))
}

/// POST /api/v1/screenings/extract
///
/// Single-document extraction preview: normalize plus one extraction pass,
/// without scoring or persistence. Useful for inspecting what the model
/// pulls out of a document before running a batch.
pub async fn handle_extract_preview(
    State(state): State<AppState>,
    Json(request): Json<ExtractPreviewRequest>,
) -> Result<Json<ExtractPreviewResponse>, AppError> {
    if request.document.text.trim().is_empty() {
        return Err(AppError::Validation(
            "document text cannot be empty".to_string(),
        ));
    }

    let document: Document = request.document.into();
    let kind = document.document_kind()?;
    let normalized = normalize(&document, state.config.pipeline.max_document_length)?;
    let profile = extract(
        &normalized,
        kind,
        state.capability.as_ref(),
        state.config.pipeline.per_call_timeout,
    )
    .await?;

    Ok(Json(ExtractPreviewResponse {
        profile,
        truncated: normalized.truncated,
    }))
}

/// POST /api/v1/screenings/:id/cancel
///
/// Signals an in-flight run to stop issuing new capability calls. The run
/// finishes with whatever completed and is returned by its original request,
/// tagged partial.
pub async fn handle_cancel_screening(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runs = state.active_runs.read().await;
    match runs.get(&run_id) {
        Some(token) => {
            token.cancel();
            info!(run_id = %run_id, "Cancellation requested");
            Ok(Json(serde_json::json!({
                "id": run_id,
                "status": "cancelling"
            })))
        }
        None => Err(AppError::NotFound(format!(
            "No active screening run {run_id}"
        ))),
    }
}

/// GET /api/v1/screenings/:id
///
/// Returns a persisted run with its ranked results and failures.
pub async fn handle_get_screening(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ScreeningDetailResponse>, AppError> {
    let run = sqlx::query_as::<_, ScreeningRunRow>("SELECT * FROM screening_runs WHERE id = $1")
        .bind(run_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Screening run {run_id} not found")))?;

    let results = sqlx::query_as::<_, MatchResultRow>(
        "SELECT * FROM match_results WHERE run_id = $1 ORDER BY position",
    )
    .bind(run_id)
    .fetch_all(&state.db)
    .await?;

    let failures = sqlx::query_as::<_, RunFailureRow>(
        "SELECT * FROM run_failures WHERE run_id = $1 ORDER BY candidate_id",
    )
    .bind(run_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ScreeningDetailResponse {
        run,
        results,
        failures,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Validation & persistence
// ────────────────────────────────────────────────────────────────────────────

fn validate_request(request: &RunScreeningRequest) -> Result<(), AppError> {
    if request.job.id.trim().is_empty() {
        return Err(AppError::Validation("job id cannot be empty".to_string()));
    }
    if request.job.text.trim().is_empty() {
        return Err(AppError::Validation("job text cannot be empty".to_string()));
    }
    if request.candidates.is_empty() {
        return Err(AppError::Validation(
            "at least one candidate is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for candidate in &request.candidates {
        if candidate.id.trim().is_empty() {
            return Err(AppError::Validation(
                "candidate id cannot be empty".to_string(),
            ));
        }
        if !seen.insert(candidate.id.as_str()) {
            return Err(AppError::Validation(format!(
                "duplicate candidate id: {}",
                candidate.id
            )));
        }
    }

    Ok(())
}

async fn persist_run(pool: &PgPool, run: &PipelineRun) -> Result<(), AppError> {
    let config_value = serde_json::to_value(&run.config)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize config: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO screening_runs (id, job_id, config, partial, result_count, failure_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(run.id)
    .bind(&run.job_id)
    .bind(&config_value)
    .bind(run.partial)
    .bind(run.results.len() as i32)
    .bind(run.failures.len() as i32)
    .bind(run.created_at)
    .execute(pool)
    .await?;

    for (position, result) in run.results.iter().enumerate() {
        let rationale = serde_json::to_value(&result.rationale)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize rationale: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO match_results (id, run_id, candidate_id, score, rationale, low_confidence, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run.id)
        .bind(&result.candidate_id)
        .bind(result.score)
        .bind(&rationale)
        .bind(result.low_confidence)
        .bind(position as i32)
        .execute(pool)
        .await?;
    }

    for failure in &run.failures {
        sqlx::query(
            r#"
            INSERT INTO run_failures (id, run_id, candidate_id, error_kind, detail)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run.id)
        .bind(&failure.candidate_id)
        .bind(&failure.error_kind)
        .bind(&failure.detail)
        .execute(pool)
        .await?;
    }

    info!(
        run_id = %run.id,
        results = run.results.len(),
        failures = run.failures.len(),
        "Persisted screening run"
    );

    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
