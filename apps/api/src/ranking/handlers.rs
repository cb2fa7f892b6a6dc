//! Axum route handlers for the ranking pipeline.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::ranking::orchestrator::{PipelineReport, RecomputeReport, RunRequest};
use crate::state::AppState;

/// Upper bound on deal ids accepted by one batch request.
const MAX_BATCH_DEALS: usize = 200;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub deal_ids: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub reports: Vec<PipelineReport>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecomputeRequest {
    #[serde(default)]
    pub candidate_narrative: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/deals/:deal_id/analyze
///
/// Runs the full pipeline. Texts missing from the body are pulled from the deal source.
/// Stage failures are reported in the body (`degraded`/`skipped`), never as HTTP errors.
pub async fn handle_analyze(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<PipelineReport>, AppError> {
    if deal_id.trim().is_empty() {
        return Err(AppError::Validation("deal_id cannot be empty".to_string()));
    }
    let report = state.orchestrator.run(&deal_id, request).await;
    Ok(Json(report))
}

/// POST /api/v1/deals/batch
pub async fn handle_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    if request.deal_ids.is_empty() {
        return Err(AppError::Validation("deal_ids cannot be empty".to_string()));
    }
    if request.deal_ids.len() > MAX_BATCH_DEALS {
        return Err(AppError::Validation(format!(
            "at most {MAX_BATCH_DEALS} deal_ids per batch"
        )));
    }

    let mut deal_ids = request.deal_ids;
    deal_ids.sort();
    deal_ids.dedup();

    let reports = state.orchestrator.run_batch(deal_ids, request.force).await;
    Ok(Json(BatchResponse { reports }))
}

/// POST /api/v1/deals/:deal_id/recompute
///
/// Re-colors the stored attribute set against a narrative. No ranking stage runs.
pub async fn handle_recompute(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Json(request): Json<RecomputeRequest>,
) -> Result<Json<RecomputeReport>, AppError> {
    let report = state
        .orchestrator
        .recompute(&deal_id, request.candidate_narrative)
        .await?;
    Ok(Json(report))
}
