//! Axum route handlers for attribute listing and admin overrides.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::overrides::AttributeOverride;
use crate::overrides::{self, AttributeView, OverrideRequest};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AttributesQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub deleted: u64,
}

/// GET /api/v1/deals/:deal_id/attributes
///
/// Visible merged attributes grouped by pillar, plus the fit summary.
/// `?include_hidden=true` returns hidden rows too (admin listing).
pub async fn handle_get_attributes(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Query(query): Query<AttributesQuery>,
) -> Result<Json<AttributeView>, AppError> {
    let view = overrides::load_view(state.store.as_ref(), &deal_id, query.include_hidden).await?;
    Ok(Json(view))
}

/// PUT /api/v1/deals/:deal_id/overrides
pub async fn handle_put_override(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<AttributeOverride>, AppError> {
    if request.attribute_name.trim().is_empty() {
        return Err(AppError::Validation(
            "attribute_name cannot be empty".to_string(),
        ));
    }
    let saved = overrides::set_override(state.store.as_ref(), &deal_id, request).await?;
    Ok(Json(saved))
}

/// DELETE /api/v1/deals/:deal_id/overrides/:attribute_name
pub async fn handle_delete_override(
    State(state): State<AppState>,
    Path((deal_id, attribute_name)): Path<(String, String)>,
) -> Result<Json<ResetResponse>, AppError> {
    let deleted =
        overrides::reset_override(state.store.as_ref(), &deal_id, &attribute_name).await?;
    Ok(Json(ResetResponse {
        deleted: u64::from(deleted),
    }))
}

/// DELETE /api/v1/deals/:deal_id/overrides
pub async fn handle_delete_overrides(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let deleted = overrides::reset_all(state.store.as_ref(), &deal_id).await?;
    Ok(Json(ResetResponse { deleted }))
}
