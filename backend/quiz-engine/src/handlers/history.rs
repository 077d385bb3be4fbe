use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::ApiError;
use crate::models::Identity;
use crate::services::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// History is only kept for signed-in users.
fn require_user(identity: &Identity) -> Result<&str, (StatusCode, Json<serde_json::Value>)> {
    identity.user_id().ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "kind": "sign_in_required",
                "message": "Sign in to see your quiz history",
                "status": 401
            })),
        )
    })
}

/// GET /api/v1/history?limit=
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = require_user(&identity).map_err(IntoResponse::into_response)?;

    let summaries = state
        .history
        .list_recent_summaries(user_id, query.limit)
        .await
        .map_err(|e| ApiError(e).into_response())?;

    Ok(Json(json!({ "attempts": summaries })))
}

/// GET /api/v1/history/{detail_id}
pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(detail_id): Path<String>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = require_user(&identity).map_err(IntoResponse::into_response)?;

    match state.history.get_detail(user_id, &detail_id).await {
        Ok(Some(attempt)) => Ok(Json(attempt)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "kind": "not_found",
                "message": "Attempt not found",
                "status": 404
            })),
        )
            .into_response()),
        Err(e) => Err(ApiError(e).into_response()),
    }
}
