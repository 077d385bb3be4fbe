use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::error::QuizError;
use crate::metrics;
use crate::services::AppState;

/// JSON error body for every engine failure: `{kind, message, status}`.
pub struct ApiError(pub QuizError);

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            QuizError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            QuizError::InsufficientQuestions => StatusCode::UNPROCESSABLE_ENTITY,
            QuizError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            QuizError::SessionTokenExpired | QuizError::Network(_) => StatusCode::BAD_GATEWAY,
            QuizError::HistoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuizError::NoActiveSession => StatusCode::NOT_FOUND,
            QuizError::SetupRequired => StatusCode::PRECONDITION_REQUIRED,
            QuizError::InvalidAction(_) => StatusCode::CONFLICT,
            QuizError::Persistence(_)
            | QuizError::Trim(_)
            | QuizError::Storage(_)
            | QuizError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }

        let body = json!({
            "kind": self.0.kind(),
            "message": self.0.to_string(),
            "setup_required": self.0.requires_setup(),
            "status": status.as_u16()
        });
        (status, Json(body)).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    if let Some(mongo) = &state.mongo {
        let mongo_health = check_mongodb(mongo).await;
        dependencies.insert("mongodb".to_string(), json!(mongo_health));
        if mongo_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
            all_healthy = false;
            status = "degraded";
        }
    }

    if let Some(redis) = &state.redis {
        let redis_health = check_redis(redis).await;
        dependencies.insert("redis".to_string(), json!(redis_health));
        if redis_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
            all_healthy = false;
            status = "degraded";
        }
    }

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "quiz-engine",
            "version": env!("CARGO_PKG_VERSION"),
            "active_quiz": state.quiz.has_active_session().await,
            "dependencies": dependencies
        })),
    )
}

async fn check_mongodb(mongo: &mongodb::Database) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();

    match tokio::time::timeout(
        std::time::Duration::from_secs(1),
        mongo.run_command(mongodb::bson::doc! { "ping": 1 }),
    )
    .await
    {
        Ok(Ok(_)) => {
            result.insert("status".to_string(), json!("healthy"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("MongoDB error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("MongoDB timeout after 1s"));
        }
    }

    result
}

async fn check_redis(
    redis: &redis::aio::ConnectionManager,
) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();

    let mut conn = redis.clone();
    match tokio::time::timeout(
        std::time::Duration::from_millis(500),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    {
        Ok(Ok(_)) => {
            result.insert("status".to_string(), json!("healthy"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("Redis error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("Redis timeout after 500ms"));
        }
    }

    result
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects `/metrics` with HTTP Basic auth against `METRICS_AUTH`
/// (`username:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// GET /api/v1/notice
pub async fn current_notice(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "notice": state.quiz.notices().current() }))
}

/// DELETE /api/v1/notice
pub async fn dismiss_notice(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.quiz.notices().dismiss();
    StatusCode::NO_CONTENT
}

pub mod history;
pub mod quiz;
pub mod sse;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_to_distinct_statuses() {
        let statuses = [
            ApiError(QuizError::RateLimited).status(),
            ApiError(QuizError::InsufficientQuestions).status(),
            ApiError(QuizError::InvalidParameters("x".into())).status(),
            ApiError(QuizError::Network("x".into())).status(),
        ];
        assert_eq!(statuses[0], StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(statuses[1], StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(statuses[2], StatusCode::BAD_REQUEST);
        assert_eq!(statuses[3], StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_session_is_not_found() {
        assert_eq!(
            ApiError(QuizError::NoActiveSession).status(),
            StatusCode::NOT_FOUND
        );
    }
}
