use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::error::QuizError;
use crate::extractors::{bad_request, AppJson};
use crate::models::session::{NavigateRequest, SelectAnswerRequest, StartQuizRequest};
use crate::models::Identity;
use crate::services::AppState;

/// POST /api/v1/quiz
///
/// Resumes the current quiz when there is one; otherwise starts a new quiz
/// from `{category_id, difficulty}`. An empty body only resumes.
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: StartQuizRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartQuizRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(bad_request(
                    "invalid_json",
                    format!("Failed to parse JSON request body: {}", e),
                ))
            }
        }
    };

    if let Err(e) = request.validate() {
        let err = QuizError::InvalidParameters(e.to_string());
        state.quiz.notices().raise_error(&err);
        return Err(err.into());
    }

    let outcome = state
        .quiz
        .start_or_resume(identity, request.params())
        .await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

/// GET /api/v1/quiz
pub async fn get_quiz(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.quiz.view().await?))
}

/// POST /api/v1/quiz/answer
pub async fn select_answer(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SelectAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.quiz.select_answer(&req.answer).await?))
}

/// POST /api/v1/quiz/review
pub async fn toggle_review(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.quiz.toggle_review().await?))
}

/// POST /api/v1/quiz/navigate
pub async fn navigate(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<NavigateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.quiz.navigate(&req).await?))
}

/// POST /api/v1/quiz/finish
///
/// Scores the quiz and returns the attempt right away; the remote save for
/// signed-in users continues in the background.
pub async fn finish_quiz(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.quiz.finish().await?;
    Ok(Json(json!({
        "attempt": outcome.attempt,
        "saving": outcome.persistence.is_some()
    })))
}

/// DELETE /api/v1/quiz
pub async fn abandon_quiz(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    if state.quiz.abandon().await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(QuizError::NoActiveSession.into())
    }
}

/// GET /api/v1/quiz/result
pub async fn last_result(State(state): State<Arc<AppState>>) -> Response {
    match state.quiz.last_attempt() {
        Some(attempt) => Json(attempt).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "kind": "no_result",
                "message": "No quiz has been finished yet",
                "status": 404
            })),
        )
            .into_response(),
    }
}
