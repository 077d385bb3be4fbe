use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::QuizError;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; connect-src 'self'"),
    );
    response
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(extractors::USER_ID_HEADER),
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .merge(quiz_routes())
        .merge(history_routes())
        .route(
            "/api/v1/notice",
            get(handlers::current_notice).delete(handlers::dismiss_notice),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(csp_middleware))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn quiz_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/quiz",
            get(handlers::quiz::get_quiz)
                .post(handlers::quiz::start_quiz)
                .delete(handlers::quiz::abandon_quiz),
        )
        .route("/api/v1/quiz/answer", post(handlers::quiz::select_answer))
        .route("/api/v1/quiz/review", post(handlers::quiz::toggle_review))
        .route("/api/v1/quiz/navigate", post(handlers::quiz::navigate))
        .route("/api/v1/quiz/finish", post(handlers::quiz::finish_quiz))
        .route("/api/v1/quiz/result", get(handlers::quiz::last_result))
        .route("/api/v1/quiz/stream", get(handlers::sse::quiz_stream))
}

fn history_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/history", get(handlers::history::list_history))
        .route("/api/v1/history/{detail_id}", get(handlers::history::get_attempt))
}
