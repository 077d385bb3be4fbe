use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy of the quiz engine.
///
/// Every variant maps onto a distinct [`ErrorKind`] so the front end can show a
/// dedicated message instead of one generic failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("The trivia service is receiving too many requests. Wait a few seconds and try again.")]
    RateLimited,

    #[error("Not enough questions are available for this category and difficulty. Try another combination.")]
    InsufficientQuestions,

    #[error("Invalid quiz parameters: {0}")]
    InvalidParameters(String),

    #[error("The trivia session token has expired. Restart the quiz.")]
    SessionTokenExpired,

    #[error("Could not reach the trivia service: {0}")]
    Network(String),

    #[error("Your result could not be saved: {0}")]
    Persistence(String),

    #[error("Failed to trim quiz history: {0}")]
    Trim(String),

    #[error("Quiz history is unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("No quiz is in progress")]
    NoActiveSession,

    #[error("Choose a category and difficulty to start a quiz")]
    SetupRequired,

    #[error("{0}")]
    InvalidAction(String),

    #[error("Session snapshot storage failed: {0}")]
    Storage(String),

    #[error("Session invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    InsufficientQuestions,
    InvalidParameters,
    SessionTokenExpired,
    NetworkFailure,
    PersistenceFailure,
    TrimFailure,
    HistoryUnavailable,
    NoActiveSession,
    SetupRequired,
    InvalidAction,
    StorageFailure,
    InvariantViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InsufficientQuestions => "insufficient_questions",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::SessionTokenExpired => "session_token_expired",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::TrimFailure => "trim_failure",
            ErrorKind::HistoryUnavailable => "history_unavailable",
            ErrorKind::NoActiveSession => "no_active_session",
            ErrorKind::SetupRequired => "setup_required",
            ErrorKind::InvalidAction => "invalid_action",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::InvariantViolation => "invariant_violation",
        }
    }
}

impl QuizError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuizError::RateLimited => ErrorKind::RateLimited,
            QuizError::InsufficientQuestions => ErrorKind::InsufficientQuestions,
            QuizError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            QuizError::SessionTokenExpired => ErrorKind::SessionTokenExpired,
            QuizError::Network(_) => ErrorKind::NetworkFailure,
            QuizError::Persistence(_) => ErrorKind::PersistenceFailure,
            QuizError::Trim(_) => ErrorKind::TrimFailure,
            QuizError::HistoryUnavailable(_) => ErrorKind::HistoryUnavailable,
            QuizError::NoActiveSession => ErrorKind::NoActiveSession,
            QuizError::SetupRequired => ErrorKind::SetupRequired,
            QuizError::InvalidAction(_) => ErrorKind::InvalidAction,
            QuizError::Storage(_) => ErrorKind::StorageFailure,
            QuizError::Invariant(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Errors raised while acquiring questions. These are the ones the engine
    /// translates into a user-facing notice at its boundary.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            QuizError::RateLimited
                | QuizError::InsufficientQuestions
                | QuizError::InvalidParameters(_)
                | QuizError::SessionTokenExpired
                | QuizError::Network(_)
        )
    }

    /// Whether the user should be sent back to quiz setup.
    pub fn requires_setup(&self) -> bool {
        matches!(
            self,
            QuizError::InvalidParameters(_)
                | QuizError::InsufficientQuestions
                | QuizError::SetupRequired
        )
    }
}
