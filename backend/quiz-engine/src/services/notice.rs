use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

use crate::error::{ErrorKind, QuizError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub level: NoticeLevel,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn warning(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            level: NoticeLevel::Warning,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn from_error(error: &QuizError) -> Self {
        let level = match error {
            QuizError::RateLimited | QuizError::Persistence(_) => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        };
        Self {
            kind: error.kind(),
            level,
            message: error.to_string(),
            raised_at: Utc::now(),
        }
    }

    fn is_equivalent(&self, other: &Notice) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// Holds the one notice currently shown to the user.
#[derive(Debug, Default)]
pub struct NoticeBoard {
    current: Mutex<Option<Notice>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows `notice`, replacing the previous one. Returns `false` (and keeps
    /// the existing notice) when an equivalent one is already displayed.
    pub fn raise(&self, notice: Notice) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if current
            .as_ref()
            .is_some_and(|existing| existing.is_equivalent(&notice))
        {
            return false;
        }
        *current = Some(notice);
        true
    }

    pub fn raise_error(&self, error: &QuizError) -> bool {
        if matches!(error, QuizError::Trim(_)) {
            // retention cleanup is never surfaced
            return false;
        }
        self.raise(Notice::from_error(error))
    }

    pub fn current(&self) -> Option<Notice> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn dismiss(&self) -> Option<Notice> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_notice_is_not_raised_twice() {
        let board = NoticeBoard::new();
        assert!(board.raise_error(&QuizError::RateLimited));
        let first = board.current().unwrap();
        assert!(!board.raise_error(&QuizError::RateLimited));
        assert_eq!(board.current().unwrap().raised_at, first.raised_at);
    }

    #[test]
    fn new_kind_replaces_current_notice() {
        let board = NoticeBoard::new();
        board.raise_error(&QuizError::RateLimited);
        assert!(board.raise_error(&QuizError::Network("offline".into())));
        assert_eq!(board.current().unwrap().kind, ErrorKind::NetworkFailure);
    }

    #[test]
    fn trim_failures_stay_silent() {
        let board = NoticeBoard::new();
        assert!(!board.raise_error(&QuizError::Trim("boom".into())));
        assert!(board.current().is_none());
    }

    #[test]
    fn dismiss_clears_the_slot() {
        let board = NoticeBoard::new();
        board.raise(Notice::warning(
            ErrorKind::InsufficientQuestions,
            "Only 10 questions",
        ));
        assert!(board.dismiss().is_some());
        assert!(board.current().is_none());
        assert!(board.raise(Notice::warning(
            ErrorKind::InsufficientQuestions,
            "Only 10 questions",
        )));
    }
}
