use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::{Difficulty, Question};
use crate::error::QuizError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finished,
}

/// Per-question interaction record, one for every question of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub selected_answer: Option<String>,
    pub marked_for_review: bool,
    pub time_spent_seconds: u32,
}

/// Live state of a quiz run; this is what the snapshot store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub questions: Vec<Question>,
    pub answers: Vec<AnswerRecord>,
    pub current_index: usize,
    pub time_remaining_seconds: u32,
    /// Full configured duration for the difficulty, kept for progress display.
    pub total_duration_seconds: u32,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    pub started_at_epoch_ms: i64,
    /// Wall-clock time of the last snapshot write.
    #[serde(default)]
    pub saved_at_epoch_ms: Option<i64>,
    /// Non-fatal notice produced while acquiring the questions (shortfall).
    #[serde(default)]
    pub fetch_warning: Option<String>,
}

impl SessionState {
    pub fn new(
        params: &StartParams,
        questions: Vec<Question>,
        duration_seconds: u32,
        started_at_epoch_ms: i64,
        fetch_warning: Option<String>,
    ) -> Self {
        let answers = vec![AnswerRecord::default(); questions.len()];
        let category_name = questions
            .first()
            .map(|q| q.category.clone())
            .unwrap_or_else(|| format!("Category {}", params.category_id));

        Self {
            status: SessionStatus::Active,
            questions,
            answers,
            current_index: 0,
            time_remaining_seconds: duration_seconds,
            total_duration_seconds: duration_seconds,
            category_id: params.category_id,
            category_name,
            difficulty: params.difficulty,
            started_at_epoch_ms,
            saved_at_epoch_ms: None,
            fetch_warning,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|a| a.selected_answer.is_some())
            .count()
    }

    /// Structural checks applied to snapshots before they are trusted.
    pub fn validate(&self) -> Result<(), QuizError> {
        if self.answers.len() != self.questions.len() {
            return Err(QuizError::Invariant(format!(
                "{} answers for {} questions",
                self.answers.len(),
                self.questions.len()
            )));
        }
        if !self.questions.is_empty() && self.current_index >= self.questions.len() {
            return Err(QuizError::Invariant(format!(
                "current index {} out of bounds for {} questions",
                self.current_index,
                self.questions.len()
            )));
        }
        Ok(())
    }
}

/// Parameters handed over by the setup screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParams {
    pub category_id: u32,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct StartQuizRequest {
    #[validate(range(min = 1, max = 1000, message = "Category id must be between 1 and 1000"))]
    pub category_id: Option<u32>,
    pub difficulty: Option<Difficulty>,
}

impl StartQuizRequest {
    /// `None` when the request carries no usable start parameters, which only
    /// works if a resumable snapshot exists.
    pub fn params(&self) -> Option<StartParams> {
        self.category_id.map(|category_id| StartParams {
            category_id,
            difficulty: self.difficulty.unwrap_or(Difficulty::Mixed),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StartQuizResponse {
    pub resumed: bool,
    pub warning: Option<String>,
    pub session: SessionView,
}

/// Session as exposed to the front end: the correct answer never leaves the
/// engine while the quiz is running.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub phase: String,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    pub current_index: usize,
    pub total_questions: usize,
    pub answered: usize,
    pub time_remaining_seconds: u32,
    pub total_duration_seconds: u32,
    pub questions: Vec<QuestionView>,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub category: String,
    pub difficulty: Difficulty,
    pub prompt_html: String,
    pub options: Vec<String>,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            category: q.category.clone(),
            difficulty: q.difficulty,
            prompt_html: q.prompt_html.clone(),
            options: q.presented_options.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectAnswerRequest {
    pub answer: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    Next,
    Prev,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub index: Option<usize>,
    pub direction: Option<NavDirection>,
}
