use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::question::{Difficulty, Question};
use crate::error::QuizError;

pub const GUEST_USER_ID: &str = "guest";

const PERCENT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Submitted,
    TimeExpired,
}

/// Outcome counts for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub correct: u32,
    pub wrong: u32,
    pub unattempted: u32,
}

impl Tally {
    pub fn total(&self) -> u32 {
        self.correct + self.wrong + self.unattempted
    }

    /// Percentage of correct answers; an empty session scores 0%.
    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            100.0 * f64::from(self.correct) / f64::from(total)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptAnswer {
    pub selected_answer: Option<String>,
    pub marked_for_review: bool,
    pub time_spent_seconds: u32,
    pub is_correct: bool,
}

/// A finished, scored quiz run. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub user_id: String,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub finish_reason: FinishReason,
    pub score: u32,
    pub percent: f64,
    pub correct: u32,
    pub wrong: u32,
    pub unattempted: u32,
    pub total_questions: u32,
    pub questions: Vec<Question>,
    pub user_answers: Vec<AttemptAnswer>,
}

impl Attempt {
    pub fn is_guest(&self) -> bool {
        self.user_id == GUEST_USER_ID
    }

    pub fn tally(&self) -> Tally {
        Tally {
            correct: self.correct,
            wrong: self.wrong,
            unattempted: self.unattempted,
        }
    }

    /// Checks the counting invariants. `total_questions` and the denormalized
    /// question list are stored separately, so both are compared explicitly.
    pub fn validate(&self) -> Result<(), QuizError> {
        let tally = self.tally();
        if tally.total() != self.total_questions {
            return Err(QuizError::Invariant(format!(
                "correct+wrong+unattempted = {} but total_questions = {}",
                tally.total(),
                self.total_questions
            )));
        }
        if self.questions.len() != self.total_questions as usize
            || self.user_answers.len() != self.total_questions as usize
        {
            return Err(QuizError::Invariant(format!(
                "{} questions and {} answers recorded for total_questions = {}",
                self.questions.len(),
                self.user_answers.len(),
                self.total_questions
            )));
        }
        if self.score != self.correct {
            return Err(QuizError::Invariant(format!(
                "score {} differs from correct count {}",
                self.score, self.correct
            )));
        }
        if (self.percent - tally.percent()).abs() > PERCENT_TOLERANCE {
            return Err(QuizError::Invariant(format!(
                "percent {} does not match {}/{}",
                self.percent, self.correct, self.total_questions
            )));
        }
        Ok(())
    }
}

/// History list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub id: String,
    pub detail_id: String,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    pub score: u32,
    pub percent: f64,
    pub total_questions: u32,
    pub finished_at: DateTime<Utc>,
}

/// Stored form of a full attempt (`quiz_attempt_details` collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    #[serde(rename = "startedAt", with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", with = "bson_datetime_as_chrono")]
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub finish_reason: FinishReason,
    pub score: u32,
    pub percent: f64,
    pub correct: u32,
    pub wrong: u32,
    pub unattempted: u32,
    pub total_questions: u32,
    pub questions: Vec<Question>,
    pub user_answers: Vec<AttemptAnswer>,
    /// Write time assigned by the store.
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl DetailDocument {
    pub fn from_attempt(attempt: &Attempt, created_at: DateTime<Utc>) -> Self {
        Self {
            id: attempt.id.clone(),
            user_id: attempt.user_id.clone(),
            category_id: attempt.category_id,
            category_name: attempt.category_name.clone(),
            difficulty: attempt.difficulty,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            duration_seconds: attempt.duration_seconds,
            finish_reason: attempt.finish_reason,
            score: attempt.score,
            percent: attempt.percent,
            correct: attempt.correct,
            wrong: attempt.wrong,
            unattempted: attempt.unattempted,
            total_questions: attempt.total_questions,
            questions: attempt.questions.clone(),
            user_answers: attempt.user_answers.clone(),
            created_at,
        }
    }

    /// Converts back into the domain type, re-checking the invariants so a
    /// hand-edited or truncated document is rejected instead of displayed.
    pub fn into_attempt(self) -> Result<Attempt, QuizError> {
        let attempt = Attempt {
            id: self.id,
            user_id: self.user_id,
            category_id: self.category_id,
            category_name: self.category_name,
            difficulty: self.difficulty,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_seconds: self.duration_seconds,
            finish_reason: self.finish_reason,
            score: self.score,
            percent: self.percent,
            correct: self.correct,
            wrong: self.wrong,
            unattempted: self.unattempted,
            total_questions: self.total_questions,
            questions: self.questions,
            user_answers: self.user_answers,
        };
        attempt.validate()?;
        Ok(attempt)
    }
}

/// Stored form of a history entry (`quiz_attempt_summaries` collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub detail_id: String,
    pub category_id: u32,
    pub category_name: String,
    pub difficulty: Difficulty,
    pub score: u32,
    pub percent: f64,
    pub total_questions: u32,
    #[serde(rename = "finishedAt", with = "bson_datetime_as_chrono")]
    pub finished_at: DateTime<Utc>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl SummaryDocument {
    pub fn from_attempt(
        id: String,
        detail_id: &str,
        attempt: &Attempt,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: attempt.user_id.clone(),
            detail_id: detail_id.to_string(),
            category_id: attempt.category_id,
            category_name: attempt.category_name.clone(),
            difficulty: attempt.difficulty,
            score: attempt.score,
            percent: attempt.percent,
            total_questions: attempt.total_questions,
            finished_at: attempt.finished_at,
            created_at,
        }
    }
}

impl From<SummaryDocument> for AttemptSummary {
    fn from(doc: SummaryDocument) -> Self {
        Self {
            id: doc.id,
            detail_id: doc.detail_id,
            category_id: doc.category_id,
            category_name: doc.category_name,
            difficulty: doc.difficulty,
            score: doc.score,
            percent: doc.percent,
            total_questions: doc.total_questions,
            finished_at: doc.finished_at,
        }
    }
}

// Serde converter for chrono::DateTime <-> mongodb::bson::DateTime
mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(correct: u32, wrong: u32, unattempted: u32) -> Attempt {
        let total = correct + wrong + unattempted;
        let tally = Tally {
            correct,
            wrong,
            unattempted,
        };
        let question = Question {
            category: "General Knowledge".into(),
            difficulty: Difficulty::Easy,
            prompt_html: "?".into(),
            correct_answer: "a".into(),
            distractors: vec!["b".into()],
            presented_options: vec!["b".into(), "a".into()],
        };
        let answer = AttemptAnswer {
            selected_answer: None,
            marked_for_review: false,
            time_spent_seconds: 0,
            is_correct: false,
        };
        Attempt {
            id: "a1".into(),
            user_id: GUEST_USER_ID.into(),
            category_id: 9,
            category_name: "General Knowledge".into(),
            difficulty: Difficulty::Easy,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_seconds: 0,
            finish_reason: FinishReason::Submitted,
            score: correct,
            percent: tally.percent(),
            correct,
            wrong,
            unattempted,
            total_questions: total,
            questions: vec![question; total as usize],
            user_answers: vec![answer; total as usize],
        }
    }

    #[test]
    fn tally_percent_guards_empty_session() {
        assert_eq!(Tally::default().percent(), 0.0);
        let t = Tally {
            correct: 3,
            wrong: 1,
            unattempted: 0,
        };
        assert!((t.percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn consistent_attempt_validates() {
        assert!(attempt(7, 2, 1).validate().is_ok());
        assert!(attempt(7, 2, 1).is_guest());
    }

    #[test]
    fn mismatched_total_is_rejected() {
        let mut a = attempt(5, 5, 0);
        a.total_questions = 11;
        assert!(matches!(a.validate(), Err(QuizError::Invariant(_))));
    }

    #[test]
    fn wrong_percent_is_rejected() {
        let mut a = attempt(5, 5, 0);
        a.percent = 40.0;
        assert!(a.validate().is_err());
    }

    #[test]
    fn detail_document_round_trips_to_attempt() {
        let a = attempt(1, 1, 1);
        let doc = DetailDocument::from_attempt(&a, Utc::now());
        assert_eq!(doc.into_attempt().unwrap(), a);
    }
}
