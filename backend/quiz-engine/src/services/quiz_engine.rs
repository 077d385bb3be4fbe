//! Pure quiz state machine.
//!
//! `QuizSession` owns one [`SessionState`] and applies timer ticks and user
//! actions to it synchronously. It never performs I/O; the async driver in
//! `quiz_service` serializes access to it behind a mutex.

use serde::Serialize;

use crate::config::StaleResumePolicy;
use crate::error::QuizError;
use crate::models::session::{QuestionView, SessionView};
use crate::models::{
    AnswerRecord, Attempt, AttemptAnswer, FinishReason, Question, SessionState, SessionStatus,
    Tally,
};
use crate::utils::time::millis_to_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Active,
    Finishing,
    Finished,
}

impl EnginePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnginePhase::Active => "active",
            EnginePhase::Finishing => "finishing",
            EnginePhase::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_seconds: u32 },
    Expired,
    /// The session is no longer counting down.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Continue,
    FinishNow,
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    state: SessionState,
    phase: EnginePhase,
    finish_reason: Option<FinishReason>,
}

impl QuizSession {
    pub fn new(state: SessionState) -> Result<Self, QuizError> {
        state.validate()?;
        if state.status != SessionStatus::Active {
            return Err(QuizError::InvalidAction(
                "cannot run a finished session".to_string(),
            ));
        }

        Ok(Self {
            state,
            phase: EnginePhase::Active,
            finish_reason: None,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == EnginePhase::Active
    }

    fn ensure_active(&self) -> Result<(), QuizError> {
        match self.phase {
            EnginePhase::Active => Ok(()),
            _ => Err(QuizError::InvalidAction(
                "the quiz is no longer running".to_string(),
            )),
        }
    }

    fn current_question(&self) -> Result<&Question, QuizError> {
        self.state
            .questions
            .get(self.state.current_index)
            .ok_or_else(|| QuizError::InvalidAction("the quiz has no questions".to_string()))
    }

    /// One second of countdown, attributed to the question currently shown.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != EnginePhase::Active {
            return TickOutcome::Idle;
        }

        if self.state.time_remaining_seconds > 0 {
            if let Some(record) = self.state.answers.get_mut(self.state.current_index) {
                record.time_spent_seconds = record.time_spent_seconds.saturating_add(1);
            }
            self.state.time_remaining_seconds -= 1;
        }

        if self.state.time_remaining_seconds == 0 {
            self.phase = EnginePhase::Finishing;
            self.finish_reason = Some(FinishReason::TimeExpired);
            TickOutcome::Expired
        } else {
            TickOutcome::Running {
                remaining_seconds: self.state.time_remaining_seconds,
            }
        }
    }

    /// Records `option` for the current question. Returns whether the recorded
    /// answer changed; re-selecting the same option is a no-op.
    pub fn select_answer(&mut self, option: &str) -> Result<bool, QuizError> {
        self.ensure_active()?;
        let question = self.current_question()?;
        if !question.offers(option) {
            return Err(QuizError::InvalidAction(format!(
                "'{}' is not an option for this question",
                option
            )));
        }

        let record = &mut self.state.answers[self.state.current_index];
        if record.selected_answer.as_deref() == Some(option) {
            return Ok(false);
        }
        record.selected_answer = Some(option.to_string());
        Ok(true)
    }

    /// Flips the review mark on the current question and returns the new value.
    pub fn toggle_review(&mut self) -> Result<bool, QuizError> {
        self.ensure_active()?;
        self.current_question()?;
        let record = &mut self.state.answers[self.state.current_index];
        record.marked_for_review = !record.marked_for_review;
        Ok(record.marked_for_review)
    }

    pub fn go_to(&mut self, index: usize) -> Result<usize, QuizError> {
        self.ensure_active()?;
        if index >= self.state.len() {
            return Err(QuizError::InvalidAction(format!(
                "question {} does not exist (quiz has {})",
                index,
                self.state.len()
            )));
        }
        self.state.current_index = index;
        Ok(index)
    }

    /// Moves forward; stays on the last question.
    pub fn next(&mut self) -> Result<usize, QuizError> {
        self.ensure_active()?;
        let last = self.state.len().saturating_sub(1);
        self.state.current_index = (self.state.current_index + 1).min(last);
        Ok(self.state.current_index)
    }

    /// Moves back; stays on the first question.
    pub fn prev(&mut self) -> Result<usize, QuizError> {
        self.ensure_active()?;
        self.state.current_index = self.state.current_index.saturating_sub(1);
        Ok(self.state.current_index)
    }

    /// Moves the session to `Finishing`. Calling it again while finishing is a
    /// no-op and keeps the first reason.
    pub fn request_finish(&mut self, reason: FinishReason) -> Result<(), QuizError> {
        match self.phase {
            EnginePhase::Active => {
                self.phase = EnginePhase::Finishing;
                self.finish_reason = Some(reason);
                Ok(())
            }
            EnginePhase::Finishing => Ok(()),
            EnginePhase::Finished => Err(QuizError::InvalidAction(
                "the quiz has already finished".to_string(),
            )),
        }
    }

    /// State to persist locally; only while the session is still running.
    pub fn snapshot(&self, saved_at_ms: i64) -> Option<SessionState> {
        if self.phase != EnginePhase::Active {
            return None;
        }
        let mut state = self.state.clone();
        state.saved_at_epoch_ms = Some(saved_at_ms);
        Some(state)
    }

    /// Scores the session and builds the immutable attempt. Only valid while
    /// `Finishing`; afterwards the session is `Finished`.
    pub fn complete(
        &mut self,
        attempt_id: String,
        owner: &str,
        finished_at_ms: i64,
    ) -> Result<Attempt, QuizError> {
        if self.phase != EnginePhase::Finishing {
            return Err(QuizError::InvalidAction(format!(
                "cannot complete a session in phase {}",
                self.phase.as_str()
            )));
        }

        let (tally, user_answers) = score_answers(&self.state.questions, &self.state.answers)?;
        let started_at_ms = self.state.started_at_epoch_ms;
        let duration_seconds = (finished_at_ms - started_at_ms).max(0) as u64 / 1000;

        let attempt = Attempt {
            id: attempt_id,
            user_id: owner.to_string(),
            category_id: self.state.category_id,
            category_name: self.state.category_name.clone(),
            difficulty: self.state.difficulty,
            started_at: millis_to_datetime(started_at_ms),
            finished_at: millis_to_datetime(finished_at_ms),
            duration_seconds,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Submitted),
            score: tally.correct,
            percent: tally.percent(),
            correct: tally.correct,
            wrong: tally.wrong,
            unattempted: tally.unattempted,
            total_questions: self.state.len() as u32,
            questions: self.state.questions.clone(),
            user_answers,
        };

        if let Err(e) = attempt.validate() {
            debug_assert!(false, "scored attempt failed validation: {}", e);
            return Err(e);
        }

        self.state.status = SessionStatus::Finished;
        self.phase = EnginePhase::Finished;
        Ok(attempt)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.state.status,
            phase: self.phase.as_str().to_string(),
            category_id: self.state.category_id,
            category_name: self.state.category_name.clone(),
            difficulty: self.state.difficulty,
            current_index: self.state.current_index,
            total_questions: self.state.len(),
            answered: self.state.answered_count(),
            time_remaining_seconds: self.state.time_remaining_seconds,
            total_duration_seconds: self.state.total_duration_seconds,
            questions: self.state.questions.iter().map(QuestionView::from).collect(),
            answers: self.state.answers.clone(),
        }
    }
}

/// Classifies every answer as correct, wrong or unattempted.
pub fn score_answers(
    questions: &[Question],
    answers: &[AnswerRecord],
) -> Result<(Tally, Vec<AttemptAnswer>), QuizError> {
    debug_assert_eq!(
        questions.len(),
        answers.len(),
        "answers must line up with questions"
    );
    if questions.len() != answers.len() {
        return Err(QuizError::Invariant(format!(
            "{} answers for {} questions",
            answers.len(),
            questions.len()
        )));
    }

    let mut tally = Tally::default();
    let scored = questions
        .iter()
        .zip(answers)
        .map(|(question, record)| {
            let is_correct = match record.selected_answer.as_deref() {
                None => {
                    tally.unattempted += 1;
                    false
                }
                Some(answer) if question.is_correct(answer) => {
                    tally.correct += 1;
                    true
                }
                Some(_) => {
                    tally.wrong += 1;
                    false
                }
            };
            AttemptAnswer {
                selected_answer: record.selected_answer.clone(),
                marked_for_review: record.marked_for_review,
                time_spent_seconds: record.time_spent_seconds,
                is_correct,
            }
        })
        .collect();

    Ok((tally, scored))
}

/// Applies the stale-resume policy to a restored snapshot whose countdown may
/// have run out in wall-clock terms while the app was closed.
pub fn apply_stale_resume(
    state: &mut SessionState,
    now_ms: i64,
    policy: StaleResumePolicy,
) -> ResumeDecision {
    let Some(saved_at) = state.saved_at_epoch_ms else {
        return ResumeDecision::Continue;
    };
    let away_seconds = ((now_ms - saved_at).max(0) / 1000) as u64;
    if away_seconds < u64::from(state.time_remaining_seconds) {
        return ResumeDecision::Continue;
    }

    match policy {
        StaleResumePolicy::Resume => ResumeDecision::Continue,
        StaleResumePolicy::AutoFinish => {
            state.time_remaining_seconds = 0;
            ResumeDecision::FinishNow
        }
        StaleResumePolicy::Grace(seconds) => {
            state.time_remaining_seconds = seconds;
            ResumeDecision::Continue
        }
    }
}
