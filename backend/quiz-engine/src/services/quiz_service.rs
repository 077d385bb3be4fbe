//! Async shell around the [`QuizSession`] state machine.
//!
//! One quiz runs at a time. While it is active a driver task owns the two
//! periodic activities (countdown tick and autosave); user actions go through
//! the same session mutex, so all three are serialized. The session mutex is
//! never held across I/O: autosave copies the state under the lock and writes
//! it from a separate task, and snapshot writes and clears are ordered by
//! their own gate.

use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use uuid::Uuid;

use crate::config::QuizSettings;
use crate::error::{ErrorKind, QuizError};
use crate::metrics::{ANSWERS_SELECTED_TOTAL, AUTOSAVES_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::session::{NavDirection, NavigateRequest, SessionView, StartQuizResponse};
use crate::models::timer::{Autosaved, SessionFinished, TimeExpired, TimerEvent, TimerTick};
use crate::models::{Attempt, FinishReason, Identity, SessionState, SessionStatus, StartParams};
use crate::services::notice::{Notice, NoticeBoard};
use crate::services::question_source::QuestionSource;
use crate::services::quiz_engine::{apply_stale_resume, QuizSession, ResumeDecision, TickOutcome};
use crate::services::result_store::ResultPersistenceService;
use crate::services::snapshot_store::SessionSnapshotStore;
use crate::utils::time::Clock;

const EVENT_BUFFER: usize = 64;

/// Result of a start request.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Running(StartQuizResponse),
    /// A restored snapshot had already run out of time and was scored at once.
    Concluded(Attempt),
}

pub struct FinishOutcome {
    pub attempt: Attempt,
    /// Background save for signed-in users; `None` for guests.
    pub persistence: Option<JoinHandle<Result<String, QuizError>>>,
}

struct ActiveQuiz {
    session: Arc<Mutex<QuizSession>>,
    identity: Identity,
    driver: Option<JoinHandle<()>>,
}

pub struct QuizService {
    source: Arc<dyn QuestionSource>,
    snapshots: Arc<dyn SessionSnapshotStore>,
    results: Arc<ResultPersistenceService>,
    clock: Arc<dyn Clock>,
    settings: QuizSettings,
    notices: NoticeBoard,
    events: broadcast::Sender<TimerEvent>,
    active: Mutex<Option<ActiveQuiz>>,
    /// Serializes start requests so the fetch can run without holding `active`.
    starting: Mutex<()>,
    /// Orders snapshot writes against clears.
    snapshot_gate: Mutex<()>,
    last_attempt: StdMutex<Option<Attempt>>,
}

impl QuizService {
    pub fn new(
        source: Arc<dyn QuestionSource>,
        snapshots: Arc<dyn SessionSnapshotStore>,
        results: Arc<ResultPersistenceService>,
        clock: Arc<dyn Clock>,
        settings: QuizSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            source,
            snapshots,
            results,
            clock,
            settings,
            notices: NoticeBoard::new(),
            events,
            active: Mutex::new(None),
            starting: Mutex::new(()),
            snapshot_gate: Mutex::new(()),
            last_attempt: StdMutex::new(None),
        }
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    /// Most recently finished attempt, for the results view.
    pub fn last_attempt(&self) -> Option<Attempt> {
        self.last_attempt
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn has_active_session(&self) -> bool {
        self.active.lock().await.is_some()
    }

    fn publish(&self, event: TimerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Returns the running quiz, resumes a saved one, or starts a new one from
    /// `params`, in that order. A resumed snapshot never triggers a fetch.
    pub async fn start_or_resume(
        self: &Arc<Self>,
        identity: Identity,
        params: Option<StartParams>,
    ) -> Result<StartOutcome, QuizError> {
        let _starting = self.starting.lock().await;

        if let Some(running) = self.running_response().await {
            return Ok(StartOutcome::Running(running));
        }

        if let Some(state) = self.load_resumable().await {
            return self.resume(identity, state).await;
        }

        let params = params.ok_or(QuizError::SetupRequired)?;

        let fetched = match self.source.fetch(params).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.notices.raise_error(&e);
                return Err(e);
            }
        };
        if let Some(warning) = &fetched.warning {
            self.notices
                .raise(Notice::warning(ErrorKind::InsufficientQuestions, warning.clone()));
        }

        // full configured duration even when fewer questions came back
        let duration = self.settings.durations.for_difficulty(params.difficulty);
        let state = SessionState::new(
            &params,
            fetched.questions,
            duration,
            self.clock.now_ms(),
            fetched.warning,
        );
        let session = QuizSession::new(state)?;

        tracing::info!(
            "Quiz started: category={}, difficulty={}, questions={}, duration={}s, signed_in={}",
            params.category_id,
            params.difficulty,
            session.state().len(),
            duration,
            identity.is_signed_in()
        );

        let response = StartQuizResponse {
            resumed: false,
            warning: session.state().fetch_warning.clone(),
            session: session.view(),
        };
        let activated = self.activate(session, identity);
        *self.active.lock().await = Some(activated);
        SESSIONS_TOTAL.with_label_values(&["started"]).inc();

        Ok(StartOutcome::Running(response))
    }

    async fn running_response(&self) -> Option<StartQuizResponse> {
        let session = self.current_session().await?;
        let session = session.lock().await;
        Some(StartQuizResponse {
            resumed: true,
            warning: session.state().fetch_warning.clone(),
            session: session.view(),
        })
    }

    async fn current_session(&self) -> Option<Arc<Mutex<QuizSession>>> {
        self.active.lock().await.as_ref().map(|a| a.session.clone())
    }

    async fn load_resumable(&self) -> Option<SessionState> {
        let state = match self.snapshots.load().await {
            Ok(Some(state)) => state,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Could not read session snapshot, starting fresh: {}", e);
                return None;
            }
        };

        if state.status != SessionStatus::Active {
            tracing::warn!("Discarding snapshot of a finished session");
            self.clear_snapshot().await;
            return None;
        }
        if let Err(e) = state.validate() {
            tracing::warn!("Discarding inconsistent session snapshot: {}", e);
            self.clear_snapshot().await;
            return None;
        }
        Some(state)
    }

    async fn resume(
        self: &Arc<Self>,
        identity: Identity,
        mut state: SessionState,
    ) -> Result<StartOutcome, QuizError> {
        let decision = apply_stale_resume(&mut state, self.clock.now_ms(), self.settings.stale_resume);
        let mut session = QuizSession::new(state)?;

        tracing::info!(
            "Resuming quiz: category={}, question={}/{}, remaining={}s",
            session.state().category_id,
            session.state().current_index + 1,
            session.state().len(),
            session.state().time_remaining_seconds
        );

        if decision == ResumeDecision::FinishNow {
            session.request_finish(FinishReason::TimeExpired)?;
            let attempt = session.complete(
                Uuid::new_v4().to_string(),
                identity.owner(),
                self.clock.now_ms(),
            )?;
            let outcome = self.conclude(attempt, &identity).await;
            return Ok(StartOutcome::Concluded(outcome.attempt));
        }

        let response = StartQuizResponse {
            resumed: true,
            warning: session.state().fetch_warning.clone(),
            session: session.view(),
        };
        let activated = self.activate(session, identity);
        *self.active.lock().await = Some(activated);
        SESSIONS_TOTAL.with_label_values(&["resumed"]).inc();

        Ok(StartOutcome::Running(response))
    }

    fn activate(self: &Arc<Self>, session: QuizSession, identity: Identity) -> ActiveQuiz {
        let session = Arc::new(Mutex::new(session));
        let driver = tokio::spawn(drive(
            Arc::downgrade(self),
            session.clone(),
            self.clock.clone(),
            self.settings.tick_interval,
            self.settings.autosave_interval,
        ));
        SESSIONS_ACTIVE.inc();

        ActiveQuiz {
            session,
            identity,
            driver: Some(driver),
        }
    }

    async fn with_session<T>(
        &self,
        action: impl FnOnce(&mut QuizSession) -> Result<T, QuizError>,
    ) -> Result<T, QuizError> {
        let session = self
            .current_session()
            .await
            .ok_or(QuizError::NoActiveSession)?;
        let mut guard = session.lock().await;
        action(&mut guard)
    }

    pub async fn view(&self) -> Result<SessionView, QuizError> {
        self.with_session(|s| Ok(s.view())).await
    }

    pub async fn select_answer(&self, option: &str) -> Result<SessionView, QuizError> {
        self.with_session(|s| {
            if s.select_answer(option)? {
                ANSWERS_SELECTED_TOTAL
                    .with_label_values(&[s.state().difficulty.as_str()])
                    .inc();
            }
            Ok(s.view())
        })
        .await
    }

    pub async fn toggle_review(&self) -> Result<SessionView, QuizError> {
        self.with_session(|s| {
            s.toggle_review()?;
            Ok(s.view())
        })
        .await
    }

    pub async fn navigate(&self, request: &NavigateRequest) -> Result<SessionView, QuizError> {
        self.with_session(|s| {
            match (request.index, request.direction) {
                (Some(index), _) => s.go_to(index)?,
                (None, Some(NavDirection::Next)) => s.next()?,
                (None, Some(NavDirection::Prev)) => s.prev()?,
                (None, None) => {
                    return Err(QuizError::InvalidAction(
                        "navigation needs an index or a direction".to_string(),
                    ))
                }
            };
            Ok(s.view())
        })
        .await
    }

    /// Manual submit.
    pub async fn finish(self: &Arc<Self>) -> Result<FinishOutcome, QuizError> {
        self.finish_active(FinishReason::Submitted, true).await
    }

    async fn finish_active(
        self: &Arc<Self>,
        reason: FinishReason,
        stop_driver: bool,
    ) -> Result<FinishOutcome, QuizError> {
        let mut active = self
            .active
            .lock()
            .await
            .take()
            .ok_or(QuizError::NoActiveSession)?;
        SESSIONS_ACTIVE.dec();

        let attempt = {
            let mut session = active.session.lock().await;
            // an expiry that won the race keeps its reason
            session.request_finish(reason)?;
            if let Some(driver) = active.driver.take() {
                if stop_driver {
                    driver.abort();
                }
            }
            session.complete(
                Uuid::new_v4().to_string(),
                active.identity.owner(),
                self.clock.now_ms(),
            )?
        };

        Ok(self.conclude(attempt, &active.identity).await)
    }

    async fn conclude(self: &Arc<Self>, attempt: Attempt, identity: &Identity) -> FinishOutcome {
        self.clear_snapshot().await;

        let reason = match attempt.finish_reason {
            FinishReason::Submitted => "submitted",
            FinishReason::TimeExpired => "time_expired",
        };
        SESSIONS_TOTAL.with_label_values(&[reason]).inc();

        tracing::info!(
            "Quiz finished ({}): {}/{} correct, {:.1}%, {}s",
            reason,
            attempt.correct,
            attempt.total_questions,
            attempt.percent,
            attempt.duration_seconds
        );

        self.publish(TimerEvent::SessionFinished(SessionFinished {
            attempt_id: attempt.id.clone(),
            reason: attempt.finish_reason,
            score: attempt.score,
            percent: attempt.percent,
            timestamp: self.clock.now(),
        }));

        *self.last_attempt.lock().unwrap_or_else(|p| p.into_inner()) = Some(attempt.clone());

        let persistence = identity.user_id().map(|user_id| {
            let service = Arc::clone(self);
            let user_id = user_id.to_string();
            let attempt = attempt.clone();
            tokio::spawn(async move {
                let saved = service.results.save(&user_id, &attempt).await;
                if let Err(e) = &saved {
                    service.notices.raise_error(e);
                }
                saved
            })
        });

        FinishOutcome {
            attempt,
            persistence,
        }
    }

    /// Drops the running quiz without scoring it. Returns whether anything
    /// was discarded.
    pub async fn abandon(&self) -> Result<bool, QuizError> {
        let taken = self.active.lock().await.take();
        let had_session = match taken {
            Some(mut active) => {
                let _session = active.session.lock().await;
                if let Some(driver) = active.driver.take() {
                    driver.abort();
                }
                SESSIONS_ACTIVE.dec();
                SESSIONS_TOTAL.with_label_values(&["abandoned"]).inc();
                true
            }
            None => matches!(self.snapshots.load().await, Ok(Some(_))),
        };

        {
            let _gate = self.snapshot_gate.lock().await;
            self.snapshots.clear().await?;
        }
        if had_session {
            tracing::info!("Quiz abandoned");
        }
        Ok(had_session)
    }

    /// Waits for an in-flight autosave, so the cleared slot stays cleared.
    async fn clear_snapshot(&self) {
        let _gate = self.snapshot_gate.lock().await;
        if let Err(e) = self.snapshots.clear().await {
            tracing::warn!("Failed to clear session snapshot: {}", e);
        }
    }

    async fn autosave(&self, session: &Arc<Mutex<QuizSession>>) {
        // a slow backend skips rounds instead of queueing them
        let Ok(_gate) = self.snapshot_gate.try_lock() else {
            tracing::debug!("Previous autosave still in flight, skipping this round");
            return;
        };

        // finished or abandoned sessions are no longer in the active slot
        let is_current = matches!(
            self.current_session().await,
            Some(current) if Arc::ptr_eq(&current, session)
        );
        if !is_current {
            return;
        }

        let snapshot = session.lock().await.snapshot(self.clock.now_ms());
        let Some(state) = snapshot else {
            return;
        };

        match self.snapshots.save(&state).await {
            Ok(()) => {
                AUTOSAVES_TOTAL.with_label_values(&["success"]).inc();
                self.publish(TimerEvent::Autosaved(Autosaved {
                    answered: state.answered_count(),
                    timestamp: self.clock.now(),
                }));
            }
            Err(e) => {
                AUTOSAVES_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!("Autosave failed: {}", e);
            }
        }
    }

    async fn expire(self: &Arc<Self>) {
        self.publish(TimerEvent::TimeExpired(TimeExpired {
            timestamp: self.clock.now(),
            message: "Time is up. Your answers have been submitted.".to_string(),
        }));

        match self.finish_active(FinishReason::TimeExpired, false).await {
            Ok(_) => {}
            // a manual submit got there first
            Err(QuizError::NoActiveSession) => {}
            Err(e) => tracing::error!("Failed to finish expired quiz: {}", e),
        }
    }
}

async fn drive(
    service: Weak<QuizService>,
    session: Arc<Mutex<QuizSession>>,
    clock: Arc<dyn Clock>,
    tick_every: Duration,
    autosave_every: Duration,
) {
    let mut ticker = interval_at(Instant::now() + tick_every, tick_every);
    let mut autosave = interval_at(Instant::now() + autosave_every, autosave_every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (outcome, tick) = {
                    let mut session = session.lock().await;
                    let outcome = session.tick();
                    let state = session.state();
                    let tick = TimerTick {
                        remaining_seconds: state.time_remaining_seconds,
                        elapsed_seconds: state
                            .total_duration_seconds
                            .saturating_sub(state.time_remaining_seconds),
                        total_seconds: state.total_duration_seconds,
                        current_index: state.current_index,
                        timestamp: clock.now(),
                    };
                    (outcome, tick)
                };
                let Some(service) = service.upgrade() else { return };

                match outcome {
                    TickOutcome::Running { .. } => service.publish(TimerEvent::TimerTick(tick)),
                    TickOutcome::Expired => {
                        service.publish(TimerEvent::TimerTick(tick));
                        service.expire().await;
                        return;
                    }
                    TickOutcome::Idle => return,
                }
            }
            _ = autosave.tick() => {
                let Some(service) = service.upgrade() else { return };
                let session = session.clone();
                // the write runs beside the countdown
                tokio::spawn(async move { service.autosave(&session).await });
            }
        }
    }
}
