use std::time::Duration;

use quiz_engine::config::StaleResumePolicy;
use quiz_engine::error::{ErrorKind, QuizError};
use quiz_engine::models::session::{NavDirection, NavigateRequest};
use quiz_engine::models::timer::TimerEvent;
use quiz_engine::models::{Difficulty, FinishReason, Identity, StartParams};
use quiz_engine::services::quiz_service::StartOutcome;
use quiz_engine::utils::time::millis_to_datetime;

mod common;
use common::{code, success, test_settings, TestEngine, START_MS};

fn params(difficulty: Difficulty) -> Option<StartParams> {
    Some(StartParams {
        category_id: 18,
        difficulty,
    })
}

fn running(outcome: StartOutcome) -> quiz_engine::models::session::StartQuizResponse {
    match outcome {
        StartOutcome::Running(response) => response,
        StartOutcome::Concluded(attempt) => panic!("quiz concluded unexpectedly: {:?}", attempt),
    }
}

fn go(index: usize) -> NavigateRequest {
    NavigateRequest {
        index: Some(index),
        direction: None,
    }
}

#[tokio::test]
async fn new_quiz_uses_difficulty_duration_and_aligned_answers() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(25));

    let started = running(
        engine
            .quiz
            .start_or_resume(Identity::Guest, params(Difficulty::Hard))
            .await
            .unwrap(),
    );

    assert!(!started.resumed);
    assert!(started.warning.is_none());
    assert_eq!(started.session.total_questions, 25);
    assert_eq!(started.session.answers.len(), started.session.questions.len());
    assert_eq!(started.session.time_remaining_seconds, 1800);
    assert_eq!(started.session.category_name, "Science: Computers");
    assert_eq!(engine.api.queries()[0].difficulty, Some(Difficulty::Hard));
    // no snapshot is written before the first autosave
    assert_eq!(engine.snapshots.save_count(), 0);
}

#[tokio::test]
async fn start_without_params_or_snapshot_needs_setup() {
    let engine = TestEngine::new(test_settings());

    let err = engine
        .quiz
        .start_or_resume(Identity::Guest, None)
        .await
        .unwrap_err();

    assert_eq!(err, QuizError::SetupRequired);
    assert!(err.requires_setup());
    assert_eq!(engine.api.calls(), 0);
}

#[tokio::test]
async fn second_start_returns_the_running_quiz() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(25));

    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();
    let again = running(
        engine
            .quiz
            .start_or_resume(Identity::Guest, params(Difficulty::Hard))
            .await
            .unwrap(),
    );

    assert!(again.resumed);
    assert_eq!(again.session.difficulty, Difficulty::Easy);
    assert_eq!(engine.api.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_restores_saved_state_without_refetching() {
    let settings = test_settings();
    let first = TestEngine::new(settings.clone());
    first.api.push(success(25));

    first
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Medium))
        .await
        .unwrap();
    first.quiz.select_answer("right0").await.unwrap();
    first.quiz.navigate(&go(3)).await.unwrap();
    first.quiz.toggle_review().await.unwrap();
    first.quiz.select_answer("wrong3a").await.unwrap();

    // past the first autosave
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    let saved = first.saved_state().await;
    assert_eq!(saved.current_index, 3);
    assert!(saved.time_remaining_seconds < 1500);

    let snapshots = first.snapshots.clone();
    drop(first);

    let second = TestEngine::with_snapshots(settings, snapshots);
    let resumed = running(
        second
            .quiz
            .start_or_resume(Identity::Guest, None)
            .await
            .unwrap(),
    );

    assert!(resumed.resumed);
    assert_eq!(second.api.calls(), 0);
    assert_eq!(resumed.session.current_index, saved.current_index);
    assert_eq!(
        resumed.session.time_remaining_seconds,
        saved.time_remaining_seconds
    );
    assert_eq!(resumed.session.answers, saved.answers);
    assert_eq!(
        resumed.session.answers[0].selected_answer.as_deref(),
        Some("right0")
    );
    assert!(resumed.session.answers[3].marked_for_review);

    // option order is kept, never reshuffled
    let presented: Vec<Vec<String>> = saved
        .questions
        .iter()
        .map(|q| q.presented_options.clone())
        .collect();
    let shown: Vec<Vec<String>> = resumed
        .session
        .questions
        .iter()
        .map(|q| q.options.clone())
        .collect();
    assert_eq!(presented, shown);
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_is_scored_under_auto_finish_policy() {
    let first = TestEngine::new(test_settings());
    first.api.push(success(25));
    first
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();
    first.quiz.select_answer("right0").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    let snapshots = first.snapshots.clone();
    drop(first);

    let mut settings = test_settings();
    settings.stale_resume = StaleResumePolicy::AutoFinish;
    let second = TestEngine::with_snapshots(settings, snapshots);
    second.clock.advance_secs(2 * 24 * 3600);

    let outcome = second
        .quiz
        .start_or_resume(Identity::Guest, None)
        .await
        .unwrap();

    match outcome {
        StartOutcome::Concluded(attempt) => {
            assert_eq!(attempt.finish_reason, FinishReason::TimeExpired);
            assert_eq!(attempt.correct, 1);
            assert_eq!(attempt.unattempted, 24);
        }
        StartOutcome::Running(_) => panic!("stale quiz should have been scored"),
    }
    assert!(second.snapshots.is_empty());
    assert!(!second.quiz.has_active_session().await);
}

#[tokio::test(start_paused = true)]
async fn ten_idle_seconds_are_charged_to_the_current_question() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(25));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();
    engine.quiz.navigate(&go(4)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let view = engine.quiz.view().await.unwrap();
    assert_eq!(view.time_remaining_seconds, 1200 - 10);
    assert_eq!(view.answers[4].time_spent_seconds, 10);
    let elsewhere: u32 = view
        .answers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 4)
        .map(|(_, a)| a.time_spent_seconds)
        .sum();
    assert_eq!(elsewhere, 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_automatically_within_one_tick() {
    let mut settings = test_settings();
    settings.durations.easy_seconds = 1;
    let engine = TestEngine::new(settings);
    engine.api.push(success(3));
    let mut events = engine.quiz.subscribe();

    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let attempt = engine.quiz.last_attempt().expect("quiz should be scored");
    assert_eq!(attempt.finish_reason, FinishReason::TimeExpired);
    assert_eq!(attempt.unattempted, 3);
    assert_eq!(attempt.correct + attempt.wrong + attempt.unattempted, 3);
    assert!(!engine.quiz.has_active_session().await);
    assert!(engine.snapshots.is_empty());

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.event_name());
    }
    assert!(names.contains(&"time-expired"));
    assert_eq!(names.last(), Some(&"session-finished"));
}

#[tokio::test]
async fn guest_attempt_is_scored_but_never_stored() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(25));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    engine.quiz.select_answer("right0").await.unwrap();
    engine
        .quiz
        .navigate(&NavigateRequest {
            index: None,
            direction: Some(NavDirection::Next),
        })
        .await
        .unwrap();
    engine.quiz.select_answer("wrong1b").await.unwrap();

    let outcome = engine.quiz.finish().await.unwrap();

    assert!(outcome.persistence.is_none());
    assert_eq!(outcome.attempt.user_id, "guest");
    assert_eq!(outcome.attempt.correct, 1);
    assert_eq!(outcome.attempt.wrong, 1);
    assert_eq!(outcome.attempt.unattempted, 23);
    assert!((outcome.attempt.percent - 4.0).abs() < 1e-9);
    assert!(outcome.attempt.validate().is_ok());
    assert_eq!(engine.attempts.write_calls(), 0);
    assert_eq!(engine.snapshots.clear_count(), 1);
}

#[tokio::test]
async fn reselecting_an_answer_is_a_no_op() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(5));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    let first = engine.quiz.select_answer("right0").await.unwrap();
    let second = engine.quiz.select_answer("right0").await.unwrap();

    assert_eq!(first.answers, second.answers);
    assert_eq!(second.answered, 1);
}

#[tokio::test]
async fn actions_after_finish_are_rejected() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(5));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();
    engine.quiz.finish().await.unwrap();

    assert_eq!(
        engine.quiz.select_answer("right0").await.unwrap_err(),
        QuizError::NoActiveSession
    );
    assert_eq!(
        engine.quiz.finish().await.err().map(|e| e.kind()),
        Some(ErrorKind::NoActiveSession)
    );
}

#[tokio::test]
async fn shortfall_proceeds_with_fewer_questions_and_a_warning() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(code(1));
    engine.api.push(success(10));

    let started = running(
        engine
            .quiz
            .start_or_resume(Identity::Guest, params(Difficulty::Medium))
            .await
            .unwrap(),
    );

    assert_eq!(started.session.total_questions, 10);
    assert_eq!(started.session.answers.len(), 10);
    assert_eq!(started.session.time_remaining_seconds, 1500);
    let warning = started.warning.expect("shortfall warning");
    assert!(warning.contains("10"));

    let amounts: Vec<u32> = engine.api.queries().iter().map(|q| q.amount).collect();
    assert_eq!(amounts, vec![25, 10]);

    let notice = engine.quiz.notices().current().expect("notice raised");
    assert_eq!(notice.kind, ErrorKind::InsufficientQuestions);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_budget_exhaustion_creates_no_session() {
    let engine = TestEngine::new(test_settings());
    for _ in 0..3 {
        engine.api.push(code(5));
    }

    let err = engine
        .quiz
        .start_or_resume(Identity::User("u1".into()), params(Difficulty::Easy))
        .await
        .unwrap_err();

    assert_eq!(err, QuizError::RateLimited);
    assert_eq!(engine.api.calls(), 3);
    assert!(!engine.quiz.has_active_session().await);
    assert_eq!(engine.snapshots.save_count(), 0);
    assert!(engine.snapshots.is_empty());
    assert_eq!(
        engine.quiz.notices().current().map(|n| n.kind),
        Some(ErrorKind::RateLimited)
    );
}

#[tokio::test]
async fn repeated_fetch_failure_keeps_a_single_notice() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(code(2));
    engine.api.push(code(2));

    for _ in 0..2 {
        let err = engine
            .quiz
            .start_or_resume(Identity::Guest, params(Difficulty::Easy))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    let first = engine.quiz.notices().dismiss().expect("one notice");
    assert_eq!(first.kind, ErrorKind::InvalidParameters);
    assert!(engine.quiz.notices().current().is_none());
}

#[tokio::test]
async fn abandon_discards_the_quiz_without_scoring() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(5));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    assert!(engine.quiz.abandon().await.unwrap());
    assert!(!engine.quiz.has_active_session().await);
    assert!(engine.quiz.last_attempt().is_none());
    assert!(!engine.quiz.abandon().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn events_are_broadcast_to_subscribers() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(2));
    let mut events = engine.quiz.subscribe();
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    let outcome = engine.quiz.finish().await.unwrap();

    match events.recv().await.unwrap() {
        TimerEvent::SessionFinished(finished) => {
            assert_eq!(finished.attempt_id, outcome.attempt.id);
            assert_eq!(finished.reason, FinishReason::Submitted);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_autosave_does_not_hold_up_the_countdown_or_answers() {
    let engine = TestEngine::with_slow_snapshots(test_settings(), Duration::from_secs(30));
    engine.api.push(success(25));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    // first autosave started at 5s and is still writing
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let view = tokio::time::timeout(Duration::from_secs(1), engine.quiz.select_answer("right0"))
        .await
        .expect("answer selection waited on the snapshot write")
        .unwrap();
    assert_eq!(view.answered, 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let view = tokio::time::timeout(Duration::from_secs(1), engine.quiz.view())
        .await
        .expect("view waited on the snapshot write")
        .unwrap();
    assert_eq!(view.time_remaining_seconds, 1200 - 10);
    assert_eq!(engine.snapshots.save_count(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(engine.snapshots.save_count() >= 1);
    assert!(engine.quiz.has_active_session().await);
}

#[tokio::test(start_paused = true)]
async fn finish_during_a_slow_autosave_leaves_no_snapshot() {
    let engine = TestEngine::with_slow_snapshots(test_settings(), Duration::from_secs(30));
    engine.api.push(success(5));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    engine.quiz.finish().await.unwrap();

    assert_eq!(engine.snapshots.save_count(), 1);
    assert!(engine.snapshots.is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(engine.snapshots.save_count(), 1);
    assert!(engine.snapshots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandon_during_a_slow_autosave_leaves_no_snapshot() {
    let engine = TestEngine::with_slow_snapshots(test_settings(), Duration::from_secs(30));
    engine.api.push(success(5));
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert!(engine.quiz.abandon().await.unwrap());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(engine.snapshots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_stays_reachable_while_a_start_is_backing_off() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(code(5));
    engine.api.push(success(25));

    let quiz = engine.quiz.clone();
    let start = tokio::spawn(async move {
        quiz.start_or_resume(Identity::Guest, params(Difficulty::Easy))
            .await
    });

    // the adapter is sleeping out its 3s rate-limit backoff
    tokio::time::sleep(Duration::from_secs(1)).await;
    let active = tokio::time::timeout(
        Duration::from_millis(100),
        engine.quiz.has_active_session(),
    )
    .await
    .expect("health check waited on the fetch");
    assert!(!active);
    let abandoned = tokio::time::timeout(Duration::from_millis(100), engine.quiz.abandon())
        .await
        .expect("abandon waited on the fetch")
        .unwrap();
    assert!(!abandoned);

    running(start.await.unwrap().unwrap());
    assert!(engine.quiz.has_active_session().await);
    assert_eq!(engine.api.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn tick_events_use_the_engine_clock() {
    let engine = TestEngine::new(test_settings());
    engine.api.push(success(3));
    let mut events = engine.quiz.subscribe();
    engine
        .quiz
        .start_or_resume(Identity::Guest, params(Difficulty::Easy))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    match events.try_recv().unwrap() {
        TimerEvent::TimerTick(tick) => {
            assert_eq!(tick.remaining_seconds, 1199);
            assert_eq!(tick.timestamp, millis_to_datetime(START_MS));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
