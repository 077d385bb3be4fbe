#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quiz_engine::config::{
    Config, DifficultyDurations, PersistenceBackend, QuizSettings, SnapshotBackend,
};
use quiz_engine::create_router;
use quiz_engine::error::QuizError;
use quiz_engine::models::{RawQuestion, SessionState};
use quiz_engine::services::history_service::HistoryService;
use quiz_engine::services::question_source::{
    QuestionSourceAdapter, TriviaApi, TriviaQuery, TriviaResponse,
};
use quiz_engine::services::quiz_service::QuizService;
use quiz_engine::services::result_store::{InMemoryAttemptStore, ResultPersistenceService};
use quiz_engine::services::snapshot_store::{InMemorySnapshotStore, SessionSnapshotStore};
use quiz_engine::services::AppState;
use quiz_engine::utils::retry::RetryConfig;
use quiz_engine::utils::time::ManualClock;

pub const START_MS: i64 = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Percent-encoded question in the shape the trivia service returns.
pub fn raw_question(i: usize) -> RawQuestion {
    RawQuestion {
        category: "Science%3A%20Computers".to_string(),
        kind: "multiple".to_string(),
        difficulty: "easy".to_string(),
        question: format!("Question%20{}%3F", i),
        correct_answer: format!("right{}", i),
        incorrect_answers: vec![
            format!("wrong{}a", i),
            format!("wrong{}b", i),
            format!("wrong{}c", i),
        ],
    }
}

pub fn success(n: usize) -> Result<TriviaResponse, QuizError> {
    Ok(TriviaResponse {
        response_code: 0,
        results: (0..n).map(raw_question).collect(),
    })
}

pub fn code(response_code: u8) -> Result<TriviaResponse, QuizError> {
    Ok(TriviaResponse {
        response_code,
        results: Vec::new(),
    })
}

/// Trivia transport that replays queued responses and records every query.
#[derive(Clone, Default)]
pub struct ScriptedTriviaApi {
    responses: Arc<Mutex<VecDeque<Result<TriviaResponse, QuizError>>>>,
    queries: Arc<Mutex<Vec<TriviaQuery>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTriviaApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<TriviaResponse, QuizError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<TriviaQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriviaApi for ScriptedTriviaApi {
    async fn request(&self, query: &TriviaQuery) -> Result<TriviaResponse, QuizError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(QuizError::Network("no scripted response".into())))
    }
}

/// Snapshot backend whose writes take `delay`, like a congested Redis.
pub struct SlowSnapshotStore {
    inner: Arc<InMemorySnapshotStore>,
    delay: Duration,
}

#[async_trait]
impl SessionSnapshotStore for SlowSnapshotStore {
    async fn save(&self, state: &SessionState) -> Result<(), QuizError> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(state).await
    }

    async fn load(&self) -> Result<Option<SessionState>, QuizError> {
        self.inner.load().await
    }

    async fn clear(&self) -> Result<(), QuizError> {
        self.inner.clear().await
    }
}

pub fn test_settings() -> QuizSettings {
    QuizSettings {
        durations: DifficultyDurations {
            easy_seconds: 1200,
            medium_seconds: 1500,
            hard_seconds: 1800,
            mixed_seconds: 1500,
        },
        shuffle_seed: Some(7),
        ..QuizSettings::default()
    }
}

pub fn test_config(settings: QuizSettings) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        trivia_api_url: "http://trivia.invalid/api.php".to_string(),
        mongo_uri: "mongodb://unused".to_string(),
        mongo_database: "quiz_test".to_string(),
        persistence_backend: PersistenceBackend::Memory,
        redis_uri: "redis://unused".to_string(),
        snapshot_backend: SnapshotBackend::Memory,
        snapshot_path: "unused".to_string(),
        quiz: settings,
    }
}

/// Engine wired to in-memory collaborators that tests can inspect.
pub struct TestEngine {
    pub quiz: Arc<QuizService>,
    pub api: ScriptedTriviaApi,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub attempts: Arc<InMemoryAttemptStore>,
    pub clock: Arc<ManualClock>,
    pub settings: QuizSettings,
}

impl TestEngine {
    pub fn new(settings: QuizSettings) -> Self {
        Self::with_snapshots(settings, Arc::new(InMemorySnapshotStore::new()))
    }

    /// A second engine over the same snapshot slot, as after an app restart.
    pub fn with_snapshots(settings: QuizSettings, snapshots: Arc<InMemorySnapshotStore>) -> Self {
        Self::build(settings, snapshots.clone(), snapshots)
    }

    /// Snapshot writes are delayed; `snapshots` still shows what landed.
    pub fn with_slow_snapshots(settings: QuizSettings, delay: Duration) -> Self {
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let slow = Arc::new(SlowSnapshotStore {
            inner: snapshots.clone(),
            delay,
        });
        Self::build(settings, snapshots, slow)
    }

    fn build(
        settings: QuizSettings,
        snapshots: Arc<InMemorySnapshotStore>,
        store: Arc<dyn SessionSnapshotStore>,
    ) -> Self {
        init_tracing();

        let api = ScriptedTriviaApi::new();
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let clock = Arc::new(ManualClock::new(START_MS));

        let results = Arc::new(
            ResultPersistenceService::new(
                attempts.clone(),
                clock.clone(),
                settings.detail_retention,
                settings.summary_retention,
            )
            .with_retry(RetryConfig {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                jitter_max: None,
            }),
        );

        let quiz = Arc::new(QuizService::new(
            Arc::new(QuestionSourceAdapter::new(api.clone(), &settings)),
            store,
            results,
            clock.clone(),
            settings.clone(),
        ));

        Self {
            quiz,
            api,
            snapshots,
            attempts,
            clock,
            settings,
        }
    }

    pub async fn saved_state(&self) -> SessionState {
        self.snapshots
            .load()
            .await
            .unwrap()
            .expect("a snapshot should have been saved")
    }

    pub fn history(&self) -> HistoryService {
        HistoryService::new(self.attempts.clone(), self.settings.history_default_limit)
    }

    pub fn router(&self) -> Router {
        let state = AppState::from_parts(
            test_config(self.settings.clone()),
            self.quiz.clone(),
            self.history(),
        );
        create_router(Arc::new(state))
    }
}
