use crate::config::{Config, PersistenceBackend, SnapshotBackend};
use crate::utils::time::{Clock, SystemClock};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use history_service::HistoryService;
use question_source::{HttpTriviaApi, QuestionSourceAdapter};
use quiz_service::QuizService;
use result_store::{AttemptStore, InMemoryAttemptStore, MongoAttemptStore, ResultPersistenceService};
use snapshot_store::{
    FileSnapshotStore, InMemorySnapshotStore, RedisSnapshotStore, SessionSnapshotStore,
};

pub struct AppState {
    pub config: Config,
    pub quiz: Arc<QuizService>,
    pub history: HistoryService,
    /// Present only for the backends that use them; checked by `/health`.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mongo = match config.persistence_backend {
            PersistenceBackend::Mongo => {
                let client = MongoClient::with_uri_str(&config.mongo_uri).await?;
                tracing::info!("MongoDB client created");
                Some(client.database(&config.mongo_database))
            }
            PersistenceBackend::Memory => {
                tracing::warn!("Attempt history is kept in memory and lost on restart");
                None
            }
        };

        let attempts: Arc<dyn AttemptStore> = match &mongo {
            Some(db) => {
                let store = MongoAttemptStore::new(db.clone());
                if let Err(e) = store.ensure_indexes().await {
                    tracing::warn!("Could not create history indexes: {:#}", e);
                }
                Arc::new(store)
            }
            None => Arc::new(InMemoryAttemptStore::new()),
        };

        let redis = match config.snapshot_backend {
            SnapshotBackend::Redis => Some(connect_redis(&config.redis_uri).await?),
            _ => None,
        };

        let snapshots: Arc<dyn SessionSnapshotStore> = match (config.snapshot_backend, &redis) {
            (SnapshotBackend::Redis, Some(conn)) => Arc::new(RedisSnapshotStore::new(conn.clone())),
            (SnapshotBackend::Memory, _) => Arc::new(InMemorySnapshotStore::new()),
            _ => Arc::new(FileSnapshotStore::new(&config.snapshot_path)),
        };

        let api = HttpTriviaApi::new(&config.trivia_api_url)?;
        let source = Arc::new(QuestionSourceAdapter::new(api, &config.quiz));

        let results = Arc::new(ResultPersistenceService::new(
            attempts.clone(),
            clock.clone(),
            config.quiz.detail_retention,
            config.quiz.summary_retention,
        ));

        let quiz = Arc::new(QuizService::new(
            source,
            snapshots,
            results,
            clock,
            config.quiz.clone(),
        ));
        let history = HistoryService::new(attempts, config.quiz.history_default_limit);

        Ok(Self {
            config,
            quiz,
            history,
            mongo,
            redis,
        })
    }

    /// State over already-built services, without external connections.
    pub fn from_parts(config: Config, quiz: Arc<QuizService>, history: HistoryService) -> Self {
        Self {
            config,
            quiz,
            history,
            mongo: None,
            redis: None,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod history_service;
pub mod notice;
pub mod question_source;
pub mod quiz_engine;
pub mod quiz_service;
pub mod result_store;
pub mod snapshot_store;
