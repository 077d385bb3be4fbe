use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Database, IndexModel};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::QuizError;
use crate::metrics::{track_db_operation, ATTEMPTS_PERSISTED_TOTAL, HISTORY_TRIMMED_TOTAL};
use crate::models::attempt::{DetailDocument, SummaryDocument, GUEST_USER_ID};
use crate::models::Attempt;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCollection {
    Details,
    Summaries,
}

impl HistoryCollection {
    pub fn name(&self) -> &'static str {
        match self {
            HistoryCollection::Details => "quiz_attempt_details",
            HistoryCollection::Summaries => "quiz_attempt_summaries",
        }
    }
}

/// Remote per-user attempt storage. Every operation is scoped to one user.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Idempotent write keyed by the detail id.
    async fn upsert_detail(&self, doc: &DetailDocument) -> Result<()>;

    async fn upsert_summary(&self, doc: &SummaryDocument) -> Result<()>;

    /// Deletes everything but the `keep` most recently finished documents of
    /// `user_id`; returns how many were removed.
    async fn trim(&self, collection: HistoryCollection, user_id: &str, keep: usize) -> Result<u64>;

    /// Most recent first.
    async fn list_summaries(&self, user_id: &str, limit: usize) -> Result<Vec<SummaryDocument>>;

    async fn find_detail(&self, user_id: &str, detail_id: &str) -> Result<Option<DetailDocument>>;
}

pub struct MongoAttemptStore {
    mongo: Database,
}

impl MongoAttemptStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Compound `(user_id, finishedAt)` index used by listing and trimming.
    pub async fn ensure_indexes(&self) -> Result<()> {
        for collection in [HistoryCollection::Details, HistoryCollection::Summaries] {
            let index = IndexModel::builder()
                .keys(doc! { "user_id": 1, "finishedAt": -1 })
                .build();
            self.mongo
                .collection::<Document>(collection.name())
                .create_index(index)
                .await
                .with_context(|| format!("Failed to create index on {}", collection.name()))?;
        }
        tracing::info!("History indexes ensured");
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn upsert_detail(&self, detail: &DetailDocument) -> Result<()> {
        let collection = self
            .mongo
            .collection::<DetailDocument>(HistoryCollection::Details.name());

        track_db_operation("upsert", HistoryCollection::Details.name(), async {
            collection
                .replace_one(doc! { "_id": detail.id.as_str() }, detail)
                .upsert(true)
                .await
                .context("Failed to write attempt detail")?;
            Ok(())
        })
        .await
    }

    async fn upsert_summary(&self, summary: &SummaryDocument) -> Result<()> {
        let collection = self
            .mongo
            .collection::<SummaryDocument>(HistoryCollection::Summaries.name());

        track_db_operation("upsert", HistoryCollection::Summaries.name(), async {
            collection
                .replace_one(doc! { "_id": summary.id.as_str() }, summary)
                .upsert(true)
                .await
                .context("Failed to write attempt summary")?;
            Ok(())
        })
        .await
    }

    async fn trim(&self, collection: HistoryCollection, user_id: &str, keep: usize) -> Result<u64> {
        let coll = self.mongo.collection::<Document>(collection.name());

        track_db_operation("trim", collection.name(), async {
            let mut cursor = coll
                .find(doc! { "user_id": user_id })
                .sort(doc! { "finishedAt": -1, "createdAt": -1 })
                .skip(keep as u64)
                .projection(doc! { "_id": 1 })
                .await
                .context("Failed to query documents to trim")?;

            let mut stale_ids: Vec<Bson> = Vec::new();
            while cursor
                .advance()
                .await
                .context("Failed to advance trim cursor")?
            {
                let document = cursor
                    .deserialize_current()
                    .context("Failed to read document id")?;
                let id = document
                    .get("_id")
                    .cloned()
                    .ok_or_else(|| anyhow!("Document without _id"))?;
                stale_ids.push(id);
            }

            if stale_ids.is_empty() {
                return Ok(0);
            }

            let result = coll
                .delete_many(doc! { "_id": { "$in": stale_ids }, "user_id": user_id })
                .await
                .context("Failed to delete stale documents")?;
            Ok(result.deleted_count)
        })
        .await
    }

    async fn list_summaries(&self, user_id: &str, limit: usize) -> Result<Vec<SummaryDocument>> {
        let coll = self
            .mongo
            .collection::<SummaryDocument>(HistoryCollection::Summaries.name());

        track_db_operation("find", HistoryCollection::Summaries.name(), async {
            let mut cursor = coll
                .find(doc! { "user_id": user_id })
                .sort(doc! { "finishedAt": -1, "createdAt": -1 })
                .limit(limit as i64)
                .await
                .context("Failed to query attempt summaries")?;

            let mut result = Vec::new();
            while cursor
                .advance()
                .await
                .context("Failed to advance summary cursor")?
            {
                let summary = cursor
                    .deserialize_current()
                    .context("Failed to deserialize attempt summary")?;
                result.push(summary);
            }
            Ok(result)
        })
        .await
    }

    async fn find_detail(&self, user_id: &str, detail_id: &str) -> Result<Option<DetailDocument>> {
        let coll = self
            .mongo
            .collection::<DetailDocument>(HistoryCollection::Details.name());

        track_db_operation("find_one", HistoryCollection::Details.name(), async {
            coll.find_one(doc! { "_id": detail_id, "user_id": user_id })
                .await
                .context("Failed to query attempt detail")
        })
        .await
    }
}

/// Store kept in process memory, used for local development and tests.
/// Writes and trims can be made to fail to exercise the error paths.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    details: Mutex<Vec<DetailDocument>>,
    summaries: Mutex<Vec<SummaryDocument>>,
    fail_writes: AtomicBool,
    fail_trims: AtomicBool,
    write_calls: AtomicUsize,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_trims(&self, fail: bool) {
        self.fail_trims.store(fail, Ordering::SeqCst);
    }

    /// Number of write attempts, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn detail_ids(&self, user_id: &str) -> Vec<String> {
        let details = self.details.lock().unwrap_or_else(|p| p.into_inner());
        details
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.id.clone())
            .collect()
    }

    pub fn summary_count(&self, user_id: &str) -> usize {
        let summaries = self.summaries.lock().unwrap_or_else(|p| p.into_inner());
        summaries.iter().filter(|s| s.user_id == user_id).count()
    }

    fn record_write(&self) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated write failure"));
        }
        Ok(())
    }
}

fn upsert_by_id<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn upsert_detail(&self, detail: &DetailDocument) -> Result<()> {
        self.record_write()?;
        let mut details = self.details.lock().unwrap_or_else(|p| p.into_inner());
        upsert_by_id(&mut details, detail, |d| d.id == detail.id);
        Ok(())
    }

    async fn upsert_summary(&self, summary: &SummaryDocument) -> Result<()> {
        self.record_write()?;
        let mut summaries = self.summaries.lock().unwrap_or_else(|p| p.into_inner());
        upsert_by_id(&mut summaries, summary, |s| s.id == summary.id);
        Ok(())
    }

    async fn trim(&self, collection: HistoryCollection, user_id: &str, keep: usize) -> Result<u64> {
        if self.fail_trims.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated trim failure"));
        }

        match collection {
            HistoryCollection::Details => {
                let mut details = self.details.lock().unwrap_or_else(|p| p.into_inner());
                let mut owned: Vec<&DetailDocument> =
                    details.iter().filter(|d| d.user_id == user_id).collect();
                owned.sort_by(|a, b| {
                    (b.finished_at, b.created_at).cmp(&(a.finished_at, a.created_at))
                });
                let stale: Vec<String> = owned.iter().skip(keep).map(|d| d.id.clone()).collect();
                details.retain(|d| !(d.user_id == user_id && stale.contains(&d.id)));
                Ok(stale.len() as u64)
            }
            HistoryCollection::Summaries => {
                let mut summaries = self.summaries.lock().unwrap_or_else(|p| p.into_inner());
                let mut owned: Vec<&SummaryDocument> =
                    summaries.iter().filter(|s| s.user_id == user_id).collect();
                owned.sort_by(|a, b| {
                    (b.finished_at, b.created_at).cmp(&(a.finished_at, a.created_at))
                });
                let stale: Vec<String> = owned.iter().skip(keep).map(|s| s.id.clone()).collect();
                summaries.retain(|s| !(s.user_id == user_id && stale.contains(&s.id)));
                Ok(stale.len() as u64)
            }
        }
    }

    async fn list_summaries(&self, user_id: &str, limit: usize) -> Result<Vec<SummaryDocument>> {
        let summaries = self.summaries.lock().unwrap_or_else(|p| p.into_inner());
        let mut owned: Vec<SummaryDocument> = summaries
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| (b.finished_at, b.created_at).cmp(&(a.finished_at, a.created_at)));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn find_detail(&self, user_id: &str, detail_id: &str) -> Result<Option<DetailDocument>> {
        let details = self.details.lock().unwrap_or_else(|p| p.into_inner());
        Ok(details
            .iter()
            .find(|d| d.id == detail_id && d.user_id == user_id)
            .cloned())
    }
}

/// Writes finished attempts as a detail plus a summary and keeps both
/// per-user collections within their retention caps.
pub struct ResultPersistenceService {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    detail_retention: usize,
    summary_retention: usize,
    retry: RetryConfig,
}

impl ResultPersistenceService {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        detail_retention: usize,
        summary_retention: usize,
    ) -> Self {
        Self {
            store,
            clock,
            detail_retention,
            summary_retention,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Persists `attempt` for `user_id` and returns the detail id. Trimming
    /// runs afterwards and can never fail the save.
    pub async fn save(&self, user_id: &str, attempt: &Attempt) -> Result<String, QuizError> {
        if user_id.is_empty() || user_id == GUEST_USER_ID {
            return Err(QuizError::Persistence(
                "guest attempts are not stored remotely".to_string(),
            ));
        }
        attempt.validate()?;

        let written_at = self.clock.now();
        let mut detail = DetailDocument::from_attempt(attempt, written_at);
        detail.user_id = user_id.to_string();
        let detail_id = detail.id.clone();

        let mut summary =
            SummaryDocument::from_attempt(Uuid::new_v4().to_string(), &detail_id, attempt, written_at);
        summary.user_id = user_id.to_string();

        let written = async {
            retry_async_with_config(self.retry.clone(), || self.store.upsert_detail(&detail))
                .await
                .context("detail")?;
            retry_async_with_config(self.retry.clone(), || self.store.upsert_summary(&summary))
                .await
                .context("summary")
        }
        .await;

        if let Err(e) = written {
            ATTEMPTS_PERSISTED_TOTAL.with_label_values(&["error"]).inc();
            tracing::error!(
                "Failed to persist attempt {} for user {}: {:#}",
                detail_id,
                user_id,
                e
            );
            return Err(QuizError::Persistence(format!("{:#}", e)));
        }

        ATTEMPTS_PERSISTED_TOTAL.with_label_values(&["success"]).inc();
        tracing::info!(
            "Attempt {} persisted for user {} (score {}/{})",
            detail_id,
            user_id,
            attempt.score,
            attempt.total_questions
        );

        self.trim_quietly(HistoryCollection::Details, user_id, self.detail_retention)
            .await;
        self.trim_quietly(HistoryCollection::Summaries, user_id, self.summary_retention)
            .await;

        Ok(detail_id)
    }

    async fn trim_quietly(&self, collection: HistoryCollection, user_id: &str, keep: usize) {
        match self.store.trim(collection, user_id, keep).await {
            Ok(0) => {}
            Ok(deleted) => {
                HISTORY_TRIMMED_TOTAL
                    .with_label_values(&[collection.name()])
                    .inc_by(deleted);
                tracing::debug!(
                    "Trimmed {} documents from {} for user {}",
                    deleted,
                    collection.name(),
                    user_id
                );
            }
            Err(e) => {
                let err = QuizError::Trim(format!("{:#}", e));
                tracing::warn!(
                    "{} ({} for user {}), continuing",
                    err,
                    collection.name(),
                    user_id
                );
            }
        }
    }
}
