use std::sync::Arc;

use crate::error::QuizError;
use crate::models::{Attempt, AttemptSummary};
use crate::services::result_store::AttemptStore;

pub const MAX_HISTORY_LIMIT: usize = 100;

/// Read side of the attempt store: a signed-in user's recent results.
pub struct HistoryService {
    store: Arc<dyn AttemptStore>,
    default_limit: usize,
}

impl HistoryService {
    pub fn new(store: Arc<dyn AttemptStore>, default_limit: usize) -> Self {
        Self {
            store,
            default_limit: default_limit.clamp(1, MAX_HISTORY_LIMIT),
        }
    }

    /// Up to `limit` summaries of `user_id`, most recently finished first.
    pub async fn list_recent_summaries(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AttemptSummary>, QuizError> {
        let limit = limit
            .unwrap_or(self.default_limit)
            .clamp(1, MAX_HISTORY_LIMIT);

        let docs = self
            .store
            .list_summaries(user_id, limit)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list history for user {}: {:#}", user_id, e);
                QuizError::HistoryUnavailable(format!("{:#}", e))
            })?;

        Ok(docs.into_iter().map(AttemptSummary::from).collect())
    }

    /// Full attempt behind a summary. Another user's detail id yields `None`.
    pub async fn get_detail(
        &self,
        user_id: &str,
        detail_id: &str,
    ) -> Result<Option<Attempt>, QuizError> {
        let doc = self
            .store
            .find_detail(user_id, detail_id)
            .await
            .map_err(|e| QuizError::HistoryUnavailable(format!("{:#}", e)))?;

        match doc {
            Some(doc) => doc.into_attempt().map(Some).map_err(|e| {
                tracing::warn!("Stored attempt {} is inconsistent: {}", detail_id, e);
                e
            }),
            None => Ok(None),
        }
    }
}
