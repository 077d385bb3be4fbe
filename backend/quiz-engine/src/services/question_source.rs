use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::QuizSettings;
use crate::error::QuizError;
use crate::metrics::QUESTION_FETCHES_TOTAL;
use crate::models::{Difficulty, Question, RawQuestion, StartParams};
use crate::utils::retry::retry_while;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response codes of the trivia service.
mod response_code {
    pub const SUCCESS: u8 = 0;
    pub const NO_RESULTS: u8 = 1;
    pub const INVALID_PARAMETER: u8 = 2;
    pub const TOKEN_NOT_FOUND: u8 = 3;
    pub const TOKEN_EMPTY: u8 = 4;
    pub const RATE_LIMIT: u8 = 5;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriviaQuery {
    pub category_id: u32,
    pub amount: u32,
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriviaResponse {
    pub response_code: u8,
    #[serde(default)]
    pub results: Vec<RawQuestion>,
}

/// Raw transport to the trivia service: one request, no policy.
#[async_trait]
pub trait TriviaApi: Send + Sync {
    async fn request(&self, query: &TriviaQuery) -> Result<TriviaResponse, QuizError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedQuestions {
    pub questions: Vec<Question>,
    /// Non-fatal shortfall notice.
    pub warning: Option<String>,
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch(&self, params: StartParams) -> Result<FetchedQuestions, QuizError>;
}

pub struct HttpTriviaApi {
    http_client: Client,
    base_url: Url,
}

impl HttpTriviaApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid trivia API URL")?;
        if base_url.scheme() != "https" && base_url.scheme() != "http" {
            anyhow::bail!(
                "Invalid trivia API scheme: {}. Must be http or https.",
                base_url.scheme()
            );
        }

        Ok(Self {
            http_client: Client::new(),
            base_url,
        })
    }

    fn request_url(&self, query: &TriviaQuery) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("amount", &query.amount.to_string())
                .append_pair("category", &query.category_id.to_string())
                .append_pair("type", "multiple")
                .append_pair("encode", "url3986");
            if let Some(difficulty) = query.difficulty.and_then(|d| d.api_filter()) {
                pairs.append_pair("difficulty", difficulty);
            }
        }
        url
    }
}

#[async_trait]
impl TriviaApi for HttpTriviaApi {
    async fn request(&self, query: &TriviaQuery) -> Result<TriviaResponse, QuizError> {
        let url = self.request_url(query);
        tracing::debug!("Calling trivia API: {}", url);

        let response = self
            .http_client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| QuizError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuizError::RateLimited);
        }
        if !status.is_success() {
            return Err(QuizError::Network(format!(
                "trivia API returned HTTP {}",
                status
            )));
        }

        response
            .json::<TriviaResponse>()
            .await
            .map_err(|e| QuizError::Network(format!("invalid trivia API response: {}", e)))
    }
}

/// Maps a service response onto questions or a taxonomy error.
pub fn interpret_response(response: TriviaResponse) -> Result<Vec<RawQuestion>, QuizError> {
    match response.response_code {
        response_code::SUCCESS if response.results.is_empty() => {
            Err(QuizError::InsufficientQuestions)
        }
        response_code::SUCCESS => Ok(response.results),
        response_code::NO_RESULTS => Err(QuizError::InsufficientQuestions),
        response_code::INVALID_PARAMETER => Err(QuizError::InvalidParameters(
            "the trivia service rejected the category or difficulty".to_string(),
        )),
        response_code::TOKEN_NOT_FOUND | response_code::TOKEN_EMPTY => {
            Err(QuizError::SessionTokenExpired)
        }
        response_code::RATE_LIMIT => Err(QuizError::RateLimited),
        other => Err(QuizError::Network(format!(
            "unexpected trivia response code {}",
            other
        ))),
    }
}

pub fn shortfall_warning(received: usize, requested: u32) -> String {
    format!(
        "Only {} questions were available for this category and difficulty ({} requested).",
        received, requested
    )
}

/// Fetch policy on top of a [`TriviaApi`]: rate-limit backoff, a single
/// reduced-count retry when the category is sparse, decoding and shuffling.
pub struct QuestionSourceAdapter<A> {
    api: A,
    target_count: u32,
    reduced_count: u32,
    rate_limit_max_attempts: usize,
    rate_limit_backoff: Duration,
    rng: Mutex<StdRng>,
}

impl<A: TriviaApi> QuestionSourceAdapter<A> {
    pub fn new(api: A, settings: &QuizSettings) -> Self {
        let rng = match settings.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            api,
            target_count: settings.target_count,
            reduced_count: settings.reduced_count,
            rate_limit_max_attempts: settings.rate_limit_max_attempts,
            rate_limit_backoff: settings.rate_limit_backoff,
            rng: Mutex::new(rng),
        }
    }

    async fn request_with_backoff(&self, query: TriviaQuery) -> Result<Vec<RawQuestion>, QuizError> {
        retry_while(
            self.rate_limit_max_attempts,
            self.rate_limit_backoff,
            |e: &QuizError| matches!(e, QuizError::RateLimited),
            |attempt| {
                let query = &query;
                async move {
                    if attempt > 1 {
                        tracing::warn!(
                            "Trivia API rate limited, retry {}/{} for category {}",
                            attempt,
                            self.rate_limit_max_attempts,
                            query.category_id
                        );
                    }
                    let response = self.api.request(query).await?;
                    interpret_response(response)
                }
            },
        )
        .await
    }

    fn build_questions(&self, raw: Vec<RawQuestion>) -> Vec<Question> {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        raw.into_iter()
            .map(|q| q.into_question(&mut *rng))
            .collect()
    }

    async fn fetch_raw(&self, params: StartParams) -> Result<(Vec<RawQuestion>, bool), QuizError> {
        let query = |amount| TriviaQuery {
            category_id: params.category_id,
            amount,
            difficulty: Some(params.difficulty).filter(|d| *d != Difficulty::Mixed),
        };

        match self.request_with_backoff(query(self.target_count)).await {
            Ok(raw) => Ok((raw, false)),
            Err(QuizError::InsufficientQuestions) if self.reduced_count < self.target_count => {
                tracing::warn!(
                    "Not enough questions for category {} ({}), retrying with {}",
                    params.category_id,
                    params.difficulty,
                    self.reduced_count
                );
                let raw = self.request_with_backoff(query(self.reduced_count)).await?;
                Ok((raw, true))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<A: TriviaApi> QuestionSource for QuestionSourceAdapter<A> {
    async fn fetch(&self, params: StartParams) -> Result<FetchedQuestions, QuizError> {
        if params.category_id == 0 {
            return Err(QuizError::InvalidParameters(
                "category id must be positive".to_string(),
            ));
        }

        let (raw, degraded) = match self.fetch_raw(params).await {
            Ok(result) => result,
            Err(e) => {
                QUESTION_FETCHES_TOTAL
                    .with_label_values(&[e.kind().as_str()])
                    .inc();
                tracing::warn!(
                    "Question fetch failed for category {} ({}): {}",
                    params.category_id,
                    params.difficulty,
                    e
                );
                return Err(e);
            }
        };

        let questions = self.build_questions(raw);
        let warning = (questions.len() < self.target_count as usize)
            .then(|| shortfall_warning(questions.len(), self.target_count));

        let outcome = if degraded || warning.is_some() {
            "degraded"
        } else {
            "ok"
        };
        QUESTION_FETCHES_TOTAL.with_label_values(&[outcome]).inc();

        tracing::info!(
            "Fetched {} questions for category {} ({})",
            questions.len(),
            params.category_id,
            params.difficulty
        );

        Ok(FetchedQuestions { questions, warning })
    }
}
