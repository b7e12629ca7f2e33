//! Open Trivia DB client.

use super::types::{QuestionQuery, RawResponse, TriviaQuestion};
use async_trait::async_trait;
use std::time::Duration;

pub const OPENTDB_URL: &str = "https://opentdb.com/api.php";

#[derive(Debug, thiserror::Error)]
pub enum TriviaError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{}", api_error_message(*.0))]
    Api(i64),
}

/// Text for the API's non-zero `response_code` values.
pub fn api_error_message(code: i64) -> &'static str {
    match code {
        1 => "Not enough questions available for your query.",
        2 => "Invalid parameters in request.",
        3 => "Session token not found.",
        4 => "Session token exhausted. Please start a new game.",
        5 => "Rate limit exceeded. Please wait a moment.",
        _ => "Unknown error occurred.",
    }
}

/// Where rounds get their questions.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch_questions(&self, query: &QuestionQuery) -> Result<Vec<TriviaQuestion>, TriviaError>;
}

pub struct OpenTdbClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenTdbClient {
    pub fn new() -> Result<Self, TriviaError> {
        Self::with_base_url(OPENTDB_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, TriviaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl QuestionSource for OpenTdbClient {
    async fn fetch_questions(&self, query: &QuestionQuery) -> Result<Vec<TriviaQuestion>, TriviaError> {
        log::info!("[TRIVIA] Fetching {} questions from {}", query.amount, self.base_url);

        let response = self
            .client
            .get(&self.base_url)
            .query(&query.to_query())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TriviaError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let questions = parse_response(&body)?;
        log::info!("[TRIVIA] Received {} questions", questions.len());
        Ok(questions)
    }
}

/// Decode an API body into questions, mapping `response_code` errors.
pub fn parse_response(body: &str) -> Result<Vec<TriviaQuestion>, TriviaError> {
    let response: RawResponse = serde_json::from_str(body)?;
    if response.response_code != 0 {
        log::warn!(
            "[TRIVIA] API error {}: {}",
            response.response_code,
            api_error_message(response.response_code)
        );
        return Err(TriviaError::Api(response.response_code));
    }
    Ok(response.results.into_iter().map(TriviaQuestion::from).collect())
}
