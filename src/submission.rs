//! Client for the Napkin `createThought` endpoint.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request body for one thought submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtRequest {
    pub email: String,
    pub token: String,
    pub thought: String,
    /// First URL found in the message, or empty.
    pub source_url: String,
}

/// Successful response; only `url` is relied upon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThoughtCreated {
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Request failed with status code {status}")]
    Status { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SubmissionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// External thought-capture API. One call, one attempt; no retries.
#[async_trait]
pub trait ThoughtApi: Send + Sync {
    async fn create_thought(&self, request: &ThoughtRequest)
        -> Result<ThoughtCreated, SubmissionError>;
}

/// reqwest-backed [`ThoughtApi`].
pub struct HttpThoughtApi {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpThoughtApi {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ThoughtApi for HttpThoughtApi {
    async fn create_thought(
        &self,
        request: &ThoughtRequest,
    ) -> Result<ThoughtCreated, SubmissionError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmissionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<ThoughtCreated>()
            .await
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))
    }
}
