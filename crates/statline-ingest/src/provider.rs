//! Remote stat provider
//!
//! The provider serves one box score per event:
//! `GET {base_url}/v1/{category}/events/{external_ref}/boxscore`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use statline_common::types::WorkItem;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::Result;

/// Successful provider answer
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Found(Value),
    /// The provider has no data for this event; never retried
    NotFound,
}

/// Failed provider call, classified for retry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Transient(_))
    }
}

#[async_trait]
pub trait StatProvider: Send + Sync {
    async fn fetch_boxscore(&self, item: &WorkItem)
        -> std::result::Result<ProviderResponse, FetchError>;
}

/// Map an HTTP status onto a provider outcome; `None` means read the body
pub fn classify_status(status: StatusCode) -> Option<std::result::Result<ProviderResponse, FetchError>> {
    if status.is_success() {
        return None;
    }

    let outcome = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(ProviderResponse::NotFound),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Err(FetchError::Transient(format!("HTTP {}", status)))
        },
        s if s.is_server_error() => Err(FetchError::Transient(format!("HTTP {}", s))),
        s => Err(FetchError::Permanent(format!("HTTP {}", s))),
    };
    Some(outcome)
}

fn classify_transport(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::Permanent(format!("undecodable body: {}", err))
    } else {
        FetchError::Transient(err.to_string())
    }
}

/// HTTP implementation backed by reqwest
pub struct HttpStatProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpStatProvider {
    /// Build the client; `timeout` bounds a whole request
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, config })
    }

    pub fn boxscore_url(&self, item: &WorkItem) -> String {
        format!(
            "{}/v1/{}/events/{}/boxscore",
            self.config.base_url.trim_end_matches('/'),
            item.category,
            item.external_ref
        )
    }
}

#[async_trait]
impl StatProvider for HttpStatProvider {
    async fn fetch_boxscore(
        &self,
        item: &WorkItem,
    ) -> std::result::Result<ProviderResponse, FetchError> {
        let url = self.boxscore_url(item);
        debug!(work_id = item.id, url = %url, "Fetching box score");

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();

        if let Some(outcome) = classify_status(status) {
            return outcome;
        }

        let body: Value = response.json().await.map_err(|e| classify_transport(&e))?;
        Ok(ProviderResponse::Found(body))
    }
}
