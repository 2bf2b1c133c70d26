//! HTTP access to the remote restaurant service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use randfood_core::{NewRestaurant, QueryParameters, ResultSet};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub const CRATE_NAME: &str = "randfood-client";

pub const LIST_PATH: &str = "/api/restaurants";
pub const ADD_PATH: &str = "/api/add";

/// Shown when the service refuses an add without saying why.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Failed to add restaurant.";

/// Whether a failed listing read is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingRetry {
    Transient,
    Final,
}

impl ListingRetry {
    pub fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Self::Transient,
            s if s.is_server_error() => Self::Transient,
            _ => Self::Final,
        }
    }

    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient
        } else {
            Self::Final
        }
    }
}

/// Retry schedule for listing reads. `max_retries = 0` issues exactly one request.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Pause before the 0-based `retry`, or `None` once the retries are spent.
    pub fn pause_before_retry(&self, retry: usize) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let doubling = u32::try_from(retry)
            .ok()
            .and_then(|r| 2u32.checked_pow(r))
            .unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(doubling).min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed restaurant list: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AddError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("add rejected with http status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Where restaurants come from. Implemented over HTTP by [`RestaurantClient`].
#[async_trait]
pub trait RestaurantSource: Send + Sync {
    /// Read the restaurants matching `query`. Has no effect on caller state.
    async fn fetch_results(&self, query: &QueryParameters) -> Result<ResultSet, FetchError>;

    async fn add_restaurant(&self, restaurant: &NewRestaurant) -> Result<(), AddError>;
}

#[derive(Debug, Clone)]
pub struct RestaurantClient {
    client: reqwest::Client,
    base_url: String,
    backoff: BackoffPolicy,
}

impl RestaurantClient {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        anyhow::ensure!(!base_url.is_empty(), "restaurant service base url is empty");

        Ok(Self {
            client,
            base_url,
            backoff: config.backoff,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn listing_url(&self, query: &QueryParameters) -> String {
        if query.is_empty() {
            format!("{}{LIST_PATH}", self.base_url)
        } else {
            format!("{}{LIST_PATH}?{}", self.base_url, query.to_query_string())
        }
    }

    pub fn add_url(&self) -> String {
        format!("{}{ADD_PATH}", self.base_url)
    }

    async fn fetch_body(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry = 0;
        loop {
            let (verdict, failure) = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.bytes().await?.to_vec()),
                Ok(resp) => {
                    let status = resp.status();
                    let failure = FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    };
                    (ListingRetry::for_status(status), failure)
                }
                Err(err) => (ListingRetry::for_error(&err), FetchError::Request(err)),
            };

            let pause = match verdict {
                ListingRetry::Transient => self.backoff.pause_before_retry(retry),
                ListingRetry::Final => None,
            };
            let Some(pause) = pause else {
                return Err(failure);
            };
            warn!(error = %failure, retry, "retrying restaurant listing");
            tokio::time::sleep(pause).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl RestaurantSource for RestaurantClient {
    async fn fetch_results(&self, query: &QueryParameters) -> Result<ResultSet, FetchError> {
        let url = self.listing_url(query);
        let span = info_span!("http_fetch", url = %url);
        async {
            let body = self.fetch_body(&url).await?;
            let restaurants: ResultSet = serde_json::from_slice(&body)?;
            tracing::debug!(count = restaurants.len(), "restaurant listing fetched");
            Ok::<_, FetchError>(restaurants)
        }
        .instrument(span)
        .await
    }

    async fn add_restaurant(&self, restaurant: &NewRestaurant) -> Result<(), AddError> {
        let url = self.add_url();
        let span = info_span!("http_add", url = %url, restaurant = %restaurant.restaurant);
        async {
            let resp = self.client.post(&url).json(restaurant).send().await?;
            let status = resp.status();
            if status.is_success() {
                return Ok::<(), AddError>(());
            }

            let body = resp.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string());
            warn!(status = status.as_u16(), %message, "add rejected");
            Err(AddError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
        .instrument(span)
        .await
    }
}
