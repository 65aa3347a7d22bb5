use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

/// 5xx and 429 are worth another attempt; every other status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Exponential backoff: `initial * 2^retry`, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial: Duration::from_millis(250),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based), or `None` once exhausted.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        (retry < self.retries)
            .then(|| self.initial.saturating_mul(2u32.saturating_pow(retry)).min(self.ceiling))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("job-radar/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// A successful (2xx) response, fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    Status { status: u16, url: String },
}

/// Result of one attempt; `Retry` carries the error to surface if no retry is left.
enum Outcome {
    Done(Result<HttpResponse, HttpError>),
    Retry(HttpError),
}

/// Shared reqwest client for feeds and the scorer.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent);
        if let Some(proxy) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy)
                .with_context(|| format!("invalid proxy url {proxy:?}"))?;
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            client: builder.build().context("building reqwest client")?,
            retry: config.retry,
        })
    }

    pub async fn get_with_query<Q>(
        &self,
        label: &str,
        url: &str,
        query: &Q,
    ) -> Result<HttpResponse, HttpError>
    where
        Q: Serialize + ?Sized,
    {
        self.execute(|| self.client.get(url).query(query))
            .instrument(info_span!("http_get", label, url))
            .await
    }

    /// POST a JSON body, optionally with bearer auth.
    pub async fn post_json<B>(
        &self,
        label: &str,
        url: &str,
        bearer_token: Option<&str>,
        body: &B,
    ) -> Result<HttpResponse, HttpError>
    where
        B: Serialize + ?Sized,
    {
        self.execute(|| {
            let request = self.client.post(url).json(body);
            match bearer_token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .instrument(info_span!("http_post", label, url))
        .await
    }

    async fn execute<F>(&self, request: F) -> Result<HttpResponse, HttpError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            let err = match self.attempt(request()).await {
                Outcome::Done(result) => return result,
                Outcome::Retry(err) => err,
            };
            let Some(delay) = self.retry.delay(retry) else {
                return Err(err);
            };
            debug!(retry, ?delay, error = %err, "retrying request");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn attempt(&self, request: RequestBuilder) -> Outcome {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if is_retryable_error(&err) => return Outcome::Retry(err.into()),
            Err(err) => return Outcome::Done(Err(err.into())),
        };
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let err = HttpError::Status {
                status: status.as_u16(),
                url,
            };
            return if is_retryable_status(status) {
                Outcome::Retry(err)
            } else {
                Outcome::Done(Err(err))
            };
        }
        Outcome::Done(
            response
                .bytes()
                .await
                .map(|body| HttpResponse {
                    status: status.as_u16(),
                    url,
                    body: body.to_vec(),
                })
                .map_err(HttpError::from),
        )
    }
}
