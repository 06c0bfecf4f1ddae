//! Shared HTTP client for model sidecars (embedding, extraction, rerank)

use crate::error::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Retry budget for transient backend errors, with linear backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, backoff_ms: u64) -> Self {
        Self {
            retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    fn delay(&self, attempt: usize) -> Duration {
        self.backoff * (attempt as u32 + 1)
    }

    /// Run `op`, retrying transient failures. Non-transient errors (schema,
    /// configuration, 4xx) are returned immediately.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    let delay = self.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        "{} failed, retrying: {}",
                        what,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 200)
    }
}

pub struct BackendClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
    label: &'static str,
}

impl BackendClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
        label: &'static str,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid {} backend URL: {}", label, e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            retry,
            label,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid {} backend URL: {}", self.label, e)))
    }

    /// POST a JSON body and decode a JSON response, under the retry policy
    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let url = &url;
        let client = &self.client;
        self.retry
            .run(self.label, move || async move {
                let response = client
                    .post(url.clone())
                    .json(body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json::<Resp>().await?)
            })
            .await
    }
}
