use super::config::QueryClientConfig;
use super::error::QueryError;
use super::request::SignedRequest;
use crate::reliability::RetryPolicy;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method, Response};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// HTTP plumbing shared by the query and job clients.
///
/// Only connection-establishment failures are retried. Any response,
/// whatever its status, is handed back to the caller.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &QueryClientConfig) -> Result<Self, QueryError> {
        // No client-wide timeout: streamed responses may stay open for as
        // long as the query runs.
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| QueryError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry.clone()),
            timeout: config.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POSTs a signed request. Streaming requests carry no total timeout.
    pub async fn post(
        &self,
        url: &Url,
        request: &SignedRequest,
        streaming: bool,
    ) -> Result<Response, QueryError> {
        let timeout = (!streaming).then_some(self.timeout);
        self.send(Method::POST, url, &request.headers, Some(&request.body), timeout)
            .await
    }

    /// GETs with the given signed headers and the unary timeout.
    pub async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<Response, QueryError> {
        self.send(Method::GET, url, headers, None, Some(self.timeout))
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = self
            .retry
            .run(
                url.path(),
                || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let mut builder = self
                        .client
                        .request(method.clone(), url.clone())
                        .headers(headers.clone());
                    if let Some(body) = body {
                        builder = builder.body(body.to_string());
                    }
                    if let Some(timeout) = timeout {
                        builder = builder.timeout(timeout);
                    }
                    builder.send()
                },
                reqwest::Error::is_connect,
            )
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(response) => {
                debug!(
                    %method,
                    url = %url,
                    status = response.status().as_u16(),
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(response)
            }
            Err(e) => Err(QueryError::from_reqwest(e, attempts)),
        }
    }
}
