//! Control of background jobs on the platform.

use super::config::QueryClientConfig;
use super::error::QueryError;
use super::request::RequestBuilder;
use super::transport::HttpTransport;
use crate::domain::{Credentials, SharedClock};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Bodies whose first bytes mention this are failures even on 2xx.
const ERROR_MARKER: &str = "error";
const ERROR_PROBE_LEN: usize = 15;

/// Narrows a job listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<String>,
    /// Only used together with `job_type`.
    pub name: Option<String>,
}

impl JobFilter {
    pub fn by_type(job_type: impl Into<String>) -> Self {
        Self {
            job_type: Some(job_type.into()),
            name: None,
        }
    }

    pub fn by_type_and_name(job_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job_type: Some(job_type.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResponse {
    Json(Value),
    /// Bodies that are not JSON, verbatim.
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Start,
    Stop,
    Remove,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
        }
    }
}

/// Client for the `/search/job[s]` endpoints.
#[derive(Debug, Clone)]
pub struct JobClient {
    base_url: Url,
    credentials: Credentials,
    transport: HttpTransport,
    builder: RequestBuilder,
}

impl JobClient {
    pub fn new(config: &QueryClientConfig) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self::from_parts(
            config.base_url()?,
            config.credentials.clone(),
            HttpTransport::new(config)?,
            RequestBuilder::new(&config.user, &config.app_name),
        ))
    }

    pub(crate) fn from_parts(
        base_url: Url,
        credentials: Credentials,
        transport: HttpTransport,
        builder: RequestBuilder,
    ) -> Self {
        Self {
            base_url,
            credentials,
            transport,
            builder,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.builder = self.builder.with_clock(clock);
        self
    }

    /// `GET /search/jobs[/<type>[/<name>]]`
    pub async fn list(&self, filter: &JobFilter) -> Result<JobResponse, QueryError> {
        let mut segments = vec!["search", "jobs"];
        if let Some(job_type) = filter.job_type.as_deref() {
            segments.push(job_type);
            if let Some(name) = filter.name.as_deref() {
                segments.push(name);
            }
        }
        self.get(&segments).await
    }

    /// `GET /search/job/<id>`
    pub async fn get_job(&self, job_id: &str) -> Result<JobResponse, QueryError> {
        self.get(&["search", "job", job_id]).await
    }

    /// `GET /search/job/<action>/<id>`
    pub async fn control(&self, action: JobAction, job_id: &str) -> Result<JobResponse, QueryError> {
        self.get(&["search", "job", action.as_str(), job_id]).await
    }

    pub async fn start(&self, job_id: &str) -> Result<JobResponse, QueryError> {
        self.control(JobAction::Start, job_id).await
    }

    pub async fn stop(&self, job_id: &str) -> Result<JobResponse, QueryError> {
        self.control(JobAction::Stop, job_id).await
    }

    pub async fn remove(&self, job_id: &str) -> Result<JobResponse, QueryError> {
        self.control(JobAction::Remove, job_id).await
    }

    fn url(&self, segments: &[&str]) -> Result<Url, QueryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                QueryError::Config(crate::domain::ConfigError::InvalidAddress(
                    self.base_url.to_string(),
                ))
            })?
            .clear()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> Result<JobResponse, QueryError> {
        let url = self.url(segments)?;
        let signed = self.builder.sign_empty(&self.credentials)?;
        debug!(url = %url, "job request");

        let response = self.transport.get(&url, &signed.headers).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::from_reqwest(e, 1))?;

        interpret(status.as_u16(), body)
    }
}

fn interpret(status: u16, body: String) -> Result<JobResponse, QueryError> {
    let probe_end = body
        .char_indices()
        .map(|(i, _)| i)
        .nth(ERROR_PROBE_LEN)
        .unwrap_or(body.len());
    let looks_failed = body[..probe_end].contains(ERROR_MARKER);

    if !(200..300).contains(&status) || looks_failed {
        return Err(QueryError::Job {
            status,
            error: body.trim().to_string(),
        });
    }

    Ok(match serde_json::from_str(&body) {
        Ok(value) => JobResponse::Json(value),
        Err(_) => JobResponse::Text(body),
    })
}
