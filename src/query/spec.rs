use super::dates::{DateRange, DateValue};
use super::format::{KeepAlive, ResponseFormat};
use crate::domain::ConfigError;
use serde_json::{Map, Value};

/// What to run and how the result should come back.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub query: Option<String>,
    pub query_id: Option<String>,
    pub dates: DateRange,
    pub response: ResponseFormat,
    pub stream: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Forwarded to the platform untouched.
    pub destination: Option<Map<String, Value>>,
    pub comment: Option<String>,
    pub keep_alive: Option<KeepAlive>,
    /// Render IP columns as dotted strings instead of integers.
    pub ip_as_string: bool,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            query: None,
            query_id: None,
            dates: DateRange::default(),
            response: ResponseFormat::default(),
            stream: true,
            limit: None,
            offset: None,
            destination: None,
            comment: None,
            keep_alive: None,
            ip_as_string: false,
        }
    }
}

impl QuerySpec {
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn query_id(id: impl Into<String>) -> Self {
        Self {
            query_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn from(mut self, from: impl Into<DateValue>) -> Self {
        self.dates.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<DateValue>) -> Self {
        self.dates.to = Some(to.into());
        self
    }

    pub fn response(mut self, response: ResponseFormat) -> Self {
        self.response = response;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn destination(mut self, destination: Map<String, Value>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn ip_as_string(mut self, ip_as_string: bool) -> Self {
        self.ip_as_string = ip_as_string;
        self
    }

    /// Keep-alive policy after applying the response format's constraints.
    pub fn effective_keep_alive(&self) -> KeepAlive {
        KeepAlive::normalize(self.keep_alive.clone(), self.response)
    }

    /// Whether the response will be consumed record by record.
    pub fn is_streaming(&self) -> bool {
        self.stream && self.response.stream_available()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_text = self.query.as_deref().is_some_and(|q| !q.trim().is_empty());
        let has_id = self.query_id.as_deref().is_some_and(|q| !q.trim().is_empty());
        match (has_text, has_id) {
            (true, true) => Err(ConfigError::QueryAndQueryId),
            (false, false) => Err(ConfigError::MissingQuery),
            _ => Ok(()),
        }
    }
}
