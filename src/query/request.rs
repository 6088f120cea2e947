use super::dates::{BasicDateResolver, DateResolver, to_millis};
use super::error::QueryError;
use super::format::KeepAlive;
use super::signing::auth_headers;
use super::spec::QuerySpec;
use crate::domain::{ConfigError, Credentials, SharedClock, SystemClock};
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Serialized body plus the headers that authenticate it.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub body: String,
    pub headers: HeaderMap,
    pub timestamp_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryPayload<'a> {
    from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<i64>,
    mode: Mode<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ip_as_string: bool,
}

#[derive(Debug, Serialize)]
struct Mode<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Turns a [`QuerySpec`] into the JSON body and signed headers of a query.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    user: String,
    app_name: String,
    resolver: Arc<dyn DateResolver>,
    clock: SharedClock,
}

impl RequestBuilder {
    pub fn new(user: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            app_name: app_name.into(),
            resolver: Arc::new(BasicDateResolver),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DateResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Query text with the attribution pragmas appended.
    pub fn query_text(&self, query: &str, comment: Option<&str>) -> String {
        let mut text = format!(
            "{query} pragma comment.id:\"{}\" pragma comment.user:\"{}\"",
            self.app_name, self.user
        );
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            text.push_str(&format!(" pragma comment.free:\"{comment}\""));
        }
        text
    }

    /// Builds the request payload as of `now_ms`.
    pub fn build_payload(&self, spec: &QuerySpec, now_ms: i64) -> Result<Value, ConfigError> {
        spec.validate()?;

        let from_ms = to_millis(&spec.dates.from, self.resolver.as_ref(), now_ms)?;
        let to_ms = match &spec.dates.to {
            Some(to) => Some(to_millis(to, self.resolver.as_ref(), now_ms)?),
            None if !spec.stream => Some(now_ms),
            None => None,
        };

        if let Some(to_ms) = to_ms
            && to_ms > now_ms
            && spec.effective_keep_alive() == KeepAlive::NoKeepAlive
        {
            return Err(ConfigError::FutureQueriesNotSupported(
                spec.response.to_string(),
            ));
        }

        let payload = QueryPayload {
            from: from_ms.div_euclid(1000),
            to: to_ms.map(|ms| ms.div_euclid(1000)),
            mode: Mode {
                kind: spec.response.as_str(),
            },
            query: spec
                .query
                .as_deref()
                .map(|q| self.query_text(q, spec.comment.as_deref())),
            query_id: spec.query_id.as_deref(),
            limit: spec.limit,
            offset: spec.offset,
            destination: spec.destination.as_ref(),
            ip_as_string: spec.ip_as_string,
        };

        serde_json::to_value(&payload).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Builds and signs a query request at the current clock time.
    pub fn build(
        &self,
        spec: &QuerySpec,
        credentials: &Credentials,
    ) -> Result<SignedRequest, QueryError> {
        let now_ms = self.clock.now_millis();
        let body = self.build_payload(spec, now_ms)?.to_string();
        let headers = auth_headers(credentials, &body, now_ms)?;
        Ok(SignedRequest {
            body,
            headers,
            timestamp_ms: now_ms,
        })
    }

    /// Signs an empty-bodied request, as used by the job endpoints.
    pub fn sign_empty(&self, credentials: &Credentials) -> Result<SignedRequest, QueryError> {
        let now_ms = self.clock.now_millis();
        let headers = auth_headers(credentials, "", now_ms)?;
        Ok(SignedRequest {
            body: String::new(),
            headers,
            timestamp_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FixedClock;
    use crate::query::format::ResponseFormat;
    use crate::query::signing::{HEADER_SIGN, HEADER_TIMESTAMP, sign};

    // 2022-08-04 12:38:00 UTC
    const NOW: i64 = 1_659_616_680_000;

    fn builder() -> RequestBuilder {
        RequestBuilder::new("alice", "reports").with_clock(Arc::new(FixedClock::new(NOW)))
    }

    #[test]
    fn payload_for_query_text() {
        let spec = QuerySpec::query("from demo.ecommerce.data select *")
            .from("now()-7*day()")
            .to("now()");
        let payload = builder().build_payload(&spec, NOW).unwrap();

        assert_eq!(payload["from"], NOW / 1000 - 7 * 86_400);
        assert_eq!(payload["to"], NOW / 1000);
        assert_eq!(payload["mode"]["type"], "json/simple/compact");
        assert!(payload["query"].as_str().unwrap().starts_with("from demo.ecommerce.data"));
        assert!(payload.get("queryId").is_none());
        assert!(payload.get("limit").is_none());
        assert!(payload.get("ipAsString").is_none());
    }

    #[test]
    fn payload_for_query_id() {
        let spec = QuerySpec::query_id("X").limit(10).offset(5);
        let payload = builder().build_payload(&spec, NOW).unwrap();

        assert_eq!(payload["queryId"], "X");
        assert!(payload.get("query").is_none());
        assert_eq!(payload["limit"], 10);
        assert_eq!(payload["offset"], 5);
    }

    #[test]
    fn pragmas_are_appended() {
        let spec = QuerySpec::query("from a select b").comment("weekly");
        let payload = builder().build_payload(&spec, NOW).unwrap();
        assert_eq!(
            payload["query"],
            "from a select b pragma comment.id:\"reports\" pragma comment.user:\"alice\" pragma comment.free:\"weekly\""
        );
    }

    #[test]
    fn unary_requests_default_to_now() {
        let spec = QuerySpec::query("q").stream(false);
        let payload = builder().build_payload(&spec, NOW).unwrap();
        assert_eq!(payload["to"], NOW / 1000);

        let spec = QuerySpec::query("q");
        let payload = builder().build_payload(&spec, NOW).unwrap();
        assert!(payload.get("to").is_none());
    }

    #[test]
    fn future_window_requires_keep_alive() {
        let spec = QuerySpec::query("q").to("now()+1*hour()");
        assert!(matches!(
            builder().build_payload(&spec, NOW),
            Err(ConfigError::FutureQueriesNotSupported(_))
        ));

        let spec = spec.response(ResponseFormat::Csv);
        assert!(builder().build_payload(&spec, NOW).is_ok());
    }

    #[test]
    fn destination_is_forwarded() {
        let mut destination = Map::new();
        destination.insert("type".into(), Value::from("email"));
        let spec = QuerySpec::query("q").destination(destination);
        let payload = builder().build_payload(&spec, NOW).unwrap();
        assert_eq!(payload["destination"]["type"], "email");
    }

    #[test]
    fn build_signs_the_serialized_body() {
        let spec = QuerySpec::query("q");
        let request = builder()
            .build(&spec, &Credentials::api_key("K", "S"))
            .unwrap();

        assert_eq!(request.headers[HEADER_TIMESTAMP], NOW.to_string().as_str());
        assert_eq!(
            request.headers[HEADER_SIGN],
            sign("K", "S", &request.body, &NOW.to_string()).as_str()
        );
    }
}
