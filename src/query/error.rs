use crate::domain::ConfigError;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request failed with status {status}: {message}")]
    Request {
        status: u16,
        code: Option<i64>,
        cid: Option<String>,
        timestamp: Option<i64>,
        message: String,
        context: Option<Value>,
        cause: String,
    },

    #[error("Error {code} in response data: {message}")]
    DataResponse {
        code: i64,
        message: String,
        cause: String,
    },

    #[error("Failed to decode response record: {0}")]
    Decode(String),

    #[error("Job request failed with status {status}: {error}")]
    Job { status: u16, error: String },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

impl QueryError {
    pub(crate) fn from_reqwest(err: reqwest::Error, attempts: u32) -> Self {
        if err.is_connect() {
            QueryError::Connection {
                attempts,
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            QueryError::Timeout(err.to_string())
        } else {
            QueryError::Transport(err.to_string())
        }
    }

    /// Builds a `Request` error from a non-2xx response body.
    ///
    /// The body is expected to be `{msg|error, code, status, cid, timestamp, context}`;
    /// anything else becomes the message verbatim.
    pub fn from_error_body(status: u16, body: &str) -> Self {
        let cause = body.to_string();
        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return QueryError::Request {
                status,
                code: None,
                cid: None,
                timestamp: None,
                message: body.trim().to_string(),
                context: None,
                cause,
            };
        };

        let message = envelope
            .msg
            .filter(|m| !m.is_empty())
            .or_else(|| envelope.error.as_ref().map(value_to_text))
            .unwrap_or_else(|| body.trim().to_string());

        QueryError::Request {
            status: envelope
                .status
                .as_ref()
                .and_then(value_to_i64)
                .and_then(|s| u16::try_from(s).ok())
                .filter(|s| *s != 0)
                .unwrap_or(status),
            code: envelope.code.as_ref().and_then(value_to_i64),
            cid: envelope.cid,
            timestamp: envelope.timestamp.as_ref().and_then(value_to_i64),
            message,
            context: envelope.context,
            cause,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    msg: Option<String>,
    error: Option<Value>,
    code: Option<Value>,
    status: Option<Value>,
    cid: Option<String>,
    timestamp: Option<Value>,
    context: Option<Value>,
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_envelope() {
        let body = r#"{"msg":"Invalid token","code":12,"status":401,"cid":"abc","timestamp":1659617880000,"context":{"k":"v"}}"#;
        match QueryError::from_error_body(401, body) {
            QueryError::Request {
                status,
                code,
                cid,
                timestamp,
                message,
                context,
                ..
            } => {
                assert_eq!(status, 401);
                assert_eq!(code, Some(12));
                assert_eq!(cid.as_deref(), Some("abc"));
                assert_eq!(timestamp, Some(1_659_617_880_000));
                assert_eq!(message, "Invalid token");
                assert!(context.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_error_field() {
        let body = r#"{"error":"Query not found","code":"404"}"#;
        match QueryError::from_error_body(404, body) {
            QueryError::Request { message, code, .. } => {
                assert_eq!(message, "Query not found");
                assert_eq!(code, Some(404));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unusable_body_status_keeps_the_http_status() {
        for body in [
            r#"{"msg":"busy","status":0}"#,
            r#"{"msg":"busy","status":70000}"#,
            r#"{"msg":"busy","status":-1}"#,
        ] {
            match QueryError::from_error_body(503, body) {
                QueryError::Request { status, .. } => assert_eq!(status, 503, "{body}"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn non_json_body_becomes_message() {
        match QueryError::from_error_body(502, "Bad Gateway\n") {
            QueryError::Request {
                status,
                message,
                code,
                ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
                assert_eq!(code, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
