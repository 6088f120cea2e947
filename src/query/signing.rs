//! Authentication headers for the query and job endpoints.

use super::error::QueryError;
use crate::domain::Credentials;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "x-logtrust-apikey";
pub const HEADER_TIMESTAMP: &str = "x-logtrust-timestamp";
pub const HEADER_SIGN: &str = "x-logtrust-sign";

/// `HEX(HMAC-SHA256(secret, key || body || timestamp))`.
pub fn sign(key: &str, secret: &str, body: &str, timestamp: &str) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
    mac.update(key.as_bytes());
    mac.update(body.as_bytes());
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Headers for a request whose serialized body is `body`, signed at `timestamp_ms`.
pub fn auth_headers(
    credentials: &Credentials,
    body: &str,
    timestamp_ms: i64,
) -> Result<HeaderMap, QueryError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match credentials {
        Credentials::ApiKey { key, secret } => {
            let timestamp = timestamp_ms.to_string();
            let signature = sign(key, secret, body, &timestamp);
            headers.insert(HeaderName::from_static(HEADER_API_KEY), header_value(key)?);
            headers.insert(
                HeaderName::from_static(HEADER_TIMESTAMP),
                header_value(&timestamp)?,
            );
            headers.insert(HeaderName::from_static(HEADER_SIGN), header_value(&signature)?);
        }
        Credentials::Token(token) => {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }
        Credentials::Jwt(jwt) => {
            headers.insert(AUTHORIZATION, header_value(&format!("jwt {jwt}"))?);
        }
    }

    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, QueryError> {
    HeaderValue::from_str(value).map_err(|e| QueryError::InvalidHeaderValue(e.to_string()))
}
