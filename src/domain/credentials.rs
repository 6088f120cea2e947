use super::error::ConfigError;
use std::fmt;

/// Authentication mode used against the query and job endpoints.
///
/// Exactly one mode is active. When several are supplied, key/secret wins
/// over a bearer token, which wins over a JWT.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey { key: String, secret: String },
    Token(String),
    Jwt(String),
}

impl Credentials {
    pub fn api_key(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::ApiKey {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn jwt(jwt: impl Into<String>) -> Self {
        Self::Jwt(jwt.into())
    }

    /// Picks the active mode from loosely supplied options (CLI flags, env, files).
    pub fn resolve(
        key: Option<String>,
        secret: Option<String>,
        token: Option<String>,
        jwt: Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        match (non_empty(key), non_empty(secret)) {
            (Some(key), Some(secret)) => return Ok(Self::ApiKey { key, secret }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "API key and API secret must be provided together".to_string(),
                ));
            }
            (None, None) => {}
        }

        if let Some(token) = non_empty(token) {
            return Ok(Self::Token(token));
        }
        if let Some(jwt) = non_empty(jwt) {
            return Ok(Self::Jwt(jwt));
        }

        Err(ConfigError::MissingCredentials)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "apikey",
            Self::Token(_) => "token",
            Self::Jwt(_) => "jwt",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { key, .. } => f
                .debug_struct("ApiKey")
                .field("key", key)
                .field("secret", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Self::Jwt(_) => f.debug_tuple("Jwt").field(&"<redacted>").finish(),
        }
    }
}
