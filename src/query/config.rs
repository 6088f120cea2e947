use crate::domain::{ConfigError, Credentials};
use crate::reliability::RetryConfig;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ADDRESS: &str = "api-eu.devo.com";
pub const DEFAULT_QUERY_PATH: &str = "/search/query";
pub const DEFAULT_USER: &str = "devo-sdk-user";
pub const DEFAULT_APP_NAME: &str = "devo-sdk-app";

#[derive(Debug, Clone)]
pub struct QueryClientConfig {
    /// `host`, `host/path` or a full `http(s)://` URL. The path defaults to
    /// `/search/query`.
    pub address: String,
    pub credentials: Credentials,
    /// Reported through the `comment.user` pragma.
    pub user: String,
    /// Reported through the `comment.id` pragma.
    pub app_name: String,
    /// Per-attempt timeout for unary requests.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    pub user_agent: String,
}

impl QueryClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            credentials,
            user: DEFAULT_USER.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            user_agent: format!("devo-sdk/{}", crate::VERSION),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full URL of the query endpoint.
    pub fn query_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.parse_address()?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(DEFAULT_QUERY_PATH);
        }
        Ok(url)
    }

    /// Scheme, host and port of the platform, used for the job endpoints.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.parse_address()?;
        url.set_path("/");
        url.set_query(None);
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.query_url()?;
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retries must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    fn parse_address(&self) -> Result<Url, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::InvalidAddress("address is empty".to_string()));
        }

        let candidate = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("https://{address}")
        };

        let url: Url = candidate
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(format!("{address}: {e}")))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidAddress(format!("{address}: missing host")));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(address: &str) -> QueryClientConfig {
        QueryClientConfig::new(Credentials::token("t")).with_address(address)
    }

    #[test]
    fn default_address_gets_query_path() {
        let url = QueryClientConfig::new(Credentials::token("t")).query_url().unwrap();
        assert_eq!(url.as_str(), "https://api-eu.devo.com/search/query");
    }

    #[test]
    fn explicit_path_and_scheme_are_kept() {
        let url = config("api-us.devo.com/search/query").query_url().unwrap();
        assert_eq!(url.as_str(), "https://api-us.devo.com/search/query");

        let url = config("http://127.0.0.1:8080").query_url().unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/search/query");

        let base = config("http://127.0.0.1:8080/search/query").base_url().unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(matches!(
            config("").query_url(),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(config("https://").query_url().is_err());
    }
}
