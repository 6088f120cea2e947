use super::buffer::BufferConfig;
use crate::domain::{ConfigError, SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SENDER_HOST: &str = "collector-eu.devo.io";
pub const DEFAULT_SENDER_PORT: u16 = 443;

/// Ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Builds an address from a host and a textual port, as found in
    /// environment variables and config files.
    pub fn parse(host: &str, port: &str) -> Result<Self, ConfigError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidAddress("host is empty".to_string()));
        }
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER_HOST, DEFAULT_SENDER_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How the server certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    None,
    Optional,
    #[default]
    Required,
}

impl FromStr for VerifyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "cert_none" | "0" => Ok(Self::None),
            "optional" | "cert_optional" | "1" => Ok(Self::Optional),
            "required" | "cert_required" | "2" => Ok(Self::Required),
            other => Err(ConfigError::Invalid(format!("unknown verify mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderTlsConfig {
    pub address: Address,
    pub key: PathBuf,
    pub cert: PathBuf,
    /// CA bundle used both as trust roots and as the chain sent with the
    /// client certificate.
    pub chain: Option<PathBuf>,
    /// OpenSSL-style security level; 4 and above only allow TLS 1.3.
    pub security_level: u8,
    pub check_hostname: bool,
    pub verify_mode: VerifyMode,
    /// Check the key, certificate, chain and peer before the first connect.
    pub verify_config: bool,
}

impl SenderTlsConfig {
    pub fn new(
        address: Address,
        key: impl Into<PathBuf>,
        cert: impl Into<PathBuf>,
        chain: Option<PathBuf>,
    ) -> Self {
        Self {
            address,
            key: key.into(),
            cert: cert.into(),
            chain,
            security_level: 2,
            check_hostname: true,
            verify_mode: VerifyMode::Required,
            verify_config: false,
        }
    }

    pub fn with_verify_mode(mut self, verify_mode: VerifyMode) -> Self {
        self.verify_mode = verify_mode;
        self
    }

    pub fn with_check_hostname(mut self, check_hostname: bool) -> Self {
        self.check_hostname = check_hostname;
        self
    }

    pub fn with_verify_config(mut self, verify_config: bool) -> Self {
        self.verify_config = verify_config;
        self
    }

    pub fn with_security_level(mut self, security_level: u8) -> Self {
        self.security_level = security_level;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SenderTcpConfig {
    pub address: Address,
}

impl SenderTcpConfig {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SenderConfig {
    Tls(SenderTlsConfig),
    Tcp(SenderTcpConfig),
}

impl SenderConfig {
    pub fn address(&self) -> &Address {
        match self {
            Self::Tls(tls) => &tls.address,
            Self::Tcp(tcp) => &tcp.address,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.address();
        if address.host.trim().is_empty() {
            return Err(ConfigError::InvalidAddress("host is empty".to_string()));
        }
        if address.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        Ok(())
    }
}

/// Behavioural options shared by both transports.
#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub buffer: BufferConfig,
    /// Flusher period and the age at which buffered events are shipped.
    pub buffer_timeout: Duration,
    /// Sockets older than this are replaced before the next write.
    pub max_connection_age: Duration,
    /// Connect at construction instead of on the first send.
    pub connect_eagerly: bool,
    /// Hostname written in framed events; the local hostname when unset.
    pub hostname: Option<String>,
    pub clock: SharedClock,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            buffer_timeout: Duration::from_secs(6),
            max_connection_age: Duration::from_millis(3_600_000),
            connect_eagerly: true,
            hostname: None,
            clock: SystemClock::shared(),
        }
    }
}

impl SenderOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.buffer.validate()?;
        if self.buffer_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "buffer timeout must be positive".to_string(),
            ));
        }
        if self.max_connection_age.is_zero() {
            return Err(ConfigError::Invalid(
                "max connection age must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Hostname to stamp on events.
    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(local_hostname)
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
