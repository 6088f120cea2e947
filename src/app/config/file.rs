//! TOML configuration file.
//!
//! ```toml
//! [api]
//! address = "api-us.devo.com"
//! key = "..."
//! secret = "..."
//!
//! [sender]
//! address = "collector-us.devo.io"
//! port = 443
//! key = "/etc/devo/client.key"
//! cert = "/etc/devo/client.crt"
//! chain = "/etc/devo/chain.crt"
//!
//! [env.staging.api]
//! address = "api-staging.example.com"
//! ```
//!
//! Tables under `[env.<name>]` override the top-level ones when the command
//! runs with `--env <name>`.

use crate::domain::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

macro_rules! overlay {
    ($top:expr, $base:expr, $($field:ident),+ $(,)?) => {
        Self {
            $($field: $top.$field.or($base.$field),)+
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSection {
    pub address: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub token: Option<String>,
    pub jwt: Option<String>,
    pub user: Option<String>,
    pub app_name: Option<String>,
    pub comment: Option<String>,
    pub retries: Option<u32>,
    /// Seconds.
    pub timeout: Option<u64>,
    pub response: Option<String>,
    pub stream: Option<bool>,
}

impl ApiSection {
    fn overlay(self, base: Self) -> Self {
        overlay!(
            self, base, address, key, secret, token, jwt, user, app_name, comment, retries,
            timeout, response, stream,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SenderSection {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub chain: Option<PathBuf>,
    pub verify_mode: Option<String>,
    pub check_hostname: Option<bool>,
    pub verify_config: Option<bool>,
    pub tag: Option<String>,
    pub buffer: Option<usize>,
    pub compression_level: Option<i32>,
    pub hostname: Option<String>,
}

impl SenderSection {
    fn overlay(self, base: Self) -> Self {
        overlay!(
            self,
            base,
            address,
            port,
            key,
            cert,
            chain,
            verify_mode,
            check_hostname,
            verify_config,
            tag,
            buffer,
            compression_level,
            hostname,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LookupSection {
    pub name: Option<String>,
    pub action: Option<String>,
    pub file: Option<PathBuf>,
    pub lkey: Option<String>,
    pub dkey: Option<String>,
    pub key_type: Option<String>,
    pub delimiter: Option<char>,
    pub quotechar: Option<char>,
    pub escape_quotes: Option<bool>,
    pub historic_tag: Option<String>,
    /// Milliseconds.
    pub delay: Option<u64>,
}

impl LookupSection {
    fn overlay(self, base: Self) -> Self {
        overlay!(
            self,
            base,
            name,
            action,
            file,
            lkey,
            dkey,
            key_type,
            delimiter,
            quotechar,
            escape_quotes,
            historic_tag,
            delay,
        )
    }
}

/// One set of `[api]`, `[sender]` and `[lookup]` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProfile {
    pub api: ApiSection,
    pub sender: SenderSection,
    pub lookup: LookupSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api: ApiSection,
    pub sender: SenderSection,
    pub lookup: LookupSection,
    pub env: BTreeMap<String, FileProfile>,
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Invalid(reason) => ConfigError::ConfigFile {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The effective tables for `env`, or the top-level ones when unset.
    pub fn profile(&self, env: Option<&str>) -> Result<FileProfile, ConfigError> {
        let base = FileProfile {
            api: self.api.clone(),
            sender: self.sender.clone(),
            lookup: self.lookup.clone(),
        };
        let Some(name) = env else {
            return Ok(base);
        };
        let profile = self
            .env
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::Invalid(format!("no [env.{name}] section in config file")))?;

        Ok(FileProfile {
            api: profile.api.overlay(base.api),
            sender: profile.sender.overlay(base.sender),
            lookup: profile.lookup.overlay(base.lookup),
        })
    }
}
