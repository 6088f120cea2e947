mod cli;
pub mod file;
pub mod serde_helpers;

pub use cli::{
    Cli, Command, DEFAULT_TAG, LookupArgs, LookupInvocation, QueryArgs, QueryInvocation, SendArgs,
    SendInput, SendInvocation, SenderArgs,
};
pub use file::{ApiSection, FileConfig, FileProfile, LookupSection, SenderSection};

use crate::domain::ConfigError;

impl Cli {
    /// Config file tables for this run; empty when no file was given.
    pub fn file_profile(&self) -> Result<FileProfile, ConfigError> {
        match (&self.config, &self.env) {
            (Some(path), env) => FileConfig::from_file(path)?.profile(env.as_deref()),
            (None, Some(env)) => Err(ConfigError::Invalid(format!(
                "--env {env} needs a config file (--config or DEVO_CONFIG)"
            ))),
            (None, None) => Ok(FileProfile::default()),
        }
    }
}
