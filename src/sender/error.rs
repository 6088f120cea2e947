use crate::domain::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Flusher error: {0}")]
    Flusher(String),

    #[error("Invalid tag '{0}': tags are non-empty ASCII without whitespace")]
    InvalidTag(String),

    #[error("Sender is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SenderError {
    /// Errors after which the socket must not be reused.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Send(_) | Self::Io(_) | Self::Tls(_))
    }
}
