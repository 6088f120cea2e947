use crate::lookup::LookupError;
use crate::query::QueryError;
use crate::sender::SenderError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which piece of TLS material a certificate error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    Key,
    Cert,
    Chain,
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Key => "key",
            Self::Cert => "certificate",
            Self::Chain => "chain",
        };
        f.write_str(name)
    }
}

/// Errors raised synchronously while building a client or a request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No credentials configured: provide an API key and secret, a token or a JWT")]
    MissingCredentials,
    #[error("Query text and query id are mutually exclusive")]
    QueryAndQueryId,
    #[error("Either a query text or a query id is required")]
    MissingQuery,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Invalid date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },
    #[error("Response format '{0}' does not support queries ending in the future")]
    FutureQueriesNotSupported(String),
    #[error("Invalid response format '{0}'")]
    InvalidResponseFormat(String),
    #[error("Cannot use {kind} file {}: {reason}", .path.display())]
    CertificateFile {
        kind: CertificateKind,
        path: PathBuf,
        reason: String,
    },
    #[error("Certificate and private key do not match: {0}")]
    KeyMismatch(String),
    #[error("Certificate is not validated by the configured chain: {0}")]
    ChainMismatch(String),
    #[error("Peer certificate at {address} is incompatible with the local chain: {reason}")]
    IncompatiblePeer { address: String, reason: String },
    #[error("Cannot load config file {}: {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error type, used by the binary to pick an exit code.
#[derive(Error, Debug)]
pub enum DevoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Sender(#[from] SenderError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevoError {
    /// True when the failure stems from invalid configuration rather than the
    /// network or the platform.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Query(e) => matches!(e, QueryError::Config(_)),
            Self::Sender(e) => matches!(e, SenderError::Config(_)),
            Self::Lookup(e) => matches!(
                e,
                LookupError::Sender(SenderError::Config(_))
                    | LookupError::KeyNotFound(_)
                    | LookupError::ColumnNotFound(_)
                    | LookupError::MissingHeaders
                    | LookupError::InvalidAction(_)
            ),
            Self::Io(_) => false,
        }
    }
}
