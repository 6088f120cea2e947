//! Event sender for the ingestion endpoint.
//!
//! Events are framed syslog-style ([`framing`]), optionally batched and
//! gzip-compressed ([`buffer`], [`flusher`]) and written over a TLS or plain
//! TCP socket ([`connection`], [`tls`]).

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod flusher;
pub mod framing;
pub mod tls;

pub use buffer::{BufferConfig, CompressedBatch, SendBuffer};
pub use client::{SendOptions, Sender, SenderStats};
pub use config::{Address, SenderConfig, SenderOptions, SenderTcpConfig, SenderTlsConfig, VerifyMode};
pub use connection::Connection;
pub use error::SenderError;
pub use flusher::{FlushTask, Flusher};
pub use framing::{DEFAULT_TIMESTAMP, Event, Facility, Severity};

use std::future::Future;

/// Anything that accepts framed events; the lookup protocol drives one.
pub trait EventSink: Send + Sync {
    fn send_event(
        &self,
        event: Event,
        options: SendOptions,
    ) -> impl Future<Output = Result<usize, SenderError>> + Send;
}

impl EventSink for Sender {
    fn send_event(
        &self,
        event: Event,
        options: SendOptions,
    ) -> impl Future<Output = Result<usize, SenderError>> + Send {
        Sender::send_event(self, event, options)
    }
}
