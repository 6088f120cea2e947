//! Query client for the platform's HTTP search API.
//!
//! [`RequestBuilder`] composes and signs the payload, [`HttpTransport`]
//! posts it with connection retries, and [`LineDecoder`] / [`RecordStream`]
//! turn the response into [`Record`]s through a [`Processor`].

pub mod client;
pub mod config;
pub mod dates;
pub mod decoder;
pub mod error;
pub mod format;
pub mod jobs;
pub mod processor;
pub mod request;
pub mod signing;
pub mod spec;
pub mod stream;
pub mod transport;

pub use client::{QueryClient, QueryResponse};
pub use config::QueryClientConfig;
pub use dates::{BasicDateResolver, DateRange, DateResolver, DateValue};
pub use decoder::{Classified, LineDecoder};
pub use error::QueryError;
pub use format::{KeepAlive, ResponseFormat};
pub use jobs::{JobAction, JobClient, JobFilter, JobResponse};
pub use processor::{Processor, Record};
pub use request::{RequestBuilder, SignedRequest};
pub use spec::QuerySpec;
pub use stream::RecordStream;
pub use transport::HttpTransport;
