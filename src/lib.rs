// Specific pedantic lints enforced (not blanket allow):
#![warn(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_possible_wrap,       // Safe in non-negative contexts
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Error enums document themselves
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,  // e.g. QueryError in query module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

pub mod app;
pub mod domain;
pub mod lookup;
pub mod query;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use domain::{Clock, ConfigError, Credentials, DevoError, SystemClock};
pub use lookup::{CsvOptions, LookupAction, LookupError, LookupSession, LookupValue};
pub use query::{
    JobClient, KeepAlive, Processor, QueryClient, QueryClientConfig, QueryError, QueryResponse,
    QuerySpec, Record, ResponseFormat,
};
pub use sender::{
    Address, Event, EventSink, SendOptions, Sender, SenderConfig, SenderError, SenderOptions,
    SenderTcpConfig, SenderTlsConfig, VerifyMode,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
