//! Domain layer for devo-sdk.
//!
//! Contains the types shared by the query client and the sender:
//! - `Credentials`: the single active authentication mode
//! - `Clock`: injected wall-clock collaborator
//! - `ConfigError` / `DevoError`: construction-time and top-level errors

pub mod clock;
pub mod credentials;
pub mod error;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use credentials::Credentials;
pub use error::{CertificateKind, ConfigError, DevoError};
