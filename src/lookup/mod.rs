//! Lookup table uploads: a START / DATA* / END session sent as ordinary
//! events on the `my.lookup.*` tags.

pub mod csv;
pub mod fields;
pub mod session;

pub use self::csv::CsvOptions;
pub use fields::{LookupValue, clean_field, headers_json, is_number, process_fields};
pub use session::{LookupAction, LookupSession};

use crate::sender::SenderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Sender(#[from] SenderError),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode lookup headers: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key column '{0}' not found in headers")]
    KeyNotFound(String),

    #[error("Key index {index} is out of range for {len} field(s)")]
    KeyIndexOutOfRange { index: usize, len: usize },

    #[error("Column '{0}' not found in headers")]
    ColumnNotFound(String),

    #[error("CSV source has no header row and no headers were supplied")]
    MissingHeaders,

    #[error("Lookup session already ended")]
    SessionEnded,

    #[error("Unknown lookup action '{0}'")]
    InvalidAction(String),
}
