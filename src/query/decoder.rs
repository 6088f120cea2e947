//! Record classification for query responses.
//!
//! Every candidate record goes through [`LineDecoder::classify`], which tells
//! padding, metadata and in-band error envelopes apart from real records
//! before the processor sees them.

use super::error::QueryError;
use super::format::{KeepAlive, ResponseFormat};
use super::processor::{Processor, Record, metadata_columns, zip_row};
use bytes::Bytes;
use serde_json::Value;

const CSV_ERROR_PREFIX: &str = "devo.api.error";

/// Outcome of looking at one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Record(Record),
    /// Keep-alive filler, dropped.
    Padding,
    /// Metadata consumed by the decoder, not yielded.
    Metadata,
    Error {
        code: i64,
        message: String,
        raw: String,
    },
}

/// Stateful per-response decoder.
///
/// The only state is the column list learned from a metadata record when the
/// processor zips rows into objects.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    format: ResponseFormat,
    keep_alive: KeepAlive,
    processor: Processor,
    columns: Option<Vec<String>>,
}

impl LineDecoder {
    pub fn new(format: ResponseFormat, keep_alive: KeepAlive, processor: Processor) -> Self {
        Self {
            format,
            keep_alive: KeepAlive::normalize(Some(keep_alive), format),
            processor,
            columns: None,
        }
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Classifies one line (without its terminator).
    pub fn classify(&mut self, line: &[u8]) -> Result<Classified, QueryError> {
        let line = strip_cr(line);

        let Some(record) = self.strip_keep_alive(line) else {
            return Ok(Classified::Padding);
        };

        if let Some(error) = self.detect_line_error(record) {
            return Ok(error);
        }

        if self.processor.consumes_metadata() && record.starts_with(b"{\"m\"") {
            let value: Value = serde_json::from_slice(record)
                .map_err(|e| QueryError::Decode(e.to_string()))?;
            if let Some(columns) = metadata_columns(&value) {
                self.columns = Some(columns);
                return Ok(Classified::Metadata);
            }
        }

        let processed = self.processor.apply(record)?;
        match (self.processor, processed) {
            (Processor::JsonCompactSimpleToObj, Record::Json(row)) => {
                let columns = self.columns.as_deref().ok_or_else(|| {
                    QueryError::Decode("row received before column metadata".to_string())
                })?;
                Ok(Classified::Record(Record::Json(zip_row(columns, row))))
            }
            (_, processed) => Ok(Classified::Record(processed)),
        }
    }

    /// Decodes one line, turning in-band errors into `DataResponse` errors.
    pub fn decode_line(&mut self, line: &[u8]) -> Result<Option<Record>, QueryError> {
        match self.classify(line)? {
            Classified::Record(record) => Ok(Some(record)),
            Classified::Padding | Classified::Metadata => Ok(None),
            Classified::Error { code, message, raw } => Err(QueryError::DataResponse {
                code,
                message,
                cause: raw,
            }),
        }
    }

    /// Decodes a complete response body.
    pub fn decode_body(&mut self, body: Bytes) -> Result<Vec<Record>, QueryError> {
        if self.format.is_binary() {
            return Ok(vec![Record::Bytes(body)]);
        }

        if self.format.is_line_based() {
            let mut records = Vec::new();
            for line in body.split(|b| *b == b'\n') {
                if let Some(record) = self.decode_line(line)? {
                    records.push(record);
                }
            }
            return Ok(records);
        }

        if let Some(Classified::Error { code, message, raw }) = detect_body_error(&body) {
            return Err(QueryError::DataResponse {
                code,
                message,
                cause: raw,
            });
        }
        Ok(vec![self.processor.apply(&body)?])
    }

    /// Returns the record with keep-alive filler removed, or `None` when the
    /// whole line is filler.
    fn strip_keep_alive<'a>(&self, line: &'a [u8]) -> Option<&'a [u8]> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        match &self.keep_alive {
            KeepAlive::NoKeepAlive | KeepAlive::Default => Some(line),
            KeepAlive::EmptyEvent => {
                let delimiter = self.format.field_delimiter().map_or(b',', |d| d as u8);
                let only_delimiters = line
                    .iter()
                    .all(|b| *b == delimiter || b.is_ascii_whitespace());
                (!only_delimiters).then_some(line)
            }
            KeepAlive::Token(token) => {
                let token = token.as_bytes();
                let mut rest = line;
                while !token.is_empty() && rest.starts_with(token) {
                    rest = &rest[token.len()..];
                }
                (!rest.iter().all(u8::is_ascii_whitespace)).then_some(rest)
            }
        }
    }

    fn detect_line_error(&self, record: &[u8]) -> Option<Classified> {
        match self.format {
            ResponseFormat::Csv | ResponseFormat::Tsv => {
                let delimiter = self.format.field_delimiter().unwrap_or(',');
                detect_delimited_error(record, delimiter)
            }
            ResponseFormat::JsonSimple | ResponseFormat::JsonSimpleCompact => {
                detect_json_line_error(record)
            }
            _ => None,
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `devo.api.error<d><code><d><message>`
fn detect_delimited_error(record: &[u8], delimiter: char) -> Option<Classified> {
    let text = std::str::from_utf8(record).ok()?;
    let rest = text.strip_prefix(CSV_ERROR_PREFIX)?.strip_prefix(delimiter)?;
    let mut parts = rest.splitn(2, delimiter);
    let code = parts.next()?.trim().trim_matches('"').parse().ok()?;
    let message = parts.next().unwrap_or_default().trim().trim_matches('"');
    Some(Classified::Error {
        code,
        message: message.to_string(),
        raw: text.to_string(),
    })
}

/// `["error", code, message]` or `{"e": [code, message]}`
fn detect_json_line_error(record: &[u8]) -> Option<Classified> {
    let first = record.iter().find(|b| !b.is_ascii_whitespace())?;
    if *first != b'[' && *first != b'{' {
        return None;
    }

    let value: Value = serde_json::from_slice(record).ok()?;
    let (code, message) = match &value {
        Value::Array(items) if items.first().and_then(Value::as_str) == Some("error") => {
            (items.get(1)?, items.get(2))
        }
        Value::Object(object) => {
            let items = object.get("e")?.as_array()?;
            (items.first()?, items.get(1))
        }
        _ => return None,
    };

    Some(Classified::Error {
        code: value_code(code)?,
        message: message.map(value_text).unwrap_or_default(),
        raw: String::from_utf8_lossy(record).into_owned(),
    })
}

fn value_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Looks for an `"error":[code,msg]` / `"e":[code,msg]` envelope at the top
/// level of a non-streamed JSON body. The matching member becomes the cause.
pub fn detect_body_error(body: &[u8]) -> Option<Classified> {
    let Value::Object(object) = serde_json::from_slice::<Value>(body).ok()? else {
        return None;
    };

    ["error", "e"].into_iter().find_map(|key| {
        let items = object.get(key)?.as_array()?;
        let code = value_code(items.first()?)?;
        Some(Classified::Error {
            code,
            message: items.get(1).map(value_text).unwrap_or_default(),
            raw: format!("\"{key}\":{}", Value::Array(items.clone())),
        })
    })
}
