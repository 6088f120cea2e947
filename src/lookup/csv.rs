//! CSV ingestion for lookup sessions.

use super::LookupError;
use super::fields::LookupValue;
use super::session::LookupSession;
use crate::sender::EventSink;
use ::csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
    /// The first row names the columns.
    pub has_headers: bool,
    /// Column names to use instead of the first row.
    pub headers: Option<Vec<String>>,
    /// Key column name; the first column when unset.
    pub key: Option<String>,
    pub key_type: String,
    /// Column whose truthy values send the row to the delete tag. The column
    /// itself is not uploaded.
    pub delete_column: Option<String>,
    /// Reject rows whose length differs from the header row.
    pub strict: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_headers: true,
            headers: None,
            key: None,
            key_type: "str".to_string(),
            delete_column: None,
            strict: false,
        }
    }
}

impl CsvOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type = key_type.into();
        self
    }

    pub fn with_delete_column(mut self, column: impl Into<String>) -> Self {
        self.delete_column = Some(column.into());
        self
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "t"
    )
}

/// Column layout resolved from the header row and the options.
#[derive(Debug)]
struct Layout {
    headers: Vec<String>,
    key_index: usize,
    delete_index: Option<usize>,
}

impl Layout {
    fn resolve(raw: Vec<String>, options: &CsvOptions) -> Result<Self, LookupError> {
        let delete_index = options
            .delete_column
            .as_ref()
            .map(|name| {
                raw.iter()
                    .position(|h| h == name)
                    .ok_or_else(|| LookupError::ColumnNotFound(name.clone()))
            })
            .transpose()?;

        let headers: Vec<String> = raw
            .into_iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != delete_index)
            .map(|(_, h)| h)
            .collect();

        let key_index = match &options.key {
            Some(key) => headers
                .iter()
                .position(|h| h == key)
                .ok_or_else(|| LookupError::KeyNotFound(key.clone()))?,
            None if headers.is_empty() => return Err(LookupError::MissingHeaders),
            None => 0,
        };

        Ok(Self {
            headers,
            key_index,
            delete_index,
        })
    }

    /// Splits a row into uploaded values and its delete flag.
    fn split(&self, record: &StringRecord) -> (Vec<LookupValue>, bool) {
        let delete = self
            .delete_index
            .and_then(|i| record.get(i))
            .is_some_and(is_truthy);
        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.delete_index)
            .map(|(_, field)| LookupValue::infer(field))
            .collect();
        (values, delete)
    }
}

/// Re-encodes a parsed row the way it appeared in the file.
fn raw_row(record: &StringRecord, options: &CsvOptions) -> Result<String, LookupError> {
    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(record)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| LookupError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

impl<S: EventSink> LookupSession<'_, S> {
    /// Uploads a CSV file as one session: START, a DATA row per record, END.
    /// Returns the number of DATA rows sent.
    pub async fn send_csv(
        &mut self,
        path: impl AsRef<Path>,
        options: &CsvOptions,
    ) -> Result<usize, LookupError> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        debug!(path = %path.display(), bytes = content.len(), "read lookup file");
        self.send_csv_reader(content.as_slice(), options).await
    }

    pub async fn send_csv_reader<R: Read + Send>(
        &mut self,
        source: R,
        options: &CsvOptions,
    ) -> Result<usize, LookupError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quote(options.quote)
            .has_headers(false)
            .flexible(!options.strict)
            .from_reader(source);
        let mut records = reader.records();

        let file_headers = if options.has_headers {
            records
                .next()
                .transpose()?
                .map(|row| row.iter().map(str::to_string).collect::<Vec<_>>())
        } else {
            None
        };
        let raw_headers = options
            .headers
            .clone()
            .or(file_headers)
            .ok_or(LookupError::MissingHeaders)?;
        let layout = Layout::resolve(raw_headers, options)?;

        self.send_headers(&layout.headers, layout.key_index, &options.key_type)
            .await?;

        let rows = async {
            let mut sent = 0;
            for record in records {
                let record = record?;
                let (values, delete) = layout.split(&record);
                if values.len() <= layout.key_index {
                    warn!(
                        lookup = %self.name(),
                        line = record.position().map_or(0, |p| p.line()),
                        "skipping row without a key column"
                    );
                    continue;
                }
                if self.historic_tag.is_some() {
                    self.send_historic(raw_row(&record, options)?).await?;
                }
                self.send_data_line(&values, layout.key_index, delete).await?;
                sent += 1;
            }
            Ok::<_, LookupError>(sent)
        }
        .await;

        // START went out, so the transaction is closed even when a row failed.
        let ended = self.send_end().await;
        let sent = match (rows, ended) {
            (Ok(sent), ended) => {
                ended?;
                sent
            }
            (Err(e), Err(end_error)) => {
                warn!(lookup = %self.name(), "could not end lookup after failure: {}", end_error);
                return Err(e);
            }
            (Err(e), Ok(())) => return Err(e),
        };
        info!(lookup = %self.name(), rows = sent, "lookup file uploaded");
        Ok(sent)
    }
}
