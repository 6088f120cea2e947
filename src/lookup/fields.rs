//! Field cleaning and header description for lookup rows.

use super::LookupError;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();

/// Integers and decimals with digits on both sides of the point.
pub fn is_number(value: &str) -> bool {
    NUMBER
        .get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// Doubles embedded quotes when `escape_quotes` is set.
pub fn clean_field(value: &str, escape_quotes: bool) -> String {
    if escape_quotes {
        value.replace('"', "\"\"")
    } else {
        value.to_string()
    }
}

/// A lookup cell. Numbers go on the wire literally, text is quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupValue {
    Text(String),
    Number(String),
}

impl LookupValue {
    /// Numeric-looking strings become numbers.
    pub fn infer(value: &str) -> Self {
        if is_number(value) {
            Self::Number(value.to_string())
        } else {
            Self::Text(value.to_string())
        }
    }

    pub fn render(&self, escape_quotes: bool) -> String {
        match self {
            Self::Number(number) => number.clone(),
            Self::Text(text) => format!("\"{}\"", clean_field(text, escape_quotes)),
        }
    }
}

impl From<&str> for LookupValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LookupValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for LookupValue {
    fn from(value: i64) -> Self {
        Self::Number(value.to_string())
    }
}

impl From<f64> for LookupValue {
    fn from(value: f64) -> Self {
        Self::Number(value.to_string())
    }
}

/// Renders a row with the key column moved to the front.
pub fn process_fields(
    fields: &[LookupValue],
    key_index: usize,
    escape_quotes: bool,
) -> Result<String, LookupError> {
    let key = fields.get(key_index).ok_or(LookupError::KeyIndexOutOfRange {
        index: key_index,
        len: fields.len(),
    })?;

    let rendered: Vec<String> = std::iter::once(key)
        .chain(
            fields
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != key_index)
                .map(|(_, field)| field),
        )
        .map(|field| field.render(escape_quotes))
        .collect();
    Ok(rendered.join(","))
}

#[derive(Debug, Serialize)]
struct ColumnSpec<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<bool>,
}

/// `[{"<key>":{"type":"<key_type>","key":true}},{"<col>":{"type":"str"}},...]`
/// with the key column first.
pub fn headers_json(
    headers: &[String],
    key_index: usize,
    key_type: &str,
) -> Result<String, LookupError> {
    let key = headers.get(key_index).ok_or(LookupError::KeyIndexOutOfRange {
        index: key_index,
        len: headers.len(),
    })?;

    let mut columns = vec![BTreeMap::from([(
        key.as_str(),
        ColumnSpec {
            kind: key_type,
            key: Some(true),
        },
    )])];
    columns.extend(
        headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != key_index)
            .map(|(_, name)| {
                BTreeMap::from([(
                    name.as_str(),
                    ColumnSpec {
                        kind: "str",
                        key: None,
                    },
                )])
            }),
    );

    Ok(serde_json::to_string(&columns)?)
}
