//! Per-record output processors.

use super::error::QueryError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded record handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl Record {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Bytes(bytes) => bytes,
            Self::Json(value) => Bytes::from(value.to_string()),
        }
    }
}

/// Transformation applied to every non-padding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Processor {
    /// Trimmed text.
    #[default]
    Default,
    BytesToStr,
    StrToBytes,
    Json,
    JsonSimple,
    /// `object.d` of a `json/compact` body.
    #[serde(rename = "JSONCOMPACT_TO_ARRAY")]
    JsonCompactToArray,
    /// The `d` row of each `json/simple/compact` record; metadata is consumed.
    #[serde(rename = "JSONCOMPACTSIMPLE_TO_ARRAY")]
    JsonCompactSimpleToArray,
    /// Each `d` row zipped with the metadata's column names.
    #[serde(rename = "JSONCOMPACTSIMPLE_TO_OBJ")]
    JsonCompactSimpleToObj,
}

impl Processor {
    /// Whether a leading `{"m":...}` record is metadata to be consumed rather
    /// than yielded.
    pub fn consumes_metadata(self) -> bool {
        matches!(
            self,
            Self::JsonCompactSimpleToArray | Self::JsonCompactSimpleToObj
        )
    }

    /// Applies the processor to one raw record.
    ///
    /// For `JsonCompactSimpleToObj` this yields the row array; the decoder
    /// zips it with the columns it learned from the metadata record.
    pub fn apply(self, raw: &[u8]) -> Result<Record, QueryError> {
        match self {
            Self::Default => Ok(Record::Text(
                String::from_utf8_lossy(raw).trim().to_string(),
            )),
            Self::BytesToStr => Ok(Record::Text(String::from_utf8_lossy(raw).into_owned())),
            Self::StrToBytes => Ok(Record::Bytes(Bytes::copy_from_slice(raw))),
            Self::Json | Self::JsonSimple => parse_json(raw).map(Record::Json),
            Self::JsonCompactToArray => {
                let value = parse_json(raw)?;
                let rows = value
                    .get("object")
                    .and_then(|object| object.get("d"))
                    .cloned()
                    .ok_or_else(|| {
                        QueryError::Decode("json/compact body has no object.d".to_string())
                    })?;
                Ok(Record::Json(rows))
            }
            Self::JsonCompactSimpleToArray | Self::JsonCompactSimpleToObj => {
                let value = parse_json(raw)?;
                let row = value.get("d").cloned().ok_or_else(|| {
                    QueryError::Decode("json/simple/compact record has no d".to_string())
                })?;
                Ok(Record::Json(row))
            }
        }
    }
}

fn parse_json(raw: &[u8]) -> Result<Value, QueryError> {
    serde_json::from_slice(raw).map_err(|e| QueryError::Decode(e.to_string()))
}

/// Column names of a `{"m":{name:{type,index},...}}` record, ordered by index.
/// Returns `None` when `value` is not a metadata record.
pub fn metadata_columns(value: &Value) -> Option<Vec<String>> {
    let metadata = value.get("m")?.as_object()?;
    let mut columns: Vec<(u64, &String)> = metadata
        .iter()
        .map(|(name, column)| {
            let index = column
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(u64::MAX);
            (index, name)
        })
        .collect();
    columns.sort_by_key(|(index, _)| *index);
    Some(columns.into_iter().map(|(_, name)| name.clone()).collect())
}

/// Builds an object from parallel column names and row values.
pub fn zip_row(columns: &[String], row: Value) -> Value {
    let Value::Array(values) = row else {
        return row;
    };
    let object: Map<String, Value> = columns.iter().cloned().zip(values).collect();
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_trims() {
        assert_eq!(
            Processor::Default.apply(b"  a,b \r").unwrap(),
            Record::Text("a,b".to_string())
        );
    }

    #[test]
    fn encoding_coercions() {
        assert_eq!(
            Processor::BytesToStr.apply(b"caf\xc3\xa9").unwrap(),
            Record::Text("café".to_string())
        );
        assert_eq!(
            Processor::StrToBytes.apply(b"abc").unwrap(),
            Record::Bytes(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn json_compact_extracts_rows() {
        let body = br#"{"msg":"","status":0,"object":{"m":{"a":{"type":"str","index":0}},"d":[["x"],["y"]]}}"#;
        let record = Processor::JsonCompactToArray.apply(body).unwrap();
        assert_eq!(record, Record::Json(json!([["x"], ["y"]])));
    }

    #[test]
    fn metadata_columns_follow_index() {
        let meta = json!({"m": {
            "count": {"type": "int8", "index": 1},
            "eventdate": {"type": "timestamp", "index": 0}
        }});
        assert_eq!(
            metadata_columns(&meta).unwrap(),
            vec!["eventdate".to_string(), "count".to_string()]
        );
        assert!(metadata_columns(&json!({"d": [1]})).is_none());
    }

    #[test]
    fn zips_rows_into_objects() {
        let columns = vec!["eventdate".to_string(), "count".to_string()];
        assert_eq!(
            zip_row(&columns, json!([1659616680000_i64, 6])),
            json!({"eventdate": 1659616680000_i64, "count": 6})
        );
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(matches!(
            Processor::Json.apply(b"{not json"),
            Err(QueryError::Decode(_))
        ));
    }
}
