use crate::domain::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Response formats understood by the query endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResponseFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "json/compact")]
    JsonCompact,
    #[serde(rename = "json/simple")]
    JsonSimple,
    #[default]
    #[serde(rename = "json/simple/compact")]
    JsonSimpleCompact,
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "tsv")]
    Tsv,
    #[serde(rename = "msgpack")]
    Msgpack,
    #[serde(rename = "xls")]
    Xls,
}

impl ResponseFormat {
    pub const ALL: [ResponseFormat; 8] = [
        Self::Json,
        Self::JsonCompact,
        Self::JsonSimple,
        Self::JsonSimpleCompact,
        Self::Csv,
        Self::Tsv,
        Self::Msgpack,
        Self::Xls,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::JsonCompact => "json/compact",
            Self::JsonSimple => "json/simple",
            Self::JsonSimpleCompact => "json/simple/compact",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Msgpack => "msgpack",
            Self::Xls => "xls",
        }
    }

    /// Whether the platform can deliver this format record by record.
    pub fn stream_available(self) -> bool {
        matches!(
            self,
            Self::JsonSimple | Self::JsonSimpleCompact | Self::Csv | Self::Tsv
        )
    }

    /// Whether the platform pads this format with keep-alive tokens.
    pub fn supports_keep_alive(self) -> bool {
        matches!(self, Self::Csv | Self::Tsv)
    }

    /// Binary formats are handed back untouched.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Msgpack | Self::Xls)
    }

    /// Formats whose body is a sequence of newline separated records.
    pub fn is_line_based(self) -> bool {
        self.stream_available()
    }

    pub fn field_delimiter(self) -> Option<char> {
        match self {
            Self::Csv => Some(','),
            Self::Tsv => Some('\t'),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| ConfigError::InvalidResponseFormat(s.to_string()))
    }
}

/// How keep-alive padding is recognised in a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeepAlive {
    /// The format carries no padding.
    NoKeepAlive,
    /// Empty or whitespace-only lines are padding.
    #[default]
    Default,
    /// Lines made only of field delimiters are padding.
    EmptyEvent,
    /// Lines starting with this token are padding; the token is stripped.
    Token(String),
}

impl KeepAlive {
    /// Applies the format's constraints to a requested policy.
    ///
    /// Formats without keep-alive support always end up with `NoKeepAlive`;
    /// the others default to `Default` when nothing was requested.
    pub fn normalize(requested: Option<KeepAlive>, format: ResponseFormat) -> KeepAlive {
        if !format.supports_keep_alive() {
            return KeepAlive::NoKeepAlive;
        }

        match requested {
            None => KeepAlive::Default,
            Some(KeepAlive::Token(token)) if token.is_empty() => KeepAlive::Default,
            Some(policy) => policy,
        }
    }
}

impl FromStr for KeepAlive {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NO_KEEPALIVE" | "no_keepalive" => Self::NoKeepAlive,
            "DEFAULT" | "default" => Self::Default,
            "EMPTY_EVENT" | "empty_event" => Self::EmptyEvent,
            token => Self::Token(token.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_availability() {
        let streamable: Vec<_> = ResponseFormat::ALL
            .into_iter()
            .filter(|f| f.stream_available())
            .collect();
        assert_eq!(
            streamable,
            vec![
                ResponseFormat::JsonSimple,
                ResponseFormat::JsonSimpleCompact,
                ResponseFormat::Csv,
                ResponseFormat::Tsv
            ]
        );
    }

    #[test]
    fn keep_alive_is_forced_off_for_json_and_binary() {
        for format in [
            ResponseFormat::Xls,
            ResponseFormat::Msgpack,
            ResponseFormat::Json,
            ResponseFormat::JsonCompact,
            ResponseFormat::JsonSimple,
            ResponseFormat::JsonSimpleCompact,
        ] {
            for requested in [
                None,
                Some(KeepAlive::Default),
                Some(KeepAlive::EmptyEvent),
                Some(KeepAlive::Token("TOKEN".into())),
            ] {
                assert_eq!(
                    KeepAlive::normalize(requested, format),
                    KeepAlive::NoKeepAlive
                );
            }
        }
    }

    #[test]
    fn keep_alive_is_preserved_for_csv_and_tsv() {
        for format in [ResponseFormat::Csv, ResponseFormat::Tsv] {
            assert_eq!(KeepAlive::normalize(None, format), KeepAlive::Default);
            assert_eq!(
                KeepAlive::normalize(Some(KeepAlive::Token("TOKEN".into())), format),
                KeepAlive::Token("TOKEN".into())
            );
            assert_eq!(
                KeepAlive::normalize(Some(KeepAlive::EmptyEvent), format),
                KeepAlive::EmptyEvent
            );
        }
    }

    #[test]
    fn formats_round_trip_through_strings() {
        for format in ResponseFormat::ALL {
            assert_eq!(format.as_str().parse::<ResponseFormat>().unwrap(), format);
        }
        assert!("json/extended".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn serializes_with_platform_names() {
        let json = serde_json::to_string(&ResponseFormat::JsonSimpleCompact).unwrap();
        assert_eq!(json, "\"json/simple/compact\"");
    }
}
