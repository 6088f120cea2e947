//! Date window values and their resolution to epoch milliseconds.
//!
//! A date is either a millisecond epoch, an ISO-like timestamp
//! (`YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, UTC) or an expression handed to a
//! [`DateResolver`]. [`BasicDateResolver`] covers the expressions used in
//! everyday queries (`now()-7*day()`, `today()+2*hour()`, ...).

use crate::domain::ConfigError;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    Millis(i64),
    Text(String),
}

impl From<i64> for DateValue {
    fn from(value: i64) -> Self {
        Self::Millis(value)
    }
}

impl From<&str> for DateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateValue,
    pub to: Option<DateValue>,
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            from: DateValue::Text("now()".to_string()),
            to: None,
        }
    }
}

/// Resolves a date expression to epoch milliseconds relative to `now_ms`.
pub trait DateResolver: Send + Sync + Debug {
    fn resolve(&self, expression: &str, now_ms: i64) -> Result<i64, ConfigError>;
}

/// Converts a [`DateValue`] to epoch milliseconds.
pub fn to_millis(
    value: &DateValue,
    resolver: &dyn DateResolver,
    now_ms: i64,
) -> Result<i64, ConfigError> {
    let text = match value {
        DateValue::Millis(ms) => return Ok(*ms),
        DateValue::Text(text) => text.trim(),
    };

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().map_err(|e| invalid_date(text, format!("{e}")));
    }

    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&datetime).timestamp_millis());
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(Utc.from_utc_datetime(&midnight).timestamp_millis());
    }

    resolver.resolve(text, now_ms)
}

fn invalid_date(value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDate {
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Arithmetic over `now()`, `today()`, `yesterday()` and the unit functions
/// `second() minute() hour() day() week()`, with integers, `+ - *` and
/// parentheses.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicDateResolver;

impl DateResolver for BasicDateResolver {
    fn resolve(&self, expression: &str, now_ms: i64) -> Result<i64, ConfigError> {
        let tokens = tokenize(expression)?;
        let mut parser = ExprParser {
            tokens: &tokens,
            pos: 0,
            now_ms,
            source: expression,
        };
        let value = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(invalid_date(expression, "unexpected trailing input"));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Function(String),
    Plus,
    Minus,
    Star,
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConfigError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse()
                    .map_err(|e| invalid_date(source, format!("{e}")))?;
                tokens.push(Token::Number(number));
            }
            a if a.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                // Functions are always called with an empty argument list.
                if chars.get(i) == Some(&'(') && chars.get(i + 1) == Some(&')') {
                    i += 2;
                } else {
                    return Err(invalid_date(source, format!("expected '()' after {name}")));
                }
                tokens.push(Token::Function(name.to_ascii_lowercase()));
            }
            other => {
                return Err(invalid_date(source, format!("unexpected character '{other}'")));
            }
        }
    }

    if tokens.is_empty() {
        return Err(invalid_date(source, "empty expression"));
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    now_ms: i64,
    source: &'a str,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<i64, ConfigError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value = value.saturating_add(self.term()?);
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value = value.saturating_sub(self.term()?);
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<i64, ConfigError> {
        let mut value = self.factor()?;
        while self.peek() == Some(&Token::Star) {
            self.pos += 1;
            value = value.saturating_mul(self.factor()?);
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64, ConfigError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(invalid_date(self.source, "missing closing parenthesis")),
                }
            }
            Some(Token::Function(name)) => self.function(&name),
            _ => Err(invalid_date(self.source, "unexpected end of expression")),
        }
    }

    fn function(&self, name: &str) -> Result<i64, ConfigError> {
        let today = self.now_ms - self.now_ms.rem_euclid(DAY_MS);
        match name {
            "now" => Ok(self.now_ms),
            "today" => Ok(today),
            "yesterday" => Ok(today - DAY_MS),
            "second" => Ok(SECOND_MS),
            "minute" => Ok(MINUTE_MS),
            "hour" => Ok(HOUR_MS),
            "day" => Ok(DAY_MS),
            "week" => Ok(WEEK_MS),
            other => Err(invalid_date(self.source, format!("unknown function {other}()"))),
        }
    }
}
