//! Syslog-style framing of events for the ingestion endpoint.
//!
//! `<PRI>TIMESTAMP HOSTNAME TAG: BODY\n`, optionally length-prefixed so a
//! single event may span several lines.

use super::error::SenderError;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Used when the caller gives no timestamp; the platform stamps on arrival.
pub const DEFAULT_TIMESTAMP: &str = "Jan  1 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Facility {
    Kern = 0,
    #[default]
    User = 1,
    Mail = 2,
    Daemon = 3,
    Auth = 4,
    Syslog = 5,
    Lpr = 6,
    News = 7,
    Uucp = 8,
    Cron = 9,
    AuthPriv = 10,
    Ftp = 11,
    Local0 = 16,
    Local1 = 17,
    Local2 = 18,
    Local3 = 19,
    Local4 = 20,
    Local5 = 21,
    Local6 = 22,
    Local7 = 23,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    #[default]
    Info = 6,
    Debug = 7,
}

/// `facility * 8 + severity`
pub fn priority(facility: Facility, severity: Severity) -> u8 {
    (facility as u8) * 8 + severity as u8
}

/// Formats a time the way syslog headers expect (`Aug  4 12:38:00`).
pub fn syslog_timestamp(time: DateTime<Utc>) -> String {
    time.format("%b %e %H:%M:%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub tag: String,
    pub body: Bytes,
    pub timestamp: Option<String>,
    pub hostname: Option<String>,
    pub facility: Facility,
    pub severity: Severity,
}

impl Event {
    pub fn new(tag: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            body: body.into(),
            timestamp: None,
            hostname: None,
            facility: Facility::default(),
            severity: Severity::default(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = facility;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

pub fn validate_tag(tag: &str) -> Result<(), SenderError> {
    let valid = !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii() && !b.is_ascii_whitespace() && !b.is_ascii_control());
    if valid {
        Ok(())
    } else {
        Err(SenderError::InvalidTag(tag.to_string()))
    }
}

/// Frames one event, terminated by exactly one `\n`.
pub fn frame(event: &Event, default_hostname: &str) -> Result<Bytes, SenderError> {
    validate_tag(&event.tag)?;

    let timestamp = event.timestamp.as_deref().unwrap_or(DEFAULT_TIMESTAMP);
    let hostname = event.hostname.as_deref().unwrap_or(default_hostname);
    let header = format!(
        "<{}>{} {} {}: ",
        priority(event.facility, event.severity),
        timestamp,
        hostname,
        event.tag
    );

    let mut framed = BytesMut::with_capacity(header.len() + event.body.len() + 1);
    framed.put_slice(header.as_bytes());
    framed.put_slice(&event.body);
    if !event.body.ends_with(b"\n") {
        framed.put_u8(b'\n');
    }
    Ok(framed.freeze())
}

/// Prefixes a framed record with its byte length: `"<len> <framed>"`.
pub fn multiline(framed: &[u8]) -> Bytes {
    let prefix = format!("{} ", framed.len());
    let mut record = BytesMut::with_capacity(prefix.len() + framed.len());
    record.put_slice(prefix.as_bytes());
    record.put_slice(framed);
    record.freeze()
}
