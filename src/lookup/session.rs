use super::LookupError;
use super::fields::{LookupValue, headers_json, process_fields};
use crate::domain::{Clock, SystemClock};
use crate::sender::{Event, EventSink, SendOptions};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupAction {
    /// Replace the whole table.
    #[default]
    Full,
    /// Add, update or delete individual rows.
    Inc,
}

impl LookupAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Inc => "INC",
        }
    }
}

impl fmt::Display for LookupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupAction {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "INC" => Ok(Self::Inc),
            _ => Err(LookupError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Started,
    Ended,
}

/// One transactional upload of a lookup table.
pub struct LookupSession<'a, S: EventSink> {
    sink: &'a S,
    name: String,
    id: String,
    action: LookupAction,
    delay: Duration,
    escape_quotes: bool,
    pub(crate) historic_tag: Option<String>,
    headers: Option<String>,
    phase: Phase,
}

impl<'a, S: EventSink> LookupSession<'a, S> {
    pub fn new(sink: &'a S, name: impl Into<String>, action: LookupAction) -> Self {
        Self::with_clock(sink, name, action, &SystemClock)
    }

    /// The session id is the clock's current millisecond timestamp.
    pub fn with_clock(
        sink: &'a S,
        name: impl Into<String>,
        action: LookupAction,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            sink,
            name: name.into(),
            id: clock.now_millis().to_string(),
            action,
            delay: Duration::from_secs(5),
            escape_quotes: false,
            historic_tag: None,
            headers: None,
            phase: Phase::Open,
        }
    }

    /// Pause after START and before END.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_escape_quotes(mut self, escape_quotes: bool) -> Self {
        self.escape_quotes = escape_quotes;
        self
    }

    /// Also send every CSV row, as read, to this tag.
    pub fn with_historic_tag(mut self, tag: impl Into<String>) -> Self {
        self.historic_tag = Some(tag.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> LookupAction {
        self.action
    }

    pub fn escape_quotes(&self) -> bool {
        self.escape_quotes
    }

    pub fn control_tag(&self) -> String {
        format!("my.lookup.control.{}.{}", self.name, self.action)
    }

    pub fn data_tag(&self, delete: bool) -> String {
        if delete {
            format!("my.lookup.data.{}.DELETE", self.name)
        } else {
            format!("my.lookup.data.{}", self.name)
        }
    }

    fn prefix(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    fn ensure_not_ended(&self) -> Result<(), LookupError> {
        if self.phase == Phase::Ended {
            Err(LookupError::SessionEnded)
        } else {
            Ok(())
        }
    }

    /// Sends the START control record describing the columns, then waits.
    pub async fn send_headers(
        &mut self,
        headers: &[String],
        key_index: usize,
        key_type: &str,
    ) -> Result<(), LookupError> {
        self.ensure_not_ended()?;
        let headers = headers_json(headers, key_index, key_type)?;
        let body = format!("{}|START|{}", self.prefix(), headers);

        self.sink
            .send_event(Event::new(self.control_tag(), body), SendOptions::default())
            .await?;
        info!(lookup = %self.name, session = %self.id, action = %self.action, "lookup started");

        self.headers = Some(headers);
        self.phase = Phase::Started;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    /// Sends one DATA row, to the delete tag when `delete` is set.
    pub async fn send_data_line(
        &mut self,
        fields: &[LookupValue],
        key_index: usize,
        delete: bool,
    ) -> Result<usize, LookupError> {
        self.ensure_not_ended()?;
        let row = process_fields(fields, key_index, self.escape_quotes)?;
        let body = format!("{}|{}", self.prefix(), row);
        let sent = self
            .sink
            .send_event(Event::new(self.data_tag(delete), body), SendOptions::default())
            .await?;
        Ok(sent)
    }

    /// Waits, then sends the END control record. The session is unusable
    /// afterwards.
    pub async fn send_end(&mut self) -> Result<(), LookupError> {
        self.ensure_not_ended()?;
        tokio::time::sleep(self.delay).await;

        let body = format!(
            "{}|END|{}",
            self.prefix(),
            self.headers.as_deref().unwrap_or_default()
        );
        self.sink
            .send_event(Event::new(self.control_tag(), body), SendOptions::default())
            .await?;
        self.phase = Phase::Ended;
        info!(lookup = %self.name, session = %self.id, "lookup ended");
        Ok(())
    }

    pub(crate) async fn send_historic(&self, raw_row: String) -> Result<(), LookupError> {
        if let Some(tag) = &self.historic_tag {
            debug!(tag = %tag, "echoing lookup row");
            self.sink
                .send_event(Event::new(tag.clone(), raw_row), SendOptions::default())
                .await?;
        }
        Ok(())
    }
}

impl<S: EventSink> fmt::Debug for LookupSession<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupSession")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("action", &self.action)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
