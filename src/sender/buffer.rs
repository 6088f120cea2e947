use super::error::SenderError;
use crate::domain::ConfigError;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Accumulated bytes above which the buffer is flushed.
    pub threshold: usize,
    /// zlib level, `-1` for the library default.
    pub compression_level: i32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            threshold: 19_500,
            compression_level: -1,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::Invalid(
                "buffer threshold must be positive".to_string(),
            ));
        }
        if !(-1..=9).contains(&self.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "compression level {} is outside -1..=9",
                self.compression_level
            )));
        }
        Ok(())
    }

    fn compression(&self) -> Compression {
        match u32::try_from(self.compression_level) {
            Ok(level) => Compression::new(level),
            Err(_) => Compression::default(),
        }
    }
}

/// A compressed batch ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBatch {
    pub payload: Vec<u8>,
    pub events: usize,
    pub raw_len: usize,
}

/// Accumulates framed events for compressed batching.
///
/// `data` is empty exactly when `events` is zero and `oldest_ms` is unset.
#[derive(Debug)]
pub struct SendBuffer {
    config: BufferConfig,
    data: Vec<u8>,
    events: usize,
    oldest_ms: Option<i64>,
}

impl SendBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            data: Vec::with_capacity(config.threshold),
            config,
            events: 0,
            oldest_ms: None,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Appends one framed event. Returns true once the threshold is exceeded.
    pub fn push(&mut self, framed: &[u8], now_ms: i64) -> bool {
        if framed.is_empty() {
            return self.is_full();
        }
        self.data.extend_from_slice(framed);
        self.events += 1;
        self.oldest_ms.get_or_insert(now_ms);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() > self.config.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn oldest_ms(&self) -> Option<i64> {
        self.oldest_ms
    }

    /// Whether the oldest buffered event has waited longer than `timeout`.
    pub fn is_stale(&self, now_ms: i64, timeout: Duration) -> bool {
        self.oldest_ms
            .is_some_and(|oldest| now_ms.saturating_sub(oldest) >= timeout.as_millis() as i64)
    }

    /// Compresses the accumulated events and resets the buffer.
    ///
    /// The buffer is reset even when compression fails; those events are lost.
    pub fn take_compressed(&mut self) -> Result<Option<CompressedBatch>, SenderError> {
        if self.is_empty() {
            return Ok(None);
        }

        let data = std::mem::take(&mut self.data);
        let events = std::mem::replace(&mut self.events, 0);
        self.oldest_ms = None;
        self.data.reserve(self.config.threshold);

        let mut encoder = GzEncoder::new(Vec::new(), self.config.compression());
        encoder
            .write_all(&data)
            .map_err(|e| SenderError::Compression(e.to_string()))?;
        let payload = encoder
            .finish()
            .map_err(|e| SenderError::Compression(e.to_string()))?;

        Ok(Some(CompressedBatch {
            payload,
            events,
            raw_len: data.len(),
        }))
    }
}
