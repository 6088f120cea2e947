use super::buffer::SendBuffer;
use super::config::{SenderConfig, SenderOptions};
use super::connection::Connection;
use super::error::SenderError;
use super::flusher::{FlushTask, Flusher};
use super::framing::{Event, frame, multiline};
use super::tls::verify_config;
use crate::domain::SharedClock;
use futures::FutureExt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Per-call delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Length-prefix the record so it may contain newlines.
    pub multiline: bool,
    /// Buffer the record for a compressed batch.
    pub zip: bool,
}

impl SendOptions {
    pub fn multiline() -> Self {
        Self {
            multiline: true,
            zip: false,
        }
    }

    pub fn zip() -> Self {
        Self {
            multiline: false,
            zip: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub reconnections: u64,
    /// Events that reached the socket, batched ones included.
    pub events_sent: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub batches_flushed: u64,
    pub buffered_events: usize,
}

struct SenderCore {
    connection: Connection,
    buffer: SendBuffer,
    stats: SenderStats,
    /// Failure of a background flush, reported by the next call.
    pending_error: Option<SenderError>,
    closed: bool,
}

impl SenderCore {
    async fn write(&mut self, record: &[u8], events: u64) -> Result<usize, SenderError> {
        let written = self.connection.write_record(record).await?;
        self.stats.records_written += 1;
        self.stats.bytes_written += written as u64;
        self.stats.events_sent += events;
        Ok(written)
    }

    /// Ships the buffer as one compressed record; returns the events shipped.
    async fn flush(&mut self) -> Result<usize, SenderError> {
        let Some(batch) = self.buffer.take_compressed()? else {
            return Ok(0);
        };
        self.write(&batch.payload, batch.events as u64).await?;
        self.stats.batches_flushed += 1;
        debug!(
            events = batch.events,
            raw_bytes = batch.raw_len,
            compressed_bytes = batch.payload.len(),
            "flushed compressed batch"
        );
        Ok(batch.events)
    }

    fn check_usable(&mut self) -> Result<(), SenderError> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        if self.closed {
            return Err(SenderError::Closed);
        }
        Ok(())
    }
}

/// Ships framed events to the ingestion endpoint over one socket.
///
/// Calls take `&self`; the socket and the batch buffer sit behind a single
/// lock shared with the background flusher.
pub struct Sender {
    core: Arc<Mutex<SenderCore>>,
    flusher: Mutex<Flusher>,
    hostname: String,
    clock: SharedClock,
}

impl Sender {
    pub async fn new(config: SenderConfig, options: SenderOptions) -> Result<Self, SenderError> {
        options.validate()?;
        config.validate()?;

        match &config {
            SenderConfig::Tls(tls) if tls.verify_config => verify_config(tls).await?,
            _ => {}
        }

        let mut connection =
            Connection::new(&config, options.max_connection_age, options.clock.clone())?;
        if options.connect_eagerly {
            connection.open().await?;
        }

        let core = Arc::new(Mutex::new(SenderCore {
            connection,
            buffer: SendBuffer::new(options.buffer.clone()),
            stats: SenderStats::default(),
            pending_error: None,
            closed: false,
        }));

        let mut flusher = Flusher::new(options.buffer_timeout);
        flusher.set_task(flush_task(
            Arc::downgrade(&core),
            options.clock.clone(),
            options.buffer_timeout,
        ));
        flusher.start()?;

        let hostname = options.resolved_hostname();
        info!(
            address = %config.address(),
            tls = config.is_tls(),
            hostname = %hostname,
            "sender ready"
        );

        Ok(Self {
            core,
            flusher: Mutex::new(flusher),
            hostname,
            clock: options.clock,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Sends `body` on `tag` as a single-line event.
    pub async fn send(&self, tag: &str, body: impl Into<bytes::Bytes>) -> Result<usize, SenderError> {
        self.send_event(Event::new(tag, body), SendOptions::default())
            .await
    }

    /// Frames and delivers one event.
    ///
    /// Returns the number of events that reached the socket: 1 for a direct
    /// send, and for a buffered one either 0 or the size of the batch it
    /// caused to be flushed.
    pub async fn send_event(
        &self,
        event: Event,
        options: SendOptions,
    ) -> Result<usize, SenderError> {
        let framed = frame(&event, &self.hostname)?;
        let record = if options.multiline {
            multiline(&framed)
        } else {
            framed
        };

        let mut core = self.core.lock().await;
        core.check_usable()?;

        if options.zip {
            let full = core.buffer.push(&record, self.clock.now_millis());
            return if full { core.flush().await } else { Ok(0) };
        }

        core.write(&record, 1).await?;
        Ok(1)
    }

    /// Writes already framed bytes. Returns the bytes written.
    pub async fn send_raw(&self, record: &[u8]) -> Result<usize, SenderError> {
        let mut core = self.core.lock().await;
        core.check_usable()?;
        core.write(record, 1).await
    }

    /// Ships any buffered events now. Returns the events shipped.
    pub async fn flush_buffer(&self) -> Result<usize, SenderError> {
        let mut core = self.core.lock().await;
        core.check_usable()?;
        core.flush().await
    }

    pub async fn stats(&self) -> SenderStats {
        let core = self.core.lock().await;
        SenderStats {
            reconnections: core.connection.reconnections(),
            buffered_events: core.buffer.events(),
            ..core.stats.clone()
        }
    }

    /// Stops the flusher, ships what is buffered and closes the socket.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), SenderError> {
        self.flusher.lock().await.stop().await;

        let mut core = self.core.lock().await;
        if core.closed {
            return Ok(());
        }
        core.closed = true;

        let flushed = core.flush().await;
        core.connection.close().await;
        info!(
            events_sent = core.stats.events_sent,
            reconnections = core.connection.reconnections(),
            "sender closed"
        );

        if let Some(e) = core.pending_error.take() {
            return Err(e);
        }
        flushed.map(|_| ())
    }
}

fn flush_task(core: Weak<Mutex<SenderCore>>, clock: SharedClock, timeout: Duration) -> FlushTask {
    Box::new(move || {
        let core = core.clone();
        let clock = clock.clone();
        async move {
            let Some(core) = core.upgrade() else {
                return;
            };
            let mut core = core.lock().await;
            if core.closed || !core.buffer.is_stale(clock.now_millis(), timeout) {
                return;
            }
            if let Err(e) = core.flush().await {
                error!("background flush failed: {}", e);
                core.pending_error = Some(e);
            }
        }
        .boxed()
    })
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}
