use super::config::{Address, SenderConfig};
use super::error::SenderError;
use super::tls::{build_client_config, server_name};
use crate::domain::SharedClock;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// Records above this size are written in slices of this size.
pub const CHUNK_SIZE: usize = 4096;

enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Socket {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(data).await,
            Self::Tls(stream) => stream.write(data).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await,
            Self::Tls(stream) => stream.flush().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        }
    }
}

struct TlsSetup {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

/// One socket to the ingestion endpoint, replaced when it fails or ages out.
pub struct Connection {
    address: Address,
    tls: Option<TlsSetup>,
    socket: Option<Socket>,
    created_ms: Option<i64>,
    max_age: Duration,
    ever_opened: bool,
    reconnections: u64,
    clock: SharedClock,
}

impl Connection {
    pub fn new(
        config: &SenderConfig,
        max_age: Duration,
        clock: SharedClock,
    ) -> Result<Self, SenderError> {
        config.validate()?;
        let tls = match config {
            SenderConfig::Tls(tls) => Some(TlsSetup {
                config: build_client_config(tls)?,
                server_name: server_name(&tls.address.host)?,
            }),
            SenderConfig::Tcp(_) => None,
        };

        Ok(Self {
            address: config.address().clone(),
            tls,
            socket: None,
            created_ms: None,
            max_age,
            ever_opened: false,
            reconnections: 0,
            clock,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn reconnections(&self) -> u64 {
        self.reconnections
    }

    pub fn created_ms(&self) -> Option<i64> {
        self.created_ms
    }

    /// Whether the open socket is older than the configured maximum age.
    pub fn is_stale(&self) -> bool {
        self.created_ms.is_some_and(|created| {
            self.clock.now_millis().saturating_sub(created) >= self.max_age.as_millis() as i64
        })
    }

    pub async fn open(&mut self) -> Result<(), SenderError> {
        let tcp = TcpStream::connect((self.address.host.as_str(), self.address.port))
            .await
            .map_err(|e| SenderError::Connect {
                address: self.address.to_string(),
                message: e.to_string(),
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("could not disable Nagle on sender socket: {}", e);
        }

        let socket = match &self.tls {
            Some(tls) => {
                let stream = TlsConnector::from(tls.config.clone())
                    .connect(tls.server_name.clone(), tcp)
                    .await
                    .map_err(|e| SenderError::Tls(format!("handshake with {}: {e}", self.address)))?;
                Socket::Tls(Box::new(stream))
            }
            None => Socket::Plain(tcp),
        };

        if self.ever_opened {
            self.reconnections += 1;
            info!(
                address = %self.address,
                reconnections = self.reconnections,
                "sender reconnected"
            );
        } else {
            info!(address = %self.address, tls = self.tls.is_some(), "sender connected");
        }

        self.socket = Some(socket);
        self.created_ms = Some(self.clock.now_millis());
        self.ever_opened = true;
        Ok(())
    }

    /// Closes the socket, if any. Shutdown failures are only logged.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown().await {
                debug!(address = %self.address, "socket shutdown failed: {}", e);
            }
        }
        self.created_ms = None;
    }

    /// Makes sure a fresh socket is available, replacing an aged one.
    pub async fn ensure_open(&mut self) -> Result<(), SenderError> {
        if self.is_open() && self.is_stale() {
            debug!(address = %self.address, "connection exceeded its maximum age");
            self.close().await;
        }
        if !self.is_open() {
            self.open().await?;
        }
        Ok(())
    }

    /// Writes one record, slicing it into [`CHUNK_SIZE`] writes.
    ///
    /// A failed write closes the socket so the next write reconnects.
    pub async fn write_record(&mut self, record: &[u8]) -> Result<usize, SenderError> {
        self.ensure_open().await?;

        let result = match self.socket.as_mut() {
            Some(socket) => write_chunked(socket, record).await,
            None => Err(SenderError::Closed),
        };

        match result {
            Ok(sent) => Ok(sent),
            Err(e) if e.breaks_connection() => {
                warn!(address = %self.address, "send failed, dropping connection: {}", e);
                self.close().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

async fn write_chunked(socket: &mut Socket, record: &[u8]) -> Result<usize, SenderError> {
    let mut sent = 0;
    while sent < record.len() {
        let end = (sent + CHUNK_SIZE).min(record.len());
        let mut chunk = &record[sent..end];
        while !chunk.is_empty() {
            let written = socket
                .write(chunk)
                .await
                .map_err(|e| SenderError::Send(e.to_string()))?;
            if written == 0 {
                return Err(SenderError::Send("socket accepted no bytes".to_string()));
            }
            sent += written;
            chunk = &chunk[written..];
        }
    }
    socket
        .flush()
        .await
        .map_err(|e| SenderError::Send(e.to_string()))?;

    if sent != record.len() {
        return Err(SenderError::Send(format!(
            "wrote {sent} of {} bytes",
            record.len()
        )));
    }
    Ok(sent)
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("tls", &self.tls.is_some())
            .field("open", &self.is_open())
            .field("created_ms", &self.created_ms)
            .field("reconnections", &self.reconnections)
            .finish_non_exhaustive()
    }
}
