use super::decoder::LineDecoder;
use super::error::QueryError;
use super::processor::Record;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Longest line accepted while waiting for its terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024 * 1024;

/// Lazily decoded records of a streamed query response.
///
/// Records are produced as body chunks arrive, so the consumer's pace drives
/// the transfer. The stream ends when the body ends; an in-band error ends it
/// with a `DataResponse` item. Dropping the stream closes the response.
pub struct RecordStream {
    inner: BoxStream<'static, Result<Record, QueryError>>,
}

struct LineState<S> {
    body: Pin<Box<S>>,
    buffer: BytesMut,
    decoder: LineDecoder,
    max_line_len: usize,
    finished: bool,
}

impl RecordStream {
    pub fn new<S, E>(body: S, decoder: LineDecoder) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Self::with_max_line_len(body, decoder, DEFAULT_MAX_LINE_LEN)
    }

    /// Like [`RecordStream::new`], failing with a decode error once a line
    /// grows past `max_line_len` bytes without a terminator.
    pub fn with_max_line_len<S, E>(body: S, decoder: LineDecoder, max_line_len: usize) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let state = LineState {
            body: Box::pin(body),
            buffer: BytesMut::new(),
            decoder,
            max_line_len,
            finished: false,
        };

        let inner = stream::unfold(state, |mut state| async move {
            let item = next_record(&mut state).await?;
            Some((item, state))
        });

        Self {
            inner: inner.boxed(),
        }
    }

    /// Drains the remaining records, stopping at the first error.
    pub async fn collect_records(mut self) -> Result<Vec<Record>, QueryError> {
        let mut records = Vec::new();
        while let Some(record) = self.inner.next().await {
            records.push(record?);
        }
        Ok(records)
    }
}

async fn next_record<S, E>(state: &mut LineState<S>) -> Option<Result<Record, QueryError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    loop {
        if state.finished {
            return None;
        }

        if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
            let line = state.buffer.split_to(pos + 1);
            match state.decoder.decode_line(&line[..pos]) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    state.finished = true;
                    return Some(Err(e));
                }
            }
        }

        if state.buffer.len() > state.max_line_len {
            state.finished = true;
            return Some(Err(QueryError::Decode(format!(
                "line exceeds {} bytes without a terminator",
                state.max_line_len
            ))));
        }

        match state.body.next().await {
            Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
            Some(Err(e)) => {
                state.finished = true;
                return Some(Err(QueryError::Transport(e.to_string())));
            }
            None => {
                state.finished = true;
                if state.buffer.is_empty() {
                    debug!("query stream finished");
                    return None;
                }
                let line = state.buffer.split();
                return match state.decoder.decode_line(&line) {
                    Ok(Some(record)) => Some(Ok(record)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                };
            }
        }
    }
}

impl Stream for RecordStream {
    type Item = Result<Record, QueryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream").finish_non_exhaustive()
    }
}
