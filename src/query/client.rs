use super::config::QueryClientConfig;
use super::dates::DateResolver;
use super::decoder::LineDecoder;
use super::error::QueryError;
use super::jobs::JobClient;
use super::processor::{Processor, Record};
use super::request::RequestBuilder;
use super::spec::QuerySpec;
use super::stream::RecordStream;
use super::transport::HttpTransport;
use crate::domain::SharedClock;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Result of a query: fully decoded records, or a lazy stream of them.
#[derive(Debug)]
pub enum QueryResponse {
    Records(Vec<Record>),
    Stream(RecordStream),
}

impl QueryResponse {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Collects everything, draining the stream if needed.
    pub async fn into_records(self) -> Result<Vec<Record>, QueryError> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Stream(stream) => stream.collect_records().await,
        }
    }
}

/// Client for the platform's query endpoint.
#[derive(Debug, Clone)]
pub struct QueryClient {
    config: QueryClientConfig,
    transport: HttpTransport,
    builder: RequestBuilder,
    query_url: Url,
}

impl QueryClient {
    pub fn new(config: QueryClientConfig) -> Result<Self, QueryError> {
        config.validate()?;
        let query_url = config.query_url()?;
        let transport = HttpTransport::new(&config)?;
        let builder = RequestBuilder::new(&config.user, &config.app_name);

        info!(
            url = %query_url,
            auth = config.credentials.mode(),
            "query client ready"
        );

        Ok(Self {
            config,
            transport,
            builder,
            query_url,
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.builder = self.builder.with_clock(clock);
        self
    }

    pub fn with_date_resolver(mut self, resolver: Arc<dyn DateResolver>) -> Self {
        self.builder = self.builder.with_resolver(resolver);
        self
    }

    pub fn config(&self) -> &QueryClientConfig {
        &self.config
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    /// Job control against the same platform with the same credentials.
    pub fn jobs(&self) -> Result<JobClient, QueryError> {
        Ok(JobClient::from_parts(
            self.config.base_url()?,
            self.config.credentials.clone(),
            self.transport.clone(),
            self.builder.clone(),
        ))
    }

    /// Runs a query.
    ///
    /// The response is streamed when `spec.stream` is set and the format
    /// supports it; otherwise the whole body is read and decoded.
    pub async fn query(
        &self,
        spec: &QuerySpec,
        processor: Processor,
    ) -> Result<QueryResponse, QueryError> {
        let request = self.builder.build(spec, &self.config.credentials)?;
        let streaming = spec.is_streaming();
        debug!(
            format = %spec.response,
            streaming,
            body = %request.body,
            "sending query"
        );

        let response = self
            .transport
            .post(&self.query_url, &request, streaming)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| QueryError::from_reqwest(e, 1))?;
            return Err(QueryError::from_error_body(status.as_u16(), &body));
        }

        let mut decoder = LineDecoder::new(spec.response, spec.effective_keep_alive(), processor);

        if streaming {
            return Ok(QueryResponse::Stream(RecordStream::new(
                response.bytes_stream(),
                decoder,
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| QueryError::from_reqwest(e, 1))?;
        Ok(QueryResponse::Records(decoder.decode_body(body)?))
    }
}
