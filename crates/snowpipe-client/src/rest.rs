//! Typed REST surface
//!
//! Thin wrappers over the service's five streaming endpoints, all rooted
//! at the discovered ingest base. Path segments are percent-escaped; the
//! `offsetToken` query parameter is attached only when non-empty.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use snowpipe_auth::AuthProvider;
use snowpipe_config::ClientOptions;
use snowpipe_transport::{RequestBody, Transport};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{IngestError, Result};
use crate::payload::{Chunk, ChunkMetadata};
use crate::schema::SchemaObjectCoords;

/// Read-only channel status snapshot from the service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelStatus {
    /// Service status code; `SUCCESS` when the channel is healthy
    #[serde(default)]
    pub status_code: Option<String>,
    /// Last offset token the service has durably committed
    #[serde(default)]
    pub last_committed_offset_token: Option<String>,
    #[serde(default)]
    pub rows_inserted: Option<i64>,
    #[serde(default)]
    pub rows_parsed: Option<i64>,
    #[serde(default)]
    pub rows_error_count: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
    /// Server-side average processing latency, feeds the adaptive poller
    #[serde(default)]
    pub snowflake_avg_processing_latency_ms: Option<i64>,
}

impl ChannelStatus {
    /// Whether the service reported SUCCESS
    pub fn is_success(&self) -> bool {
        self.status_code.as_deref() == Some("SUCCESS")
    }
}

/// Response to an open-channel call
#[derive(Debug, Clone, Deserialize)]
pub struct OpenChannelResponse {
    /// Channel status at open time
    #[serde(default)]
    pub channel_status: ChannelStatus,
    /// Cursor for the first append; MUST be present on success
    #[serde(default)]
    pub next_continuation_token: Option<String>,
}

impl OpenChannelResponse {
    /// Validate the open invariants and hand back the continuation token
    pub fn into_open(self) -> Result<(ChannelStatus, String)> {
        if !self.channel_status.is_success() {
            return Err(IngestError::OpenRejected {
                code: self
                    .channel_status
                    .status_code
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                message: self
                    .channel_status
                    .last_error_message
                    .clone()
                    .unwrap_or_default(),
            });
        }
        let token = self
            .next_continuation_token
            .filter(|t| !t.is_empty())
            .ok_or(IngestError::MissingContinuationToken)?;
        Ok((self.channel_status, token))
    }
}

/// Response to an append call
#[derive(Debug, Clone, Deserialize)]
pub struct AppendRowsResponse {
    /// Cursor to echo on the next append
    pub next_continuation_token: String,
}

/// One entry of the bulk committed-offsets response
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelOffset {
    pub channel_name: String,
    #[serde(default)]
    pub offset_token: Option<String>,
}

#[derive(Serialize)]
struct BulkOffsetsRequest<'a> {
    database_name: &'a str,
    schema_name: &'a str,
    pipe_name: &'a str,
    channels: &'a [String],
}

#[derive(Deserialize)]
struct BulkOffsetsResponse {
    #[serde(default)]
    channels: Vec<ChannelOffset>,
}

#[derive(Deserialize)]
struct DeleteChannelResponse {
    #[serde(default)]
    channel_status: Option<ChannelStatus>,
}

/// Hook producing extra append headers from chunk metadata
///
/// The chunk id and MD5 are not transmitted by default; install a hook to
/// surface them (e.g. as `Content-MD5`) without transport changes.
pub type ChunkHeaderHook = Arc<dyn Fn(&ChunkMetadata) -> Vec<(String, String)> + Send + Sync>;

/// The service's streaming REST surface behind an object-safe trait
///
/// The channel drives this seam; tests swap in a scripted fake.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// `PUT …/channels/{ch}`
    async fn open_channel(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<OpenChannelResponse>;

    /// `POST …/channels/{ch}/rows`
    async fn append_rows(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        chunk: &Chunk,
        continuation_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AppendRowsResponse>;

    /// `GET …/channels/{ch}`
    async fn channel_status(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelStatus>;

    /// `POST /v2/streaming/channels/status/`
    async fn latest_committed_offsets(
        &self,
        pipe: &SchemaObjectCoords,
        channels: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelOffset>>;

    /// `DELETE …/channels/{ch}`
    async fn delete_channel(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelStatus>>;
}

/// Typed client over the streaming ingest endpoints
pub struct IngestClient {
    transport: Transport,
    chunk_header_hook: Option<ChunkHeaderHook>,
}

impl IngestClient {
    /// Create a client that shares the process-wide auth provider
    pub fn new(
        options: &ClientOptions,
        account_base: Url,
        auth: Arc<AuthProvider>,
    ) -> Result<Self> {
        let transport = Transport::new(options, account_base, auth)
            .map_err(IngestError::Transport)?;
        Ok(Self {
            transport,
            chunk_header_hook: None,
        })
    }

    /// Wrap an existing transport (tests, custom wiring)
    pub fn with_transport(transport: Transport) -> Self {
        Self {
            transport,
            chunk_header_hook: None,
        }
    }

    /// Install a hook that turns chunk metadata into append headers
    #[must_use]
    pub fn with_chunk_header_hook(mut self, hook: ChunkHeaderHook) -> Self {
        self.chunk_header_hook = Some(hook);
        self
    }

    fn channel_path(pipe: &SchemaObjectCoords, channel: &str) -> String {
        format!(
            "/v2/streaming/databases/{}/schemas/{}/pipes/{}/channels/{}",
            seg(&pipe.database),
            seg(&pipe.schema),
            seg(&pipe.name),
            seg(channel)
        )
    }

    fn rows_path(pipe: &SchemaObjectCoords, channel: &str) -> String {
        format!(
            "/v2/streaming/data/databases/{}/schemas/{}/pipes/{}/channels/{}/rows",
            seg(&pipe.database),
            seg(&pipe.schema),
            seg(&pipe.name),
            seg(channel)
        )
    }
}

/// Percent-escape one path segment
fn seg(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

#[async_trait]
impl IngestApi for IngestClient {
    async fn open_channel(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<OpenChannelResponse> {
        let body = serde_json::json!({});
        let response = self
            .transport
            .request(
                Method::PUT,
                &Self::channel_path(pipe, channel),
                &[],
                RequestBody::Json(&body),
                &[],
                cancel,
            )
            .await?;
        debug!(pipe = %pipe, channel, "opened channel");
        Ok(response)
    }

    async fn append_rows(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        chunk: &Chunk,
        continuation_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AppendRowsResponse> {
        let mut query: Vec<(&str, String)> =
            vec![("continuationToken", continuation_token.to_string())];
        if let Some(offset) = chunk.metadata.offset_token.as_deref().filter(|t| !t.is_empty()) {
            query.push(("offsetToken", offset.to_string()));
        }

        let extra_headers = self
            .chunk_header_hook
            .as_ref()
            .map(|hook| hook(&chunk.metadata))
            .unwrap_or_default();

        let response: AppendRowsResponse = self
            .transport
            .request(
                Method::POST,
                &Self::rows_path(pipe, channel),
                &query,
                RequestBody::Ndjson(&chunk.data),
                &extra_headers,
                cancel,
            )
            .await?;
        debug!(
            pipe = %pipe,
            channel,
            chunk_id = %chunk.chunk_id,
            rows = chunk.metadata.row_count,
            bytes = chunk.metadata.size_bytes,
            "appended rows"
        );
        Ok(response)
    }

    async fn channel_status(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelStatus> {
        Ok(self
            .transport
            .request(
                Method::GET,
                &Self::channel_path(pipe, channel),
                &[],
                RequestBody::None,
                &[],
                cancel,
            )
            .await?)
    }

    async fn latest_committed_offsets(
        &self,
        pipe: &SchemaObjectCoords,
        channels: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelOffset>> {
        let body = serde_json::to_value(BulkOffsetsRequest {
            database_name: &pipe.database,
            schema_name: &pipe.schema,
            pipe_name: &pipe.name,
            channels,
        })
        .map_err(snowpipe_transport::TransportError::Decode)?;

        let response: BulkOffsetsResponse = self
            .transport
            .request(
                Method::POST,
                "/v2/streaming/channels/status/",
                &[],
                RequestBody::Json(&body),
                &[],
                cancel,
            )
            .await?;
        Ok(response.channels)
    }

    async fn delete_channel(
        &self,
        pipe: &SchemaObjectCoords,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelStatus>> {
        let body = serde_json::json!({});
        let response: Option<DeleteChannelResponse> = self
            .transport
            .request_opt(
                Method::DELETE,
                &Self::channel_path(pipe, channel),
                &[],
                RequestBody::Json(&body),
                &[],
                cancel,
            )
            .await?;
        debug!(pipe = %pipe, channel, "deleted channel");
        Ok(response.and_then(|r| r.channel_status))
    }
}
