//! Snowpipe streaming ingest client
//!
//! Durable ingest channels over the service's append-only pipe endpoint:
//! producers hand typed rows to a channel, which batches, serializes,
//! authenticates, uploads, retries, and tracks per-channel commit
//! progress so producers can resume after a restart.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use snowpipe_auth::AuthProvider;
//! use snowpipe_client::{
//!     row, ColumnSpec, ColumnType, FlushPolicy, IngestChannel, IngestClient,
//!     SchemaObjectCoords, TableSchema,
//! };
//! use snowpipe_config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("snowpipe.toml")?;
//! let auth = Arc::new(AuthProvider::new(
//!     &config.account,
//!     &config.credentials,
//!     &config.client,
//! )?);
//! let client = Arc::new(IngestClient::new(
//!     &config.client,
//!     config.account.base_url()?,
//!     auth,
//! )?);
//!
//! let schema = TableSchema::new(
//!     SchemaObjectCoords::new("DB", "PUBLIC", "EVENTS"),
//!     vec![
//!         ColumnSpec::new("ID", ColumnType::Number),
//!         ColumnSpec::new("VALUE", ColumnType::Varchar),
//!     ],
//! );
//! let channel = IngestChannel::new(
//!     "writer-1",
//!     SchemaObjectCoords::new("DB", "PUBLIC", "EVENTS_PIPE"),
//!     schema,
//!     FlushPolicy::default(),
//!     client,
//! );
//!
//! let cancel = CancellationToken::new();
//! channel.open(&cancel).await?;
//! channel
//!     .insert_row(row([("ID", 1i64.into()), ("VALUE", "hello".into())]), &cancel)
//!     .await?;
//! channel.set_offset_token("1").await?;
//! channel.flush(None, &cancel).await?;
//!
//! let committed = channel
//!     .fetch_latest_committed_offset(
//!         Duration::from_secs(20),
//!         Duration::from_millis(250),
//!         &cancel,
//!     )
//!     .await?;
//! println!("committed through {committed:?}");
//! channel.close(&cancel).await?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod error;
mod normalize;
mod payload;
mod rest;
mod schema;
mod value;

#[cfg(test)]
mod normalize_test;

pub use channel::{
    ChannelMetrics, ChannelState, FlushPolicy, IngestChannel, MetricsSnapshot,
    DEFAULT_OFFSET_POLL_INTERVAL, DEFAULT_OFFSET_POLL_TIMEOUT,
};
pub use error::{IngestError, Result, SchemaError};
pub use normalize::{estimate_row_bytes, normalize_row, normalize_value};
pub use payload::{build_chunk, Chunk, ChunkMetadata};
pub use rest::{
    AppendRowsResponse, ChannelOffset, ChannelStatus, ChunkHeaderHook, IngestApi, IngestClient,
    OpenChannelResponse,
};
pub use schema::{ColumnSpec, ColumnType, SchemaObjectCoords, TableSchema};
pub use value::{row, Row, RowValue};
