//! Durable ingest channel
//!
//! A channel is a per-writer append stream into a pipe. All channel state
//! (buffer, continuation token, timers) lives in a dedicated worker task
//! that consumes a bounded command queue; the [`IngestChannel`] handle is
//! cheap to clone and sends commands with oneshot replies. Serializing
//! every append through the worker gives at-most-one in-flight append and
//! continuation-token advance per response without any explicit gate.

mod metrics;
mod worker;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, Result};
use crate::rest::IngestApi;
use crate::schema::{SchemaObjectCoords, TableSchema};
use crate::value::Row;

pub use metrics::{ChannelMetrics, MetricsSnapshot};

use worker::{ChannelWorker, Command};

/// Command queue depth between handle and worker
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Default budget for [`IngestChannel::fetch_latest_committed_offset`]
pub const DEFAULT_OFFSET_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default base delay between committed-offset polls
pub const DEFAULT_OFFSET_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, never opened
    Created,
    /// Open call in flight (or failed and not yet retried)
    Opening,
    /// Accepting inserts and flushing
    Open,
    /// A timer tick or flush failed; the health timer will reopen
    Error,
    /// Disposed; may be reopened
    Closed,
    /// Deleted on the service; terminal
    Dropped,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Opening => "Opening",
            Self::Open => "Open",
            Self::Error => "Error",
            Self::Closed => "Closed",
            Self::Dropped => "Dropped",
        };
        f.write_str(name)
    }
}

/// Flush and lifecycle tuning for one channel
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    /// Buffered row count that triggers a flush
    pub max_rows: usize,
    /// Estimated buffered bytes that trigger a flush
    pub max_bytes: usize,
    /// Periodic flush interval
    pub flush_interval: Duration,
    /// Minimum time between the last append and a channel drop
    pub min_hold_after_append: Duration,
    /// Health check interval
    pub status_interval: Duration,
    /// Wait before reopening after a failed health check
    pub reopen_backoff: Duration,
    /// Wait before the reopen-and-retry on continuation-token drift
    pub drift_backoff: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_rows: 50_000,
            max_bytes: 4_000_000,
            flush_interval: Duration::from_secs(5),
            min_hold_after_append: Duration::from_secs(10),
            status_interval: Duration::from_secs(5 * 60),
            reopen_backoff: Duration::from_secs(2),
            drift_backoff: Duration::from_secs(3),
        }
    }
}

impl FlushPolicy {
    /// Set the row-count flush trigger
    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Set the byte-size flush trigger
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set the periodic flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the minimum hold between last append and drop
    #[must_use]
    pub fn with_min_hold_after_append(mut self, hold: Duration) -> Self {
        self.min_hold_after_append = hold;
        self
    }

    /// Set the health check interval
    #[must_use]
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }
}

/// Watch-published view of the worker's state
#[derive(Debug, Clone)]
pub(crate) struct ChannelSnapshot {
    pub state: ChannelState,
    pub latest_committed_offset: Option<String>,
}

/// Handle to one ingest channel
///
/// Cloning is cheap; all clones drive the same worker. Dropping every
/// handle shuts the worker down (buffered rows are NOT flushed - call
/// [`IngestChannel::close`] for a flushing shutdown).
#[derive(Clone)]
pub struct IngestChannel {
    name: String,
    pipe: SchemaObjectCoords,
    api: Arc<dyn IngestApi>,
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ChannelSnapshot>,
    metrics: Arc<ChannelMetrics>,
}

impl std::fmt::Debug for IngestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestChannel")
            .field("name", &self.name)
            .field("pipe", &self.pipe)
            .field("state", &self.state())
            .finish()
    }
}

impl IngestChannel {
    /// Create a channel and spawn its worker
    ///
    /// The channel starts in [`ChannelState::Created`]; call
    /// [`IngestChannel::open`] before inserting.
    pub fn new(
        name: impl Into<String>,
        pipe: SchemaObjectCoords,
        schema: TableSchema,
        policy: FlushPolicy,
        api: Arc<dyn IngestApi>,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(ChannelSnapshot {
            state: ChannelState::Created,
            latest_committed_offset: None,
        });
        let metrics = Arc::new(ChannelMetrics::new());

        let worker = ChannelWorker::new(
            name.clone(),
            pipe.clone(),
            schema,
            policy,
            Arc::clone(&api),
            Arc::clone(&metrics),
            rx,
            snapshot_tx,
        );
        tokio::spawn(worker.run());

        Self {
            name,
            pipe,
            api,
            tx,
            snapshot: snapshot_rx,
            metrics,
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipe coordinates this channel appends into
    pub fn pipe(&self) -> &SchemaObjectCoords {
        &self.pipe
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.snapshot.borrow().state
    }

    /// Latest committed offset as of the last health tick or open
    pub fn latest_committed_offset(&self) -> Option<String> {
        self.snapshot.borrow().latest_committed_offset.clone()
    }

    /// Counters snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open the channel on the service
    ///
    /// Returns immediately without I/O when already open. Re-seeds the
    /// continuation token, so reopening a Closed channel is valid.
    pub async fn open(&self, cancel: &CancellationToken) -> Result<()> {
        self.command(Some(cancel), |reply| Command::Open {
            cancel: cancel.clone(),
            reply,
        })
        .await
    }

    /// Buffer one row
    pub async fn insert_row(&self, row: Row, cancel: &CancellationToken) -> Result<()> {
        self.insert_rows(vec![row], cancel).await
    }

    /// Buffer a batch of rows
    ///
    /// Validates every row against the schema before buffering any of
    /// them; on return the buffer holds the new rows and the byte estimate
    /// reflects their normalized size. Crossing the row or byte threshold
    /// triggers a flush on the worker.
    pub async fn insert_rows(&self, rows: Vec<Row>, cancel: &CancellationToken) -> Result<()> {
        self.command(Some(cancel), |reply| Command::Insert { rows, reply })
            .await
    }

    /// Attach an offset token to the next flush
    ///
    /// The token is consumed by the first append that carries it.
    pub async fn set_offset_token(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        if token.is_empty() {
            return Err(IngestError::EmptyOffsetToken);
        }
        self.command(None, |reply| Command::SetOffsetToken { token, reply })
            .await
    }

    /// Flush buffered rows now
    ///
    /// `offset_token` overrides any pending token for this flush. An empty
    /// buffer is a no-op with no I/O and no token advance.
    pub async fn flush(
        &self,
        offset_token: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.command(Some(cancel), |reply| Command::Flush {
            offset_token,
            cancel: cancel.clone(),
            reply,
        })
        .await
    }

    /// Poll the service until a committed offset appears or the budget runs out
    ///
    /// The poll delay adapts to the service's reported average processing
    /// latency (a quarter of it, floored at `poll`), capped at half the
    /// remaining budget. Returns the last seen value - `None` on timeout.
    pub async fn fetch_latest_committed_offset(
        &self,
        timeout: Duration,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self
                .api
                .channel_status(&self.pipe, &self.name, cancel)
                .await?;
            if let Some(token) = status
                .last_committed_offset_token
                .filter(|t| !t.is_empty())
            {
                return Ok(Some(token));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let delay = next_poll_delay(
                poll,
                status.snowflake_avg_processing_latency_ms,
                remaining,
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            }
        }
    }

    /// Delete the channel on the service
    ///
    /// Honors the minimum hold after the last append, then issues the
    /// DELETE. Idempotent from Closed and Dropped. Dropped is terminal.
    pub async fn drop_channel(&self, cancel: &CancellationToken) -> Result<()> {
        self.command(Some(cancel), |reply| Command::Drop {
            cancel: cancel.clone(),
            reply,
        })
        .await
    }

    /// Flush remaining rows and close
    ///
    /// Flush errors are logged and swallowed; safe to call repeatedly. A
    /// closed channel may be reopened with [`IngestChannel::open`].
    pub async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        self.command(Some(cancel), |reply| Command::Close {
            cancel: cancel.clone(),
            reply,
        })
        .await
    }

    async fn command<F>(&self, cancel: Option<&CancellationToken>, build: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let send = self.tx.send(build(reply_tx));
        match cancel {
            Some(token) => tokio::select! {
                result = send => result.map_err(|_| IngestError::ChannelClosed)?,
                _ = token.cancelled() => return Err(IngestError::Cancelled),
            },
            None => send.await.map_err(|_| IngestError::ChannelClosed)?,
        }
        match cancel {
            Some(token) => tokio::select! {
                result = reply_rx => result.map_err(|_| IngestError::ChannelClosed)?,
                _ = token.cancelled() => Err(IngestError::Cancelled),
            },
            None => reply_rx.await.map_err(|_| IngestError::ChannelClosed)?,
        }
    }
}

/// Adaptive delay between committed-offset polls
pub(crate) fn next_poll_delay(
    poll: Duration,
    avg_latency_ms: Option<i64>,
    remaining: Duration,
) -> Duration {
    let mut delay = poll;
    if let Some(avg) = avg_latency_ms {
        if avg > 0 {
            delay = delay.max(Duration::from_millis((avg / 4) as u64));
        }
    }
    delay.min(remaining / 2)
}
