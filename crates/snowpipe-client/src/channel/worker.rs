//! Channel worker
//!
//! Owns all mutable channel state: the double-buffered row lists, the
//! continuation and pending offset tokens, and both timers. Commands and
//! timer ticks are handled one at a time, so at most one append is ever
//! in flight and the continuation token only advances from a response to
//! the append that carried it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{IngestError, Result};
use crate::normalize::estimate_row_bytes;
use crate::payload::build_chunk;
use crate::rest::IngestApi;
use crate::schema::{SchemaObjectCoords, TableSchema};
use crate::value::Row;

use super::{ChannelMetrics, ChannelSnapshot, ChannelState, FlushPolicy};

/// Commands the handle sends to the worker
pub(crate) enum Command {
    Open {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    Insert {
        rows: Vec<Row>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetOffsetToken {
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        offset_token: Option<String>,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    Drop {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct ChannelWorker {
    name: String,
    pipe: SchemaObjectCoords,
    schema: TableSchema,
    policy: FlushPolicy,
    api: Arc<dyn IngestApi>,
    metrics: Arc<ChannelMetrics>,
    rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<ChannelSnapshot>,

    state: ChannelState,
    continuation_token: Option<String>,
    pending_offset_token: Option<String>,
    latest_committed: Option<String>,
    buffer: Vec<Row>,
    spare: Vec<Row>,
    estimated_bytes: usize,
    last_append_at: Option<Instant>,
    timers_active: bool,
    closed: bool,
    /// Token for timer-driven work; never cancelled by callers
    background_cancel: CancellationToken,
}

impl ChannelWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        pipe: SchemaObjectCoords,
        schema: TableSchema,
        policy: FlushPolicy,
        api: Arc<dyn IngestApi>,
        metrics: Arc<ChannelMetrics>,
        rx: mpsc::Receiver<Command>,
        snapshot_tx: watch::Sender<ChannelSnapshot>,
    ) -> Self {
        Self {
            name,
            pipe,
            schema,
            policy,
            api,
            metrics,
            rx,
            snapshot_tx,
            state: ChannelState::Created,
            continuation_token: None,
            pending_offset_token: None,
            latest_committed: None,
            buffer: Vec::new(),
            spare: Vec::new(),
            estimated_bytes: 0,
            last_append_at: None,
            timers_active: false,
            closed: false,
            background_cancel: CancellationToken::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut flush_tick = interval_at(
            Instant::now() + self.policy.flush_interval,
            self.policy.flush_interval,
        );
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick = interval_at(
            Instant::now() + self.policy.status_interval,
            self.policy.status_interval,
        );
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        if !self.buffer.is_empty() {
                            warn!(
                                channel = %self.name,
                                rows = self.buffer.len(),
                                "worker shutting down with unflushed rows (call close() to flush)"
                            );
                        }
                        break;
                    }
                },
                _ = flush_tick.tick(), if self.timers_active => self.periodic_flush().await,
                _ = health_tick.tick(), if self.timers_active => self.health_check().await,
            }
        }
        debug!(channel = %self.name, "channel worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { cancel, reply } => {
                let result = if self.state == ChannelState::Open {
                    // Already open: no network round-trip.
                    Ok(())
                } else {
                    self.do_open(&cancel, "open").await
                };
                let _ = reply.send(result);
            }
            Command::Insert { rows, reply } => {
                let result = self.do_insert(rows);
                let trigger = matches!(&result, Ok(true));
                let _ = reply.send(result.map(|_| ()));
                if trigger {
                    self.triggered_flush().await;
                }
            }
            Command::SetOffsetToken { token, reply } => {
                self.pending_offset_token = Some(token);
                let _ = reply.send(Ok(()));
            }
            Command::Flush {
                offset_token,
                cancel,
                reply,
            } => {
                let result = if self.buffer.is_empty() {
                    Ok(())
                } else if self.state != ChannelState::Open {
                    Err(IngestError::InvalidState {
                        operation: "flush",
                        state: self.state,
                    })
                } else {
                    self.do_flush(offset_token, &cancel).await
                };
                let _ = reply.send(result);
            }
            Command::Drop { cancel, reply } => {
                let _ = reply.send(self.do_drop(&cancel).await);
            }
            Command::Close { cancel, reply } => {
                let _ = reply.send(self.do_close(&cancel).await);
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(ChannelSnapshot {
            state: self.state,
            latest_committed_offset: self.latest_committed.clone(),
        });
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            debug!(channel = %self.name, from = %self.state, to = %state, "state transition");
            self.state = state;
            self.publish();
        }
    }

    async fn do_open(&mut self, cancel: &CancellationToken, operation: &'static str) -> Result<()> {
        if self.state == ChannelState::Dropped {
            return Err(IngestError::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.set_state(ChannelState::Opening);

        let response = self.api.open_channel(&self.pipe, &self.name, cancel).await?;
        let (status, token) = response.into_open()?;

        self.continuation_token = Some(token);
        if let Some(offset) = status.last_committed_offset_token.filter(|t| !t.is_empty()) {
            self.latest_committed = Some(offset);
        }
        self.closed = false;
        self.timers_active = true;
        self.set_state(ChannelState::Open);
        info!(channel = %self.name, pipe = %self.pipe, "channel open");
        Ok(())
    }

    /// Validate and buffer rows; Ok(true) means a threshold was crossed
    fn do_insert(&mut self, rows: Vec<Row>) -> Result<bool> {
        if self.state != ChannelState::Open {
            return Err(IngestError::InvalidState {
                operation: "insert rows",
                state: self.state,
            });
        }

        // Validate every row before buffering any, so a bad batch leaves
        // the buffer untouched.
        let mut added_bytes = 0;
        for row in &rows {
            added_bytes += estimate_row_bytes(&self.schema, row)?;
        }

        self.metrics.record_rows_inserted(rows.len() as u64);
        self.buffer.extend(rows);
        self.estimated_bytes += added_bytes;

        Ok(self.buffer.len() >= self.policy.max_rows
            || self.estimated_bytes >= self.policy.max_bytes)
    }

    async fn triggered_flush(&mut self) {
        debug!(
            channel = %self.name,
            rows = self.buffer.len(),
            bytes = self.estimated_bytes,
            "size threshold crossed, flushing"
        );
        let cancel = self.background_cancel.clone();
        if let Err(e) = self.do_flush(None, &cancel).await {
            error!(channel = %self.name, error = %e, "triggered flush failed");
            self.metrics.record_flush_error();
            self.set_state(ChannelState::Error);
        }
    }

    async fn periodic_flush(&mut self) {
        if self.state != ChannelState::Open || self.buffer.is_empty() {
            return;
        }
        let cancel = self.background_cancel.clone();
        if let Err(e) = self.do_flush(None, &cancel).await {
            error!(channel = %self.name, error = %e, "periodic flush failed");
            self.metrics.record_flush_error();
            self.set_state(ChannelState::Error);
        }
    }

    async fn health_check(&mut self) {
        let cancel = self.background_cancel.clone();
        // A failed flush leaves the channel in Error; the health tick is
        // what brings it back.
        if self.state == ChannelState::Error {
            self.reopen_after_backoff(&cancel).await;
            return;
        }
        if self.state != ChannelState::Open {
            return;
        }
        match self.api.channel_status(&self.pipe, &self.name, &cancel).await {
            Ok(status) => {
                if let Some(token) = status
                    .last_committed_offset_token
                    .clone()
                    .filter(|t| !t.is_empty())
                {
                    self.latest_committed = Some(token);
                    self.publish();
                }
                if !status.is_success() {
                    warn!(
                        channel = %self.name,
                        code = ?status.status_code,
                        message = ?status.last_error_message,
                        "health check reported channel failure"
                    );
                    self.reopen_after_backoff(&cancel).await;
                }
            }
            Err(e) => {
                warn!(channel = %self.name, error = %e, "health check failed");
                self.reopen_after_backoff(&cancel).await;
            }
        }
    }

    async fn reopen_after_backoff(&mut self, cancel: &CancellationToken) {
        self.set_state(ChannelState::Error);
        tokio::time::sleep(self.policy.reopen_backoff).await;
        self.metrics.record_reopen();
        if let Err(e) = self.do_open(cancel, "reopen").await {
            error!(channel = %self.name, error = %e, "reopen failed");
            // Back to Error so the next health tick tries again.
            self.set_state(ChannelState::Error);
        }
    }

    async fn do_flush(
        &mut self,
        offset_token: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let continuation = self
            .continuation_token
            .clone()
            .ok_or(IngestError::MissingContinuationToken)?;

        // Swap the producer buffer for the recycled spare; the in-flight
        // snapshot is never visible to inserts.
        let rows = std::mem::replace(&mut self.buffer, std::mem::take(&mut self.spare));
        self.estimated_bytes = 0;

        let (effective, from_pending) = match offset_token {
            Some(token) => (Some(token), false),
            None => (self.pending_offset_token.clone(), true),
        };

        let chunk = match build_chunk(&self.name, &self.schema, &rows, effective.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.recycle(rows);
                return Err(e.into());
            }
        };

        let result = self
            .api
            .append_rows(&self.pipe, &self.name, &chunk, &continuation, cancel)
            .await;

        // HTTP 400/409 on a live channel usually means the continuation
        // token drifted; reopen once and retry with the fresh token.
        let result = match result {
            Err(error) if is_drift(&error) => {
                warn!(
                    channel = %self.name,
                    error = %error,
                    backoff_ms = self.policy.drift_backoff.as_millis() as u64,
                    "append rejected, reopening to re-seed continuation token"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.drift_backoff) => {}
                    _ = cancel.cancelled() => {
                        self.recycle(rows);
                        return Err(IngestError::Cancelled);
                    }
                }
                self.metrics.record_reopen();
                self.set_state(ChannelState::Error);
                if let Err(reopen_error) = self.do_open(cancel, "reopen").await {
                    self.recycle(rows);
                    return Err(reopen_error);
                }
                let fresh = match self.continuation_token.clone() {
                    Some(token) => token,
                    None => {
                        self.recycle(rows);
                        return Err(IngestError::MissingContinuationToken);
                    }
                };
                self.api
                    .append_rows(&self.pipe, &self.name, &chunk, &fresh, cancel)
                    .await
            }
            other => other,
        };

        match result {
            Ok(response) => {
                self.continuation_token = Some(response.next_continuation_token);
                self.last_append_at = Some(Instant::now());
                if from_pending && effective.is_some() {
                    self.pending_offset_token = None;
                }
                self.metrics.record_append(chunk.metadata.row_count as u64);
                debug!(
                    channel = %self.name,
                    chunk_id = %chunk.chunk_id,
                    rows = chunk.metadata.row_count,
                    bytes = chunk.metadata.size_bytes,
                    offset_token = ?effective,
                    "flushed"
                );
                self.recycle(rows);
                Ok(())
            }
            Err(e) => {
                self.recycle(rows);
                Err(e)
            }
        }
    }

    /// Return a flushed snapshot list to the spare for reuse
    fn recycle(&mut self, mut rows: Vec<Row>) {
        rows.clear();
        self.spare = rows;
    }

    async fn do_drop(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state == ChannelState::Dropped {
            return Ok(());
        }

        if let Some(appended_at) = self.last_append_at {
            let hold = self.policy.min_hold_after_append;
            let elapsed = appended_at.elapsed();
            if elapsed < hold {
                let wait = hold - elapsed;
                debug!(
                    channel = %self.name,
                    wait_ms = wait.as_millis() as u64,
                    "holding before channel drop"
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                }
            }
        }

        self.api.delete_channel(&self.pipe, &self.name, cancel).await?;
        self.timers_active = false;
        self.set_state(ChannelState::Dropped);
        info!(channel = %self.name, pipe = %self.pipe, "channel dropped");
        Ok(())
    }

    async fn do_close(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.closed || self.state == ChannelState::Dropped {
            return Ok(());
        }
        self.timers_active = false;

        if !self.buffer.is_empty() {
            if self.state == ChannelState::Open {
                // Best-effort final flush; close never fails on it.
                if let Err(e) = self.do_flush(None, cancel).await {
                    warn!(channel = %self.name, error = %e, "final flush failed during close");
                    self.metrics.record_flush_error();
                }
            } else {
                warn!(
                    channel = %self.name,
                    rows = self.buffer.len(),
                    state = %self.state,
                    "closing with unflushed rows"
                );
            }
        }

        self.closed = true;
        self.set_state(ChannelState::Closed);
        info!(channel = %self.name, "channel closed");
        Ok(())
    }
}

fn is_drift(error: &IngestError) -> bool {
    matches!(error.status(), Some(400) | Some(409))
}
