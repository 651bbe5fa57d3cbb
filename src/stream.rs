//! Row delivery to the consumer: adaptive buffering, the row stream, and
//! post-completion metadata futures.
//!
//! The dispatcher is the row source and the [`RowStream`] the sink side of a
//! bounded channel; a full channel suspends the dispatcher, which stops
//! issuing FETCH until the consumer drains (backpressure). The
//! [`AdaptiveRowBuffer`] converts the observed queue depth into the array
//! size of the next FETCH round-trip.

use crate::error::{Error, Result};
use crate::protocol::types::{DataRow, OracleColumn};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

/// Balances memory against round-trip count when sizing FETCH calls.
///
/// Backlog above the target halves it (once re-armed by a yield); an empty
/// buffer on consume doubles it, and disarms shrinking until the next yield
/// so a single fast consumer cannot immediately undo the growth.
#[derive(Debug, Clone)]
pub struct AdaptiveRowBuffer {
    target: u32,
    allow_shrink: bool,
}

impl AdaptiveRowBuffer {
    pub const MINIMUM: u32 = 1;
    pub const DEFAULT_TARGET: u32 = 256;
    pub const MAXIMUM: u32 = 16384;

    pub fn new() -> Self {
        Self {
            target: Self::DEFAULT_TARGET,
            allow_shrink: false,
        }
    }

    /// Start from a caller-chosen array size, clamped to the valid range.
    pub fn with_target(target: u32) -> Self {
        Self {
            target: target.clamp(Self::MINIMUM, Self::MAXIMUM),
            allow_shrink: false,
        }
    }

    /// Current FETCH array size.
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Record that a batch was pushed with `depth` rows already queued.
    pub fn did_yield(&mut self, depth: u32) {
        if depth > self.target && self.allow_shrink {
            self.target = (self.target / 2).max(Self::MINIMUM);
        }
        self.allow_shrink = true;
    }

    /// Record that the consumer drained down to `depth` queued rows.
    pub fn did_consume(&mut self, depth: u32) {
        if depth == 0 && self.target < Self::MAXIMUM {
            self.target = (self.target * 2).min(Self::MAXIMUM);
            self.allow_shrink = false;
        }
    }
}

impl Default for AdaptiveRowBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests cancellation of the statement feeding a row stream.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Ask the dispatcher to interrupt the server call.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// A finite, non-restartable stream of raw rows.
pub struct RowStream {
    rx: mpsc::Receiver<Result<DataRow>>,
    cancel: CancelHandle,
    finished: bool,
}

impl RowStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<DataRow>>, cancel: CancelHandle) -> Self {
        Self {
            rx,
            cancel,
            finished: false,
        }
    }

    /// Next row; `None` when the result set is exhausted.
    pub async fn next_row(&mut self) -> Option<Result<DataRow>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(item) => {
                if item.is_err() {
                    self.finished = true;
                }
                Some(item)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Initiate cancellation: a BREAK/RESET exchange on the connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this statement from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for RowStream {
    type Item = Result<DataRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    this.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Everything a query hands to its consumer.
pub struct QueryResults {
    /// Column metadata from the describe phase; empty for DML and PL/SQL.
    pub columns: Vec<OracleColumn>,
    /// The row stream; immediately exhausted for non-queries.
    pub rows: RowStream,
    affected_rows: oneshot::Receiver<u64>,
    row_counts: oneshot::Receiver<Vec<u64>>,
    out_binds: oneshot::Receiver<Vec<Option<Bytes>>>,
}

impl QueryResults {
    pub(crate) fn new(
        columns: Vec<OracleColumn>,
        rows: RowStream,
        affected_rows: oneshot::Receiver<u64>,
        row_counts: oneshot::Receiver<Vec<u64>>,
        out_binds: oneshot::Receiver<Vec<Option<Bytes>>>,
    ) -> Self {
        Self {
            columns,
            rows,
            affected_rows,
            row_counts,
            out_binds,
        }
    }

    /// Rows affected, available after the statement completes.
    pub async fn affected_rows(&mut self) -> Result<u64> {
        (&mut self.affected_rows)
            .await
            .map_err(|_| Error::ClientClosedConnection)
    }

    /// Per-row counts of a batch DML, available after completion.
    pub async fn row_counts(&mut self) -> Result<Vec<u64>> {
        (&mut self.row_counts)
            .await
            .map_err(|_| Error::ClientClosedConnection)
    }

    /// Out-bind values (RETURNING ... INTO or PL/SQL out parameters).
    pub async fn out_binds(&mut self) -> Result<Vec<Option<Bytes>>> {
        (&mut self.out_binds)
            .await
            .map_err(|_| Error::ClientClosedConnection)
    }

    /// Drain the stream into a vector.
    pub async fn collect_rows(&mut self) -> Result<Vec<DataRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.rows.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}
