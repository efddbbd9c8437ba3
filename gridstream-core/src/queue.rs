//! Bounded handoff between the intake path and the batcher.
//!
//! [`IngressQueue::push`] never blocks: it runs inside the transport's
//! message callback. When the queue is full the default policy throws away
//! everything pending, so the next window starts from a clean slate instead
//! of a truncated mix of old and new samples.

use crate::error::{Error, Result};
use crate::point::Point;
use crate::stats::PipelineStats;
use flume::{Receiver, Sender, TrySendError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// What happens to pending points when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop every queued point and the incoming one.
    #[default]
    ClearAll,
    /// Drop only the incoming point.
    DropNewest,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Ok,
    /// The queue was full; `dropped` points were discarded, the pushed one
    /// included.
    Full { dropped: usize },
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct IngressQueue {
    tx: Sender<Point>,
    // Kept so the producer can clear the queue on overflow.
    rx: Receiver<Point>,
    capacity: usize,
    policy: OverflowPolicy,
    stats: Arc<PipelineStats>,
}

/// Consumer side of the queue.
#[derive(Clone)]
pub struct IngressReceiver {
    rx: Receiver<Point>,
}

impl IngressQueue {
    /// Creates a queue holding at most `capacity` points.
    pub fn new(capacity: usize, policy: OverflowPolicy, stats: Arc<PipelineStats>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".to_string()));
        }
        let (tx, rx) = flume::bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            policy,
            stats,
        })
    }

    pub fn push(&self, point: Point) -> Push {
        match self.tx.try_send(point) {
            Ok(()) => {
                self.stats.record_queued();
                Push::Ok
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = match self.policy {
                    OverflowPolicy::ClearAll => {
                        let cleared = self.rx.drain().count();
                        error!("Queue full, overload? Dropping {} queued points", cleared);
                        cleared + 1
                    }
                    OverflowPolicy::DropNewest => 1,
                };
                self.stats.record_dropped(dropped as u64);
                Push::Full { dropped }
            }
        }
    }

    pub fn receiver(&self) -> IngressReceiver {
        IngressReceiver { rx: self.rx.clone() }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl IngressReceiver {
    /// Waits up to `timeout` for the next point. `Ok(None)` means the wait
    /// timed out.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Point>> {
        match tokio::time::timeout(timeout, self.rx.recv_async()).await {
            Ok(Ok(point)) => Ok(Some(point)),
            Ok(Err(_)) => Err(Error::QueueClosed),
            Err(_) => Ok(None),
        }
    }

    pub fn try_recv(&self) -> Option<Point> {
        self.rx.try_recv().ok()
    }
}
