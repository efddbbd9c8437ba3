//! Write sinks for flushed batches.
//!
//! This module provides the sink implementations:
//! - `influx`: InfluxDB 1.x HTTP API using line protocol
//! - `memory`: in-process sink that records batches, used by tests and
//!   embedding applications
//!
//! Each sink implements the `WriteSink` trait. A sink receives one batch per
//! flush window and is never asked to retry it.

pub mod influx;
pub mod memory;

use crate::error::SinkError;
use crate::point::Point;
use async_trait::async_trait;

/// Durable destination for flushed points.
#[async_trait]
pub trait WriteSink: Send + Sync + 'static {
    /// Prepare the destination (create the database, check credentials).
    async fn init(&self) -> Result<(), SinkError>;

    /// Write one batch. Called once per flush with the whole batch.
    async fn write_points(&self, points: Vec<Point>) -> Result<(), SinkError>;
}
