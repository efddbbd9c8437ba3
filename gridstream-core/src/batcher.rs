//! Window-based reduction and batched writes.
//!
//! The batcher drains the ingress queue, buffers points per series key and,
//! once the flush interval has elapsed, reduces each series to a single
//! point before handing the whole batch to the sink:
//! - passthrough series (power flow, DC rail) are forwarded sample by sample,
//! - numeric series collapse to the mean of the window,
//! - text series keep their first sample.
//!
//! Flush timing is measured as wall-clock delta since the previous flush, so
//! windows drift by up to one dequeue timeout. The drift is logged.

use crate::active::ActiveFlag;
use crate::error::Result;
use crate::phase::PhaseAggregator;
use crate::point::{FieldValue, Point, SeriesKey};
use crate::queue::IngressReceiver;
use crate::stats::PipelineStats;
use crate::storage::WriteSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Series-key fragments that are written at full resolution.
pub const DEFAULT_PASSTHROUGH: [&str; 3] = [".Power.", "Dc.0.Current", "Dc.0.Voltage"];

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub flush_interval: Duration,
    pub dequeue_timeout: Duration,
    /// Substrings matched against the rendered series key
    pub passthrough: Vec<String>,
    /// Run the full pipeline but never call the sink
    pub dry_run: bool,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            dequeue_timeout: Duration::from_secs(1),
            passthrough: DEFAULT_PASSTHROUGH.iter().map(|s| s.to_string()).collect(),
            dry_run: false,
        }
    }
}

/// Result of reducing one window.
#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
    pub points: Vec<Point>,
    /// Unique series keys seen in the window
    pub series: usize,
    /// Points collapsed away by reduction
    pub deduplicated: usize,
}

pub struct WindowBatcher {
    config: BatcherConfig,
    phases: PhaseAggregator,
    buffer: HashMap<SeriesKey, Vec<Point>>,
    // First-seen order of the keys in `buffer`.
    order: Vec<SeriesKey>,
    stats: Arc<PipelineStats>,
}

impl WindowBatcher {
    pub fn new(config: BatcherConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            config,
            phases: PhaseAggregator::new(),
            buffer: HashMap::new(),
            order: Vec::new(),
            stats,
        }
    }

    /// Adds a point to the current window, together with the synthetic
    /// three-phase point it may complete.
    pub fn ingest(&mut self, point: Point) {
        let (original, synthetic) = self.phases.observe(point);
        self.buffer_point(original);
        if let Some(synthetic) = synthetic {
            self.stats.record_synthesized();
            self.buffer_point(synthetic);
        }
    }

    fn buffer_point(&mut self, point: Point) {
        let key = point.series_key();
        match self.buffer.get_mut(&key) {
            Some(points) => points.push(point),
            None => {
                self.order.push(key.clone());
                self.buffer.insert(key, vec![point]);
            }
        }
    }

    pub fn is_passthrough(&self, key: &SeriesKey) -> bool {
        self.config.passthrough.iter().any(|p| key.contains(p))
    }

    pub fn buffered_series(&self) -> usize {
        self.order.len()
    }

    pub fn buffered_points(&self) -> usize {
        self.buffer.values().map(Vec::len).sum()
    }

    pub fn pending_phase_groups(&self) -> usize {
        self.phases.pending_groups()
    }

    /// Reduces the current window and starts a new one. Buffers and phase
    /// accumulators are empty afterwards.
    pub fn flush(&mut self) -> FlushBatch {
        let mut buffer = std::mem::take(&mut self.buffer);
        let order = std::mem::take(&mut self.order);
        self.phases.reset();

        let mut batch = FlushBatch {
            points: Vec::with_capacity(order.len()),
            series: order.len(),
            deduplicated: 0,
        };

        for key in order {
            let Some(points) = buffer.remove(&key) else {
                continue;
            };
            if self.is_passthrough(&key) {
                batch.points.extend(points);
                continue;
            }
            batch.deduplicated += points.len() - 1;
            if let Some(point) = reduce(points) {
                batch.points.push(point);
            }
        }

        batch
    }

    /// Flushes the window and writes the batch, unless in dry-run mode.
    ///
    /// Transient and rejected writes are counted and the batch is dropped.
    /// Only a fatal sink error is returned.
    pub async fn flush_and_write(&mut self, sink: &dyn WriteSink, interval: Duration) -> Result<FlushBatch> {
        let batch = self.flush();
        self.stats
            .record_flush(interval.as_millis() as u64, batch.deduplicated as u64);

        if !batch.points.is_empty() {
            info!(
                "Write {} points (across {} unique series), deduplicated {}, interval {:.3}s",
                batch.points.len(),
                batch.series,
                batch.deduplicated,
                interval.as_secs_f64()
            );

            if self.config.dry_run {
                debug!("Skip write due to dry run");
            } else {
                let count = batch.points.len();
                let started = Instant::now();
                let result = sink.write_points(batch.points.clone()).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.stats.record_write_latency(latency_ms);

                match result {
                    Ok(()) => self.stats.record_written(count as u64),
                    Err(e) => {
                        error!("Write failure, dropping {} points: {}", count, e);
                        self.stats.record_write_failure(count as u64);
                        if e.is_fatal() {
                            return Err(e.into());
                        }
                    }
                }
                info!("Latency {}ms", latency_ms.round() as u64);
            }
        }

        let snap = self.stats.snapshot();
        info!(
            "Messages handled: {}, ignored {}, dropped {}, failed {}",
            snap.received, snap.ignored, snap.dropped, snap.failed_points
        );
        Ok(batch)
    }

    /// Drains `rx` until the active flag clears, flushing every interval.
    ///
    /// Unflushed points are lost on shutdown.
    pub async fn run(mut self, rx: IngressReceiver, sink: Arc<dyn WriteSink>, active: ActiveFlag) -> Result<()> {
        info!(
            "Batcher started, flush interval {:?}, passthrough {:?}",
            self.config.flush_interval, self.config.passthrough
        );
        let mut last_flush = Instant::now();

        while active.is_active() {
            tokio::select! {
                _ = active.deactivated() => break,
                received = rx.recv_timeout(self.config.dequeue_timeout) => {
                    if let Some(point) = received? {
                        self.ingest(point);
                    }
                }
            }

            let interval = last_flush.elapsed();
            if interval >= self.config.flush_interval {
                last_flush = Instant::now();
                self.flush_and_write(sink.as_ref(), interval).await?;
            }
        }

        info!(
            "Batcher stopped, discarding {} unflushed points",
            self.buffered_points()
        );
        Ok(())
    }
}

/// Collapses one series' window into a single point.
///
/// The first point is the template. Numeric series take the mean of all
/// numeric samples, text series keep the first sample verbatim.
fn reduce(points: Vec<Point>) -> Option<Point> {
    let values: Vec<f64> = points.iter().filter_map(Point::value).collect();
    let mut first = points.into_iter().next()?;
    if let FieldValue::Value(v) = &mut first.field {
        *v = values.iter().sum::<f64>() / values.len() as f64;
    }
    Some(first)
}
