//! Process-lifetime pipeline counters.
//!
//! The intake path and the batcher each bump their own counters through a
//! shared [`PipelineStats`]. All counters are monotonic and only read through
//! [`PipelineStats::snapshot`]; nothing in the pipeline branches on them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default weight of the newest sample in the write-latency average.
pub const DEFAULT_LATENCY_SMOOTHING: f64 = 0.2;

#[derive(Debug)]
pub struct PipelineStats {
    received: AtomicU64,
    ignored: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
    written: AtomicU64,
    deduplicated: AtomicU64,
    synthesized: AtomicU64,
    failed_writes: AtomicU64,
    failed_points: AtomicU64,
    // f64 bits; NaN until the first write completes.
    write_latency_ms: AtomicU64,
    last_interval_ms: AtomicU64,
    latency_smoothing: f64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub ignored: u64,
    pub queued: u64,
    pub dropped: u64,
    pub flushes: u64,
    pub written: u64,
    pub deduplicated: u64,
    pub synthesized: u64,
    pub failed_writes: u64,
    pub failed_points: u64,
    /// Smoothed write latency, `None` before the first write
    pub write_latency_ms: Option<f64>,
    /// Wall-clock length of the last flush window
    pub last_interval_secs: f64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_SMOOTHING)
    }
}

impl PipelineStats {
    /// Creates zeroed counters; `latency_smoothing` is clamped into (0, 1].
    pub fn new(latency_smoothing: f64) -> Self {
        Self {
            received: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            written: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            synthesized: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
            failed_points: AtomicU64::new(0),
            write_latency_ms: AtomicU64::new(f64::NAN.to_bits()),
            last_interval_ms: AtomicU64::new(0),
            latency_smoothing: latency_smoothing.clamp(f64::EPSILON, 1.0),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_synthesized(&self) {
        self.synthesized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, interval_ms: u64, deduplicated: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.deduplicated.fetch_add(deduplicated, Ordering::Relaxed);
        self.last_interval_ms.store(interval_ms, Ordering::Relaxed);
    }

    pub fn record_written(&self, points: u64) {
        self.written.fetch_add(points, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self, points: u64) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
        self.failed_points.fetch_add(points, Ordering::Relaxed);
    }

    /// Folds one write latency sample into the moving average.
    ///
    /// Only the batcher calls this, so a plain load/store is enough.
    pub fn record_write_latency(&self, latency_ms: f64) {
        let previous = f64::from_bits(self.write_latency_ms.load(Ordering::Relaxed));
        let next = if previous.is_nan() {
            latency_ms
        } else {
            previous + self.latency_smoothing * (latency_ms - previous)
        };
        self.write_latency_ms.store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let latency = f64::from_bits(self.write_latency_ms.load(Ordering::Relaxed));
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            failed_points: self.failed_points.load(Ordering::Relaxed),
            write_latency_ms: (!latency.is_nan()).then_some(latency),
            last_interval_secs: self.last_interval_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}
