/*!
# Gridstream Core: windowed aggregation for per-signal telemetry

Telemetry sources that publish one message per signal update produce a
bursty firehose. Time-series stores want periodic, deduplicated, tagged
points. This crate is the engine in between:

- [`normalizer`] turns `(topic, payload)` events into typed [`Point`]s
- [`phase`] reconstructs three-phase totals (`L1`+`L2`+`L3` into `Lx`)
- [`queue`] is the bounded, non-blocking handoff with overflow accounting
- [`batcher`] reduces each series per flush window and writes the batch
- [`storage`] holds the write sinks (InfluxDB, in-memory)
- [`stats`] exposes monotonic counters through a read-only snapshot

## Usage

```rust,no_run
use gridstream_core::{
    ActiveFlag, BatcherConfig, IngressQueue, OverflowPolicy, PipelineStats, PointNormalizer,
    WindowBatcher,
};
use gridstream_core::storage::memory::MemorySink;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Arc::new(PipelineStats::default());
    let queue = IngressQueue::new(100, OverflowPolicy::ClearAll, stats.clone())?;
    let mut normalizer = PointNormalizer::new(false, stats.clone());

    // Intake path: called for every inbound message.
    if let Some(point) = normalizer.normalize("N/c0619ab1/grid/30/Ac/L1/Power", br#"{"value": 120}"#) {
        queue.push(point);
    }

    // Batcher: runs until the active flag clears.
    let batcher = WindowBatcher::new(BatcherConfig::default(), stats.clone());
    let active = ActiveFlag::new();
    batcher.run(queue.receiver(), Arc::new(MemorySink::new()), active).await?;
    Ok(())
}
```
*/

pub mod active;
pub mod batcher;
pub mod error;
pub mod normalizer;
pub mod phase;
pub mod point;
pub mod queue;
pub mod stats;
pub mod storage;

pub use active::ActiveFlag;
pub use batcher::{BatcherConfig, FlushBatch, WindowBatcher};
pub use error::{Error, Result, SinkError};
pub use normalizer::{PointNormalizer, SampleValue};
pub use phase::{PhaseAggregator, PhaseGroupKey};
pub use point::{FieldValue, InboundMessage, Point, SeriesKey, Tags};
pub use queue::{IngressQueue, IngressReceiver, OverflowPolicy, Push};
pub use stats::{PipelineStats, StatsSnapshot};
pub use storage::WriteSink;
