//! Gridstream: MQTT telemetry into InfluxDB with windowed sampling
//!
//! Energy systems publish one MQTT message per signal update. This crate
//! subscribes to that firehose, reduces it per flush window (with three-phase
//! totals reconstructed along the way) and writes the result as tagged points.
//!
//! # Example
//!
//! ```rust,no_run
//! use gridstream::{mqtt, Bridge, CliArgs, Settings};
//! use gridstream_core::storage::influx::InfluxSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::new(CliArgs::default())?;
//!
//!     // Store side
//!     let sink = Arc::new(InfluxSink::new(settings.influx_options())?);
//!
//!     // Source side
//!     let (transport, control) = mqtt::connect(&settings.mqtt);
//!
//!     // Runs until a fatal error or until the active flag is cleared
//!     let bridge = Bridge::new(settings)?;
//!     bridge.run(transport, Arc::new(control), sink).await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod keepalive;
pub mod mqtt;
pub mod status;
pub mod tests;

pub use crate::bridge::{Bridge, BridgeError, Identities, Intake, Transport, TransportControl, TransportEvent};
pub use crate::config::{CliArgs, Settings};
pub use crate::status::{StatusReport, StatusState};
