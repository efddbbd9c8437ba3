//! Keeps the telemetry source publishing.
//!
//! The source stops announcing values unless it is poked periodically. Once
//! the first device identity topic has been seen, an empty message is
//! published to every known identity each interval. Optionally the transport
//! is dropped and re-established on a slower cadence, which makes the source
//! re-announce its complete state.

use crate::bridge::{BridgeError, Identities, TransportControl};
use crate::config::KeepaliveConfig;
use futures::FutureExt;
use gridstream_core::ActiveFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub async fn run(
    control: Arc<dyn TransportControl>,
    mut identities: Identities,
    config: KeepaliveConfig,
    active: ActiveFlag,
) -> Result<(), BridgeError> {
    let discovered = identities.wait_for(|known| !known.is_empty()).map(|r| r.is_ok());
    tokio::select! {
        biased;
        _ = active.deactivated() => return Ok(()),
        ready = discovered => {
            // The feed closes when intake ends, which ends the pipeline too.
            if !ready {
                debug!("Identity feed closed before any device was seen");
                return Ok(());
            }
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let reconnect_every = (config.reconnect_secs > 0).then(|| Duration::from_secs(config.reconnect_secs));
    let mut last_reconnect = Instant::now();

    while active.is_active() {
        tokio::select! {
            biased;
            _ = active.deactivated() => break,
            _ = ticker.tick() => {}
        }

        let topics: Vec<String> = identities.borrow().iter().cloned().collect();
        for topic in &topics {
            info!("Send keepalive to {}", topic);
            control.publish(topic, Vec::new()).await?;
        }

        if let Some(every) = reconnect_every {
            if last_reconnect.elapsed() >= every {
                info!("Forcing transport reconnect");
                control.reconnect().await?;
                last_reconnect = Instant::now();
            }
        }
        debug!("Keepalive round done, {} identities", topics.len());
    }
    Ok(())
}
