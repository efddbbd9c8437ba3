use clap::Parser;
use gridstream::{mqtt, Bridge, CliArgs, Settings};
use gridstream_core::storage::influx::InfluxSink;
use gridstream_core::WriteSink;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new(CliArgs::parse())?;
    info!(
        "Bridging mqtt://{}:{} into influx {}:{}/{}",
        settings.mqtt.host,
        settings.mqtt.port,
        settings.influx.host,
        settings.influx.port,
        settings.influx.database
    );

    let sink: Arc<dyn WriteSink> = Arc::new(InfluxSink::new(settings.influx_options())?);
    let (transport, control) = mqtt::connect(&settings.mqtt);
    let bridge = Bridge::new(settings)?;

    let active = bridge.active();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            active.deactivate();
        }
    });

    bridge.run(transport, Arc::new(control), sink).await?;
    Ok(())
}
