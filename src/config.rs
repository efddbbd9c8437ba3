//! Configuration management for the gridstream bridge.
//!
//! Configuration is assembled from multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/gridstream/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (prefixed with `GRIDSTREAM_`, `__` between
//!    nested keys, e.g. `GRIDSTREAM_PIPELINE__QUEUE_CAPACITY=500`)
//! 5. Command-line arguments
//!
//! Later sources override earlier ones.
//!
//! # Environment Variables
//!
//! Store credentials should be provided via environment variables:
//! - `GRIDSTREAM_INFLUX_USERNAME` - InfluxDB username
//! - `GRIDSTREAM_INFLUX_PASSWORD` - InfluxDB password

use clap::Parser;
use config::{Config, ConfigError};
use gridstream_core::storage::influx::InfluxOptions;
use gridstream_core::{BatcherConfig, OverflowPolicy};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/gridstream/config.toml";

/// Command-line arguments parser.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Bridge MQTT telemetry into InfluxDB with windowed sampling")]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long, env = "GRIDSTREAM_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "GRIDSTREAM_MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    /// InfluxDB host
    #[arg(long, env = "GRIDSTREAM_INFLUX_HOST")]
    pub influx_host: Option<String>,

    /// InfluxDB port
    #[arg(long, env = "GRIDSTREAM_INFLUX_PORT")]
    pub influx_port: Option<u16>,

    /// InfluxDB database name
    #[arg(long, env = "GRIDSTREAM_INFLUX_DB")]
    pub influx_db: Option<String>,

    /// Do not write to InfluxDB
    #[arg(long, env = "GRIDSTREAM_DRY_RUN")]
    pub dry_run: bool,

    /// Seconds between flushes
    #[arg(long, value_name = "SECS")]
    pub flush_interval: Option<u64>,

    /// Ingress queue capacity
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Port for the read-only status endpoint
    #[arg(long, env = "GRIDSTREAM_STATUS_PORT")]
    pub status_port: Option<u16>,

    /// InfluxDB username
    #[arg(long)]
    pub influx_username: Option<String>,

    /// InfluxDB password
    #[arg(long)]
    pub influx_password: Option<String>,
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Skip durable writes, run everything else
    #[serde(default)]
    pub dry_run: bool,
    pub mqtt: MqttConfig,
    pub influx: InfluxConfig,
    pub pipeline: PipelineConfig,
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

/// Subscription transport options.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic filter subscribed on every (re)connect
    pub subscription: String,
    pub keep_alive_secs: u64,
}

/// Time-series store options.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub timeout_secs: u64,
    /// Authentication credentials (not deserialized)
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

/// Authentication credentials for the store.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Aggregation pipeline options.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub flush_interval_secs: u64,
    pub queue_capacity: usize,
    pub dequeue_timeout_ms: u64,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default)]
    pub accept_booleans: bool,
    pub passthrough: Vec<String>,
    pub latency_smoothing: f64,
}

/// Keepalive publisher options.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Force a transport reconnect this often; 0 disables it
    #[serde(default)]
    pub reconnect_secs: u64,
    /// Topics ending with this are remembered as device identities
    pub identity_suffix: String,
}

/// Status endpoint options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    pub port: Option<u16>,
}

impl Settings {
    /// Loads configuration from all available sources.
    pub fn new(cli: CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load default configuration
        builder = builder.add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        // Load system configuration if it exists
        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(config::File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        // Load user configuration if specified
        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(config::File::from(config_path.clone()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GRIDSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Override with command line arguments
        if let Some(ref host) = cli.mqtt_host {
            builder = builder.set_override("mqtt.host", host.as_str())?;
        }
        if let Some(port) = cli.mqtt_port {
            builder = builder.set_override("mqtt.port", port)?;
        }
        if let Some(ref host) = cli.influx_host {
            builder = builder.set_override("influx.host", host.as_str())?;
        }
        if let Some(port) = cli.influx_port {
            builder = builder.set_override("influx.port", port)?;
        }
        if let Some(ref db) = cli.influx_db {
            builder = builder.set_override("influx.database", db.as_str())?;
        }
        if cli.dry_run {
            builder = builder.set_override("dry_run", true)?;
        }
        if let Some(secs) = cli.flush_interval {
            builder = builder.set_override("pipeline.flush_interval_secs", secs)?;
        }
        if let Some(capacity) = cli.queue_capacity {
            builder = builder.set_override("pipeline.queue_capacity", capacity as u64)?;
        }
        if let Some(port) = cli.status_port {
            builder = builder.set_override("status.port", port)?;
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.influx.credentials = Self::load_credentials(&cli);
        settings.validate()?;

        Ok(settings)
    }

    /// Load store credentials.
    /// Priority order (highest to lowest):
    /// 1. Environment variables
    /// 2. Command line arguments
    fn load_credentials(cli: &CliArgs) -> Option<Credentials> {
        if let (Some(username), Some(password)) = (
            env::var("GRIDSTREAM_INFLUX_USERNAME").ok(),
            env::var("GRIDSTREAM_INFLUX_PASSWORD").ok(),
        ) {
            return Some(Credentials { username, password });
        }

        if let (Some(username), Some(password)) = (&cli.influx_username, &cli.influx_password) {
            return Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            });
        }

        None
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.queue_capacity == 0 {
            return Err(ConfigError::Message("pipeline.queue_capacity must be at least 1".into()));
        }
        if p.flush_interval_secs == 0 {
            return Err(ConfigError::Message("pipeline.flush_interval_secs must be positive".into()));
        }
        if p.dequeue_timeout_ms == 0 {
            return Err(ConfigError::Message("pipeline.dequeue_timeout_ms must be positive".into()));
        }
        if !(p.latency_smoothing > 0.0 && p.latency_smoothing <= 1.0) {
            return Err(ConfigError::Message("pipeline.latency_smoothing must be in (0, 1]".into()));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Message("mqtt.keep_alive_secs must be at least 5".into()));
        }
        if self.keepalive.enabled && self.keepalive.interval_secs == 0 {
            return Err(ConfigError::Message("keepalive.interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            flush_interval: Duration::from_secs(self.pipeline.flush_interval_secs),
            dequeue_timeout: Duration::from_millis(self.pipeline.dequeue_timeout_ms),
            passthrough: self.pipeline.passthrough.clone(),
            dry_run: self.dry_run,
        }
    }

    pub fn influx_options(&self) -> InfluxOptions {
        let credentials = self.influx.credentials.clone();
        InfluxOptions {
            host: self.influx.host.clone(),
            port: self.influx.port,
            database: self.influx.database.clone(),
            timeout: Duration::from_secs(self.influx.timeout_secs),
            username: credentials.as_ref().map(|c| c.username.clone()),
            password: credentials.map(|c| c.password),
        }
    }
}
