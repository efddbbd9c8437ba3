use crate::config::Settings;
use crate::keepalive;
use crate::status::{self, StatusState};
use async_trait::async_trait;
use gridstream_core::{
    ActiveFlag, IngressQueue, InboundMessage, PipelineStats, PointNormalizer, Push, WindowBatcher, WriteSink,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Device identity topics seen so far, shared with the keepalive loop.
pub type Identities = watch::Receiver<BTreeSet<String>>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Pipeline(#[from] gridstream_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task {0} panicked")]
    Task(String),
}

impl From<gridstream_core::SinkError> for BridgeError {
    fn from(e: gridstream_core::SinkError) -> Self {
        BridgeError::Pipeline(e.into())
    }
}

/// One event from the subscription transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A (re)connect was acknowledged; subscriptions must be renewed.
    Connected,
    Message(InboundMessage),
    /// Protocol traffic with nothing for the pipeline.
    Idle,
}

/// Inbound side of the subscription transport.
#[async_trait]
pub trait Transport: Send {
    /// Waits for the next event. An error ends the pipeline.
    async fn next_event(&mut self) -> Result<TransportEvent, BridgeError>;
}

/// Outbound side of the subscription transport.
#[async_trait]
pub trait TransportControl: Send + Sync {
    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
    /// Drops the connection so the transport reconnects and the source
    /// re-announces its full state.
    async fn reconnect(&self) -> Result<(), BridgeError>;
    async fn disconnect(&self) -> Result<(), BridgeError>;
}

/// The event-intake path. Runs on every inbound message and never blocks.
pub struct Intake {
    normalizer: PointNormalizer,
    queue: IngressQueue,
    stats: Arc<PipelineStats>,
    identity_suffix: String,
    identities: watch::Sender<BTreeSet<String>>,
}

impl Intake {
    pub fn new(
        normalizer: PointNormalizer,
        queue: IngressQueue,
        stats: Arc<PipelineStats>,
        identity_suffix: impl Into<String>,
    ) -> (Self, Identities) {
        let (identities, rx) = watch::channel(BTreeSet::new());
        let intake = Self {
            normalizer,
            queue,
            stats,
            identity_suffix: identity_suffix.into(),
            identities,
        };
        (intake, rx)
    }

    /// Normalizes `message` and queues the point. `None` when the message
    /// was discarded before reaching the queue.
    pub fn handle(&mut self, message: &InboundMessage) -> Option<Push> {
        self.stats.record_received();
        if !self.identity_suffix.is_empty() && message.topic.ends_with(&self.identity_suffix) {
            let topic = &message.topic;
            self.identities.send_if_modified(|known| {
                if known.contains(topic) {
                    return false;
                }
                info!("Discovered device identity {}", topic);
                known.insert(topic.clone())
            });
        }
        let point = self.normalizer.normalize(&message.topic, &message.payload)?;
        Some(self.queue.push(point))
    }
}

/// Wires the pipeline together and owns its shared state.
pub struct Bridge {
    settings: Settings,
    stats: Arc<PipelineStats>,
    queue: IngressQueue,
    active: ActiveFlag,
}

impl Bridge {
    pub fn new(settings: Settings) -> Result<Self, BridgeError> {
        settings.validate()?;
        let stats = Arc::new(PipelineStats::new(settings.pipeline.latency_smoothing));
        let queue = IngressQueue::new(
            settings.pipeline.queue_capacity,
            settings.pipeline.overflow_policy,
            stats.clone(),
        )?;
        Ok(Self {
            settings,
            stats,
            queue,
            active: ActiveFlag::new(),
        })
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn active(&self) -> ActiveFlag {
        self.active.clone()
    }

    /// Runs intake, batcher, keepalive and the optional status server until
    /// the active flag clears. Returns the first error any of them hit.
    pub async fn run<T>(
        self,
        transport: T,
        control: Arc<dyn TransportControl>,
        sink: Arc<dyn WriteSink>,
    ) -> Result<(), BridgeError>
    where
        T: Transport + 'static,
    {
        let Bridge {
            settings,
            stats,
            queue,
            active,
        } = self;

        if settings.dry_run {
            warn!("Running in dry-run mode, nothing will be written");
        } else {
            sink.init().await?;
        }

        let normalizer = PointNormalizer::new(settings.pipeline.accept_booleans, stats.clone());
        let (intake, identities) = Intake::new(
            normalizer,
            queue.clone(),
            stats.clone(),
            settings.keepalive.identity_suffix.clone(),
        );

        let batcher = WindowBatcher::new(settings.batcher_config(), stats.clone());
        let batcher_task = tokio::spawn(supervise(
            "batcher",
            active.clone(),
            batcher.run(queue.receiver(), sink, active.clone()),
        ));

        let keepalive_task = if settings.keepalive.enabled {
            Some(tokio::spawn(supervise(
                "keepalive",
                active.clone(),
                keepalive::run(control.clone(), identities, settings.keepalive.clone(), active.clone()),
            )))
        } else {
            None
        };

        let status_task = settings.status.port.map(|port| {
            let state = StatusState::new(stats.clone(), queue.clone(), active.clone());
            let active = active.clone();
            tokio::spawn(async move {
                // The status surface is optional, losing it leaves the pipeline running.
                if let Err(e) = status::serve(port, state, active).await {
                    error!("Status server failed: {}", e);
                }
            })
        });

        let intake_result = supervise(
            "intake",
            active.clone(),
            intake_loop(transport, control.clone(), intake, settings.mqtt.subscription.clone(), active.clone()),
        )
        .await;

        active.deactivate();
        if let Err(e) = control.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }

        let mut first_error = intake_result.err();
        let batcher_result = join("batcher", batcher_task).await;
        first_error = first_error.or(batcher_result.err());
        if let Some(task) = keepalive_task {
            first_error = first_error.or(join("keepalive", task).await.err());
        }
        if let Some(task) = status_task {
            let _ = task.await;
        }

        let snap = stats.snapshot();
        info!(
            "Shut down. Messages handled: {}, ignored {}, dropped {}, failed {}",
            snap.received, snap.ignored, snap.dropped, snap.failed_points
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs one pipeline activity and clears the active flag when it ends, for
/// whatever reason.
async fn supervise<F, E>(name: &'static str, active: ActiveFlag, activity: F) -> Result<(), BridgeError>
where
    F: Future<Output = Result<(), E>>,
    E: Into<BridgeError>,
{
    let result = activity.await.map_err(Into::into);
    match &result {
        Ok(()) => info!("{} stopped", name),
        Err(e) => error!("{} failed: {}", name, e),
    }
    active.deactivate();
    result
}

async fn join(name: &str, task: tokio::task::JoinHandle<Result<(), BridgeError>>) -> Result<(), BridgeError> {
    match task.await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Task(name.to_string())),
    }
}

async fn intake_loop<T: Transport>(
    mut transport: T,
    control: Arc<dyn TransportControl>,
    mut intake: Intake,
    subscription: String,
    active: ActiveFlag,
) -> Result<(), BridgeError> {
    while active.is_active() {
        let event = tokio::select! {
            _ = active.deactivated() => break,
            event = transport.next_event() => event?,
        };

        match event {
            TransportEvent::Connected => {
                info!("Connected, subscribing to {}", subscription);
                control.subscribe(&subscription).await?;
            }
            TransportEvent::Message(message) => {
                intake.handle(&message);
            }
            TransportEvent::Idle => {}
        }
    }
    Ok(())
}
