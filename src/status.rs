//! Read-only HTTP status surface.

use crate::bridge::BridgeError;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use gridstream_core::{ActiveFlag, IngressQueue, PipelineStats, StatsSnapshot};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct StatusState {
    stats: Arc<PipelineStats>,
    queue: IngressQueue,
    active: ActiveFlag,
    started_at: DateTime<Utc>,
}

impl StatusState {
    pub fn new(stats: Arc<PipelineStats>, queue: IngressQueue, active: ActiveFlag) -> Self {
        Self {
            stats,
            queue,
            active,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(state)
}

async fn status(State(state): State<StatusState>) -> Json<StatusReport> {
    Json(StatusReport {
        active: state.active.is_active(),
        started_at: state.started_at,
        queue_depth: state.queue.len(),
        queue_capacity: state.queue.capacity(),
        stats: state.stats.snapshot(),
    })
}

async fn health() -> &'static str {
    "OK"
}

/// Serves the status routes until the pipeline stops.
pub async fn serve(port: u16, state: StatusState, active: ActiveFlag) -> Result<(), BridgeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status endpoint listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { active.deactivated().await })
        .await?;
    Ok(())
}
