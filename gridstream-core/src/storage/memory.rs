//! In-process sink that keeps every batch it receives.
//!
//! Failures can be scripted with [`MemorySink::fail_next`]; each scripted
//! error is returned once, in order, before writes succeed again.

use crate::error::SinkError;
use crate::point::Point;
use crate::storage::WriteSink;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Point>>>,
    failures: Mutex<VecDeque<SinkError>>,
    initialized: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next write.
    pub async fn fail_next(&self, error: SinkError) {
        self.failures.lock().await.push_back(error);
    }

    /// Batches written so far, oldest first.
    pub async fn batches(&self) -> Vec<Vec<Point>> {
        self.batches.lock().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }
}

#[async_trait]
impl WriteSink for MemorySink {
    async fn init(&self) -> Result<(), SinkError> {
        *self.initialized.lock().await = true;
        Ok(())
    }

    async fn write_points(&self, points: Vec<Point>) -> Result<(), SinkError> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        self.batches.lock().await.push(points);
        Ok(())
    }
}
