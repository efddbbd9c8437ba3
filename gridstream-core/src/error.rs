//! Error types for the aggregation engine and its write sinks.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Ingress queue disconnected")]
    QueueClosed,

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Failure reported by a [`WriteSink`](crate::storage::WriteSink).
///
/// Only `Fatal` stops the pipeline. The other two drop the batch and are
/// counted, the next window supersedes the lost one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Network trouble or a server-side error.
    #[error("Transient write failure: {0}")]
    Transient(String),

    /// The store refused the batch itself.
    #[error("Batch rejected by store: {0}")]
    Rejected(String),

    /// Credentials or configuration the sink cannot recover from.
    #[error("Fatal sink error: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Fatal(_))
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return SinkError::Fatal(e.to_string());
        }
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                SinkError::Fatal(e.to_string())
            }
            Some(status) if status.is_client_error() => SinkError::Rejected(e.to_string()),
            _ => SinkError::Transient(e.to_string()),
        }
    }
}
