//! Pipeline-wide "active" flag.
//!
//! Every long-running activity holds a clone. Any of them may clear it; all
//! of them leave their loop at the next iteration boundary once it is clear.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ActiveFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clears the flag. Idempotent.
    pub fn deactivate(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag is cleared.
    pub async fn deactivated(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|active| !*active).await;
    }
}
