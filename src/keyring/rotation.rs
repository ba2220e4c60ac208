//! Periodic key rotation timer for [`super::KeyRing`]
//!
//! Grounded on the teacher's `manager.rs` background-cleanup pattern:
//! `tokio::spawn` + `tokio::time::interval`, stopped by dropping the handle.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::KeyRing;

/// Owns the background rotation task. Dropping it aborts the task, giving
/// the server a clean stop on shutdown (§5: "cancellation of a server
/// cleanly stops it").
pub struct RotationHandle {
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Spawn the periodic rotation timer for `ring`.
    pub fn spawn(ring: Arc<KeyRing>) -> Self {
        let interval = ring
            .rotation_interval()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(3600 * 24));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                info!("periodic key rotation firing");
                if let Err(e) = ring.rotate().await {
                    error!(error = %e, "periodic key rotation failed");
                }
            }
        });
        Self { task }
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
