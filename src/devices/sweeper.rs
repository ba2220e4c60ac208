//! Periodic device-expiry sweeper (§4.7 expiry sweep)
//!
//! Same shape as [`crate::keyring::rotation::RotationHandle`]: a
//! `tokio::spawn` timer loop, stopped by dropping the handle.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::exchange::DeviceKeyExchange;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Owns the background device-expiry sweep task.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Spawn the periodic sweep timer for `exchange`.
    pub fn spawn(exchange: Arc<DeviceKeyExchange>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let expired = exchange.sweep_expired().await;
                if expired > 0 {
                    info!(count = expired, "device expiry sweep retired devices");
                }
            }
        });
        Self { task }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
