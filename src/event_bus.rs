//! Event bus collaborator interface (§6)
//!
//! `emit(topic, payload)` is how the core tells the rest of the system
//! "something happened" without calling back into it directly — this is
//! the message-passing link §9 uses to break the Audit↔Authz cycle.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Topics the core emits, per §6.
pub mod topics {
    pub const JWT_GENERATED: &str = "auth.jwt-generated";
    pub const JWT_VALIDATED: &str = "auth.jwt-validated";
    pub const JWT_VALIDATION_FAILED: &str = "auth.jwt-validation-failed";
    pub const REPLAY_DETECTED: &str = "auth.replay-detected";
    pub const JWKS_KEY_ROTATED: &str = "auth.jwks-key-rotated";
    pub const JWKS_KEY_INVALIDATED: &str = "auth.jwks-key-invalidated";
    pub const AUDIT_EVENT_CREATED: &str = "audit.event-created";
    pub const AUDIT_RESPONSE_CAPTURED: &str = "audit.response-captured";
    pub const PERMISSIONS_CHANGED: &str = "permissions.changed";
    pub const DEVICE_REGISTERED: &str = "device.registered";
    pub const DEVICE_KEY_ROTATED: &str = "device.key.rotated";
    pub const DEVICE_EXPIRED: &str = "device.expired";
    pub const DEVICE_REVOKED: &str = "device.revoked";
}

/// The event bus interface the trust core consumes (§6).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` under `topic`. Best-effort; the core never blocks
    /// a request path waiting on a subscriber.
    async fn emit(&self, topic: &str, payload: Value) -> Result<()>;
}

/// Tracing-backed `EventBus`: logs every emission at `debug` and otherwise
/// does nothing. Suitable as a default for embedding callers that do not
/// need a real bus, and for tests asserting emission without a broker.
#[derive(Debug, Default, Clone)]
pub struct TracingEventBus;

impl TracingEventBus {
    /// Construct a new tracing-backed bus.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventBus for TracingEventBus {
    async fn emit(&self, topic: &str, payload: Value) -> Result<()> {
        debug!(topic, %payload, "event emitted");
        Ok(())
    }
}
