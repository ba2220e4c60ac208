//! Persistence seam for audit events
//!
//! The audit pipeline owns no entity durably beyond the moment of emission
//! (§3); the store owns the persisted events. Mirrors the
//! `SecretStore`/`EventBus` collaborator shape so a document-store-backed
//! implementation drops in without touching [`super::pipeline`].

use async_trait::async_trait;

use crate::error::Result;

use super::event::AuditEvent;

/// The persistence interface the audit pipeline writes through.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a new event, or overwrite one with the same `id`.
    async fn put(&self, event: AuditEvent) -> Result<()>;
    /// Fetch a single event by id.
    async fn get(&self, id: &str) -> Result<Option<AuditEvent>>;
    /// All events, newest first, for the query/summarize/archive layer
    /// above to filter and paginate in memory.
    async fn all(&self) -> Result<Vec<AuditEvent>>;
    /// Delete every event with `at < before`, returning the count removed.
    async fn delete_before(&self, before: chrono::DateTime<chrono::Utc>) -> Result<usize>;
}

/// In-memory reference `AuditStore`.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    events: tokio::sync::RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn put(&self, event: AuditEvent) -> Result<()> {
        let mut guard = self.events.write().await;
        if let Some(existing) = guard.iter_mut().find(|e| e.id == event.id) {
            *existing = event;
        } else {
            guard.push(event);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuditEvent>> {
        let guard = self.events.read().await;
        Ok(guard.iter().find(|e| e.id == id).cloned())
    }

    async fn all(&self) -> Result<Vec<AuditEvent>> {
        let mut events = self.events.read().await.clone();
        events.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(events)
    }

    async fn delete_before(&self, before: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let mut guard = self.events.write().await;
        let before_len = guard.len();
        guard.retain(|e| e.at >= before);
        Ok(before_len - guard.len())
    }
}
