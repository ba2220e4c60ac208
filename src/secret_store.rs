//! Secret store collaborator interface (§6)
//!
//! The trust core never owns a vault; it consumes one through this trait.
//! Paths used by the core: `jwks`, `jwks-private/{kid}`, `device/{keyHandle}`.
//! An in-memory reference implementation is provided for tests and for
//! embedding callers that supply their own backend at the same seam.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, TrustError};

/// A flat key-value document as returned by `readKV`.
pub type KvMap = HashMap<String, serde_json::Value>;

/// The secret store interface the trust core consumes (§6).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the document at `path`. Returns `None` if nothing is stored there.
    async fn read_kv(&self, path: &str) -> Result<Option<KvMap>>;

    /// Write (replace) the document at `path`.
    async fn write_kv(&self, path: &str, data: KvMap) -> Result<()>;

    /// Delete the document at `path`, if present.
    async fn delete_kv(&self, path: &str) -> Result<()>;
}

/// In-memory `SecretStore`, used by default and by tests. Not durable across
/// process restarts — a production deployment supplies a real backend
/// (e.g. Vault) behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretStore {
    inner: Arc<RwLock<HashMap<String, KvMap>>>,
}

impl InMemorySecretStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn read_kv(&self, path: &str) -> Result<Option<KvMap>> {
        let guard = self.inner.read().await;
        Ok(guard.get(path).cloned())
    }

    async fn write_kv(&self, path: &str, data: KvMap) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete_kv(&self, path: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.remove(path);
        Ok(())
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(e: serde_json::Error) -> Self {
        TrustError::SecretStore(e.to_string())
    }
}
