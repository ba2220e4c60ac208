//! Shared test fixtures for the trust-core integration suite.

#![allow(dead_code)]

use std::sync::Arc;

use trust_core::config::TrustConfig;
use trust_core::event_bus::TracingEventBus;
use trust_core::secret_store::InMemorySecretStore;
use trust_core::TrustCore;

/// Build a fully wired `TrustCore` over in-memory collaborators, with a
/// short authz cache TTL so tests that mutate roles/permissions don't need
/// to wait out the default minute-long window.
pub async fn make_core() -> Arc<TrustCore> {
    let mut config = TrustConfig::default();
    config.authz_cache_ttl_ms = 50;
    TrustCore::init(
        config,
        Arc::new(InMemorySecretStore::new()),
        Arc::new(TracingEventBus::new()),
    )
    .await
    .expect("trust core should initialize over in-memory collaborators")
}

/// Create an active user with the given primary role and no additional
/// roles, returning its id.
pub async fn make_user(core: &TrustCore, email: &str, role_key: &str) -> String {
    let user = core
        .identity
        .create(
            Some(email.to_string()),
            "+10000000000".to_string(),
            "000000000".to_string(),
            "Test User".to_string(),
            "correct horse battery staple",
            role_key.to_string(),
            vec![],
        )
        .await
        .expect("user creation should succeed for a valid role");
    user.id
}
