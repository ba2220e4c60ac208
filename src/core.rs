//! Trust Core façade
//!
//! Wires C1–C10 together at process startup, grounded on the teacher's
//! `manager.rs::AuthManager`: construct the collaborators in dependency
//! order, hand out `Arc` clones for callers that need direct access to one
//! component, and own the background tasks (key rotation, device sweep) for
//! the lifetime of the process. Unlike the teacher, this crate does not keep
//! a global singleton behind a `once_cell::sync::Lazy` — callers construct
//! one `TrustCore` and thread it through explicitly, since nothing in
//! spec.md requires process-wide ambient access.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use secrecy::ExposeSecret;

use crate::audit::AuditPipeline;
use crate::authz::{PermissionGuard, PermissionResolver, RoleLookup, UserRoleKeyLookup};
use crate::config::TrustConfig;
use crate::devices::{DeviceKeyExchange, SweeperHandle};
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::identity::IdentityStore;
use crate::jwt::TokenEngine;
use crate::keyring::{KeyRing, RotationHandle};
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::registry::{ModuleRegistry, RoleRegistry};
use crate::replay::AntiReplaySet;
use crate::secret_store::SecretStore;

/// Every collaborator the trust and identity core is built from, wired and
/// running. One `TrustCore` per process.
pub struct TrustCore {
    pub config: TrustConfig,
    pub keyring: Arc<KeyRing>,
    pub replay: Arc<AntiReplaySet>,
    pub jwt: Arc<TokenEngine>,
    pub roles: Arc<RoleRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub identity: Arc<IdentityStore>,
    pub resolver: Arc<PermissionResolver>,
    pub guard: Arc<PermissionGuard>,
    pub devices: Arc<DeviceKeyExchange>,
    pub audit: Arc<AuditPipeline>,
    pub rate_limiter: RateLimiter,
    _rotation: RotationHandle,
    _sweeper: SweeperHandle,
}

impl TrustCore {
    /// Construct and start every component against the given external
    /// collaborators (§6). Fails closed: any error loading/bootstrapping
    /// the key ring aborts startup, per §4.1.
    pub async fn init(
        config: TrustConfig,
        store: Arc<dyn SecretStore>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Arc<Self>> {
        #[cfg(feature = "metrics")]
        metrics::init_metrics();

        let keyring = KeyRing::init(
            Arc::clone(&store),
            Arc::clone(&bus),
            config.rotation_interval(),
            config.key_validity(),
        )
        .await?;
        let rotation = RotationHandle::spawn(Arc::clone(&keyring));

        let replay = AntiReplaySet::shared();
        let jwt = Arc::new(TokenEngine::new(
            Arc::clone(&keyring),
            Arc::clone(&replay),
            Arc::clone(&bus),
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            config.jwt_clock_skew_sec,
            config.jwt_expiration_sec,
        ));

        let roles = Arc::new(RoleRegistry::new(Arc::clone(&bus)));
        let modules = Arc::new(ModuleRegistry::new(Arc::clone(&bus)));
        let identity = Arc::new(IdentityStore::new(Arc::clone(&bus)));
        identity
            .seed_super_admin_if_empty(
                config.sa_email.as_deref(),
                config.sa_pwd.as_ref().map(|s| ExposeSecret::expose_secret(s).as_str()),
            )
            .await?;

        let resolver = Arc::new(PermissionResolver::new(
            Arc::clone(&roles) as Arc<dyn RoleLookup>,
            Arc::clone(&identity) as Arc<dyn UserRoleKeyLookup>,
            Duration::from_millis(config.authz_cache_ttl_ms),
            config.authz_max_cache_size,
        ));

        let audit = Arc::new(AuditPipeline::new(Arc::clone(&bus)));
        let guard = Arc::new(PermissionGuard::new(Arc::clone(&resolver), Arc::clone(&audit)));

        let devices = Arc::new(DeviceKeyExchange::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            config.max_devices_per_user,
            ChronoDuration::days(config.key_validity_days),
            config.hkdf_info.clone(),
            config.hkdf_output_length,
        ));
        let sweeper = SweeperHandle::spawn(Arc::clone(&devices));

        let rate_limiter = RateLimiter::for_auth();

        Ok(Arc::new(Self {
            config,
            keyring,
            replay,
            jwt,
            roles,
            modules,
            identity,
            resolver,
            guard,
            devices,
            audit,
            rate_limiter,
            _rotation: rotation,
            _sweeper: sweeper,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TracingEventBus;
    use crate::secret_store::InMemorySecretStore;

    async fn make_core() -> Arc<TrustCore> {
        TrustCore::init(
            TrustConfig::default(),
            Arc::new(InMemorySecretStore::new()),
            Arc::new(TracingEventBus::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_wires_every_component() {
        let core = make_core().await;
        assert!(core.keyring.get_active_key().await.unwrap().is_some());
        assert!(core.roles.find_system_roles().await.iter().any(|r| r.key == "super_admin"));
    }

    #[tokio::test]
    async fn sign_verify_and_guard_flow_end_to_end() {
        let core = make_core().await;
        let signed = core
            .jwt
            .sign(crate::jwt::SignRequest {
                sub: "u1".to_string(),
                aud: core.config.jwt_audience.clone(),
                scope: String::new(),
                refresh: false,
            })
            .await
            .unwrap();
        let claims = core.jwt.verify(&signed.token).await.unwrap();
        assert_eq!(claims.sub, "u1");

        let actor = crate::context::Actor::User {
            id: "u1".to_string(),
            sub: Some(claims.sub.clone()),
            scopes: vec![],
            ip_address: None,
        };
        // u1 has no roles, so any non-empty requirement is denied.
        let denied = core
            .guard
            .check(&["roles.delete".to_string()], Some(&actor), "/roles/1", "DELETE")
            .await;
        assert!(denied.is_err());
    }

    #[tokio::test]
    async fn seeds_super_admin_when_configured() {
        let mut config = TrustConfig::default();
        config.sa_email = Some("root@example.com".to_string());
        config.sa_pwd = Some(secrecy::SecretString::from("hunter2-but-longer".to_string()));
        let core = TrustCore::init(
            config,
            Arc::new(InMemorySecretStore::new()),
            Arc::new(TracingEventBus::new()),
        )
        .await
        .unwrap();
        let sa = core.identity.find_by_email("root@example.com").await;
        assert!(sa.is_err(), "super_admin is excluded from find_by_email per §4.10");
    }
}
