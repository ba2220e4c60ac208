//! Attack scenarios against the trust and identity core: replay, audience
//! confusion, permission escalation via wildcard misuse, device-cap abuse,
//! login brute-forcing, and audit redaction of sensitive fields.

mod common;

use trust_core::audit::AuditOptions;
use trust_core::authz::PermissionResolver;
use trust_core::jwt::SignRequest;
use trust_core::rate_limit::RateLimitKey;

/// A stolen access token cannot be replayed a second time against `verify`.
#[tokio::test]
async fn replayed_access_token_is_rejected() {
    let core = common::make_core().await;
    let signed = core
        .jwt
        .sign(SignRequest {
            sub: "victim".to_string(),
            aud: core.config.jwt_audience.clone(),
            scope: "payments.read".to_string(),
            refresh: false,
        })
        .await
        .unwrap();

    core.jwt.verify(&signed.token).await.unwrap();
    let replay = core.jwt.verify(&signed.token).await;
    assert!(replay.is_err(), "a consumed jti must never verify twice");
}

/// A token minted for a different relying party is not accepted here, even
/// though its signature and issuer are otherwise valid.
#[tokio::test]
async fn cross_service_token_is_rejected_on_audience_mismatch() {
    let core = common::make_core().await;
    let foreign = core
        .jwt
        .sign(SignRequest {
            sub: "victim".to_string(),
            aud: "unrelated-service".to_string(),
            scope: String::new(),
            refresh: false,
        })
        .await
        .unwrap();

    assert!(core.jwt.verify(&foreign.token).await.is_err());
}

/// A `billing.*` module wildcard must not be interpreted as a match for an
/// unrelated module, and only the global `*` grants everything.
#[tokio::test]
async fn module_wildcard_does_not_leak_into_other_modules() {
    let core = common::make_core().await;

    core.roles
        .create("billing_admin", "Billing Admin", vec!["billing.*".to_string()])
        .await
        .unwrap();

    // find_active_by_keys in the resolver is driven by the user's role
    // keys; wire this actor's roles directly through a guard check instead
    // of going through identity, since this test only exercises wildcard
    // algebra, not account creation.
    let view = core.roles.find_active_by_keys(&["billing_admin".to_string()]).await;
    let mut merged = trust_core::authz::PermissionView::empty();
    for role in &view {
        for key in &role.permission_keys {
            merged.absorb(key);
        }
    }

    assert!(PermissionResolver::has_permission(&merged, "billing.refund"));
    assert!(!PermissionResolver::has_permission(&merged, "roles.delete"));
    assert!(!PermissionResolver::has_permission(&merged, "*"));
}

/// A device cannot register past the configured per-user cap, even across
/// distinct device ids (prevents a single account from hoarding key slots).
#[tokio::test]
async fn device_registration_cap_blocks_excess_devices() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use p256::SecretKey;
    use trust_core::devices::ExchangeRequest;

    let core = common::make_core().await;

    let sample_request = |device_id: &str| ExchangeRequest {
        device_public_key: {
            let secret = SecretKey::random(&mut rand::rngs::OsRng);
            STANDARD.encode(secret.public_key().to_sec1_bytes())
        },
        device_id: device_id.to_string(),
        app_version: "1.0.0".to_string(),
        platform: "ios".to_string(),
        device_name: None,
    };

    for (i, device_id) in ["a", "b"].iter().enumerate() {
        let result = core.devices.exchange("attacker", sample_request(device_id)).await;
        if i < core.config.max_devices_per_user {
            assert!(result.is_ok());
        }
    }

    // The configured default cap is generous; drive it to the limit plus
    // one to exercise TrustError::DeviceLimitReached regardless of config.
    let cap = core.config.max_devices_per_user;
    for n in 0..cap {
        let _ = core.devices.exchange("attacker2", sample_request(&format!("d{n}"))).await;
    }
    let overflow = core.devices.exchange("attacker2", sample_request("overflow")).await;
    assert!(overflow.is_err(), "the {cap}th+1 device must be rejected");
}

/// Repeated failed logins against the same source hit the login rate limit
/// before an unbounded credential-stuffing loop could succeed.
#[tokio::test]
async fn login_endpoint_throttles_repeated_attempts() {
    let core = common::make_core().await;
    let key = RateLimitKey::ip("203.0.113.7");

    let mut saw_limited = false;
    for _ in 0..20 {
        if core.rate_limiter.check(&key, "login").await.is_err() {
            saw_limited = true;
            break;
        }
    }
    assert!(saw_limited, "brute-forcing /auth/login must eventually be throttled");
}

/// The device-exchange endpoint is throttled independently of login.
#[tokio::test]
async fn device_exchange_endpoint_throttles_repeated_attempts() {
    let core = common::make_core().await;
    let key = RateLimitKey::ip("203.0.113.8");

    let mut saw_limited = false;
    for _ in 0..30 {
        if core.rate_limiter.check(&key, "device_exchange").await.is_err() {
            saw_limited = true;
            break;
        }
    }
    assert!(saw_limited, "hammering /devices/exchange must eventually be throttled");
}

/// A denied permission check that carries a bearer token in its payload
/// must never leak that token into the persisted audit trail.
#[tokio::test]
async fn denied_request_audit_entry_redacts_bearer_token() {
    let core = common::make_core().await;

    core.audit
        .log_deny(
            "roles.delete",
            "role",
            Some("role-1".to_string()),
            "missing permission",
            AuditOptions {
                payload: Some(serde_json::json!({
                    "token": "Bearer eyJhbGciOiJSUzI1NiJ9.stolen.sig",
                    "roleKey": "admin",
                })),
                ..Default::default()
            },
        )
        .await;

    // The dispatcher is a background task; give it a moment to persist.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let page = core
        .audit
        .query(&Default::default(), Default::default())
        .await
        .unwrap();
    let event = page
        .items
        .iter()
        .find(|e| e.action == "roles.delete")
        .expect("the deny event should have been persisted");

    let payload = event.payload.as_ref().unwrap();
    assert_eq!(payload["token"], serde_json::json!("***REDACTED***"));
    assert_eq!(payload["roleKey"], serde_json::json!("admin"));
}
