//! Runtime configuration for the trust core
//!
//! Loaded from environment variables per the Environment table. Defaults
//! mirror the component defaults called out alongside each algorithm.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Trust core configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// `JWT_ISSUER` — the `iss` claim stamped on every signed token.
    pub jwt_issuer: String,
    /// `JWT_AUDIENCE` — the `aud` claim required on verify.
    pub jwt_audience: String,
    /// `JWT_CLOCK_SKEW_SEC` — tolerance applied to `exp`/`nbf`/`iat`. Default 10.
    pub jwt_clock_skew_sec: i64,
    /// `JWT_EXPIRATION_SEC` — access token lifetime. Default 3600.
    pub jwt_expiration_sec: i64,
    /// `JWKS_KEY_ROTATION_INTERVAL_HOURS` — periodic rotation cadence. Default 24.
    pub jwks_key_rotation_interval_hours: u64,
    /// `VAULT_KV_MOUNT` — logical mount point passed through to the secret
    /// store collaborator; this crate does not interpret it directly.
    pub vault_kv_mount: String,
    /// `SA_EMAIL` — super-admin seed email, if any.
    pub sa_email: Option<String>,
    /// `SA_PWD` — super-admin seed password, held as a secret.
    #[serde(skip_serializing)]
    pub sa_pwd: Option<SecretString>,
    /// `API_KEY` — the expected `x-api-key` value, held as a secret.
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    /// `AUTHZ_CACHE_TTL_MS` — permission view cache TTL. Default 60_000.
    pub authz_cache_ttl_ms: u64,
    /// `AUTHZ_MAX_CACHE_SIZE` — permission cache capacity. Default 10_000.
    pub authz_max_cache_size: usize,
    /// `MAX_DEVICES_PER_USER` — active-device cap. Default 5.
    pub max_devices_per_user: usize,
    /// `KEY_VALIDITY_DAYS` — device key lifetime in days. Default 90.
    pub key_validity_days: i64,
    /// `HKDF_INFO` — context string for the device key HKDF expand step.
    pub hkdf_info: String,
    /// `HKDF_OUTPUT_LENGTH` — HKDF output length in bytes. Default 32.
    pub hkdf_output_length: usize,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            jwt_issuer: "trust-core".to_string(),
            jwt_audience: "trust-core-clients".to_string(),
            jwt_clock_skew_sec: 10,
            jwt_expiration_sec: 3600,
            jwks_key_rotation_interval_hours: 24,
            vault_kv_mount: "secret".to_string(),
            sa_email: None,
            sa_pwd: None,
            api_key: None,
            authz_cache_ttl_ms: 60_000,
            authz_max_cache_size: 10_000,
            max_devices_per_user: 5,
            key_validity_days: 90,
            hkdf_info: "trust-core/device-channel".to_string(),
            hkdf_output_length: 32,
        }
    }
}

impl TrustConfig {
    /// Load configuration from the process environment, falling back to the
    /// documented defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            jwt_issuer: env_var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            jwt_audience: env_var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
            jwt_clock_skew_sec: env_parse("JWT_CLOCK_SKEW_SEC", defaults.jwt_clock_skew_sec),
            jwt_expiration_sec: env_parse("JWT_EXPIRATION_SEC", defaults.jwt_expiration_sec),
            jwks_key_rotation_interval_hours: env_parse(
                "JWKS_KEY_ROTATION_INTERVAL_HOURS",
                defaults.jwks_key_rotation_interval_hours,
            ),
            vault_kv_mount: env_var("VAULT_KV_MOUNT").unwrap_or(defaults.vault_kv_mount),
            sa_email: env_var("SA_EMAIL"),
            sa_pwd: env_var("SA_PWD").map(SecretString::from),
            api_key: env_var("API_KEY").map(SecretString::from),
            authz_cache_ttl_ms: env_parse("AUTHZ_CACHE_TTL_MS", defaults.authz_cache_ttl_ms),
            authz_max_cache_size: env_parse(
                "AUTHZ_MAX_CACHE_SIZE",
                defaults.authz_max_cache_size,
            ),
            max_devices_per_user: env_parse(
                "MAX_DEVICES_PER_USER",
                defaults.max_devices_per_user,
            ),
            key_validity_days: env_parse("KEY_VALIDITY_DAYS", defaults.key_validity_days),
            hkdf_info: env_var("HKDF_INFO").unwrap_or(defaults.hkdf_info),
            hkdf_output_length: env_parse("HKDF_OUTPUT_LENGTH", defaults.hkdf_output_length),
        }
    }

    /// Clock skew as a [`Duration`], for use against `chrono`/`tokio` timers.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_sec.max(0) as u64)
    }

    /// Access-token lifetime as a [`Duration`].
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_sec.max(0) as u64)
    }

    /// Key rotation cadence as a [`Duration`].
    #[must_use]
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_key_rotation_interval_hours * 3600)
    }

    /// Device key validity window as a [`Duration`].
    #[must_use]
    pub fn key_validity(&self) -> Duration {
        Duration::from_secs((self.key_validity_days.max(0) as u64) * 86_400)
    }
}
