//! ECDH P-256 device key exchange (§4.7)
//!
//! `p256::PublicKey::from_sec1_bytes` is the same entry point the teacher's
//! `turbomcp-dpop` HSM backends use to parse an untrusted SEC1 point
//! (`crates/turbomcp-dpop/src/hsm/yubihsm.rs`); this module reuses it for the
//! device's uncompressed public key instead of a hardware-backed one.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hkdf::Hkdf;
use p256::ecdh::diffie_hellman;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};
use crate::metrics;
use crate::secret_store::SecretStore;

const DEVICE_PUBLIC_KEY_B64_LEN: usize = 88;
const SEC1_UNCOMPRESSED_LEN: usize = 65;
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// A device's key-exchange lifecycle status (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Rotated,
    Revoked,
    Expired,
}

/// A registered device's server-side record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub device_id: String,
    pub user_id: String,
    pub key_handle: String,
    pub device_public_key: String,
    pub server_public_key_ref: String,
    pub salt_hex: String,
    pub status: DeviceStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub platform: String,
    pub app_version: String,
}

/// Append-only rotation history entry for a device (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationRecord {
    pub device_id: String,
    pub old_key_handle: String,
    pub new_key_handle: String,
    pub rotated_at: DateTime<Utc>,
}

/// The inbound key-exchange request (§4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRequest {
    pub device_public_key: String,
    pub device_id: String,
    pub app_version: String,
    pub platform: String,
    pub device_name: Option<String>,
}

/// The outbound key-exchange response (§4.7).
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeResponse {
    pub server_public_key: String,
    pub key_handle: String,
    pub salt: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn validate_request(req: &ExchangeRequest) -> Result<()> {
    if req.device_id.trim().is_empty() {
        return Err(TrustError::Validation("deviceId must not be empty".to_string()));
    }
    let version_parts: Vec<&str> = req.app_version.split('.').collect();
    let version_ok = version_parts.len() == 3 && version_parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !version_ok {
        return Err(TrustError::Validation(format!(
            "appVersion {} does not match semver",
            req.app_version
        )));
    }
    if req.platform != "android" && req.platform != "ios" {
        return Err(TrustError::Validation(format!(
            "platform {} is not android or ios",
            req.platform
        )));
    }
    Ok(())
}

fn decode_device_public_key(encoded: &str) -> Result<PublicKey> {
    if encoded.len() != DEVICE_PUBLIC_KEY_B64_LEN {
        return Err(TrustError::InvalidDeviceKey(format!(
            "expected {DEVICE_PUBLIC_KEY_B64_LEN} base64 chars, got {}",
            encoded.len()
        )));
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| TrustError::InvalidDeviceKey(format!("not valid base64: {e}")))?;
    if bytes.len() != SEC1_UNCOMPRESSED_LEN || bytes[0] != SEC1_UNCOMPRESSED_TAG {
        return Err(TrustError::InvalidDeviceKey(
            "expected 65-byte uncompressed SEC1 point starting with 0x04".to_string(),
        ));
    }
    PublicKey::from_sec1_bytes(&bytes).map_err(|e| TrustError::InvalidDeviceKey(format!("invalid curve point: {e}")))
}

fn random_key_handle() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn random_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Device registration, rotation, and the shared-secret derivation pipeline
/// (C7). Holds no cryptographic material beyond the lifetime of a single
/// `exchange` call — server private keys live only in the secret store.
pub struct DeviceKeyExchange {
    store: Arc<dyn SecretStore>,
    bus: Arc<dyn EventBus>,
    max_devices_per_user: usize,
    key_validity: ChronoDuration,
    hkdf_info: String,
    hkdf_output_length: usize,
    records: RwLock<HashMap<String, DeviceRecord>>,
    rotations: RwLock<Vec<RotationRecord>>,
}

impl DeviceKeyExchange {
    /// Construct the device exchange service over the given secret store and
    /// event bus, with config-driven limits.
    pub fn new(
        store: Arc<dyn SecretStore>,
        bus: Arc<dyn EventBus>,
        max_devices_per_user: usize,
        key_validity: ChronoDuration,
        hkdf_info: String,
        hkdf_output_length: usize,
    ) -> Self {
        Self {
            store,
            bus,
            max_devices_per_user,
            key_validity,
            hkdf_info,
            hkdf_output_length,
            records: RwLock::new(HashMap::new()),
            rotations: RwLock::new(Vec::new()),
        }
    }

    async fn active_device_count(&self, user_id: &str) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id && d.status == DeviceStatus::Active)
            .count()
    }

    async fn find_prior(&self, user_id: &str, device_id: &str) -> Option<DeviceRecord> {
        self.records
            .read()
            .await
            .values()
            .find(|d| d.user_id == user_id && d.device_id == device_id && d.status == DeviceStatus::Active)
            .cloned()
    }

    /// §4.7's 10-step algorithm.
    pub async fn exchange(&self, user_id: &str, req: ExchangeRequest) -> Result<ExchangeResponse> {
        validate_request(&req)?;
        let device_public_key = decode_device_public_key(&req.device_public_key)?;

        if self.active_device_count(user_id).await >= self.max_devices_per_user {
            metrics::record_device_exchange("denied");
            return Err(TrustError::DeviceLimitReached);
        }

        let server_secret = SecretKey::random(&mut rand::rngs::OsRng);
        let server_public = server_secret.public_key();
        let shared_secret = diffie_hellman(&server_secret.to_nonzero_scalar(), device_public_key.as_affine());

        let salt = random_salt();
        let key_handle = random_key_handle();

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret.raw_secret_bytes());
        let mut okm = vec![0u8; self.hkdf_output_length];
        hk.expand(self.hkdf_info.as_bytes(), &mut okm)
            .map_err(|e| TrustError::InvalidDeviceKey(format!("hkdf expand failed: {e}")))?;

        let vault_key = format!("device/{key_handle}");
        let mut vault_doc = std::collections::HashMap::new();
        vault_doc.insert(
            "private_key".to_string(),
            serde_json::json!(URL_SAFE_NO_PAD.encode(server_secret.to_bytes())),
        );
        self.store.write_kv(&vault_key, vault_doc).await?;

        let rotated = self.find_prior(user_id, &req.device_id).await.is_some();
        if let Err(e) = self
            .persist_device(user_id, &req, &key_handle, &server_public, &salt)
            .await
        {
            let _ = self.store.delete_kv(&vault_key).await;
            metrics::record_device_exchange("denied");
            return Err(e);
        }
        metrics::record_device_exchange(if rotated { "rotated" } else { "registered" });

        let now = Utc::now();
        Ok(ExchangeResponse {
            server_public_key: STANDARD.encode(server_public.to_sec1_bytes()),
            key_handle,
            salt: STANDARD.encode(salt),
            issued_at: now,
            expires_at: now + self.key_validity,
        })
    }

    async fn persist_device(
        &self,
        user_id: &str,
        req: &ExchangeRequest,
        key_handle: &str,
        server_public: &PublicKey,
        salt: &[u8; 32],
    ) -> Result<()> {
        let now = Utc::now();
        let prior = self.find_prior(user_id, &req.device_id).await;

        let record = DeviceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: req.device_id.clone(),
            user_id: user_id.to_string(),
            key_handle: key_handle.to_string(),
            device_public_key: req.device_public_key.clone(),
            server_public_key_ref: STANDARD.encode(server_public.to_sec1_bytes()),
            salt_hex: hex::encode(salt),
            status: DeviceStatus::Active,
            issued_at: now,
            expires_at: now + self.key_validity,
            platform: req.platform.clone(),
            app_version: req.app_version.clone(),
        };

        let mut guard = self.records.write().await;
        if let Some(mut old) = prior {
            old.status = DeviceStatus::Rotated;
            let old_handle = old.key_handle.clone();
            guard.insert(old.id.clone(), old);
            guard.insert(record.id.clone(), record);
            drop(guard);

            self.rotations.write().await.push(RotationRecord {
                device_id: req.device_id.clone(),
                old_key_handle: old_handle,
                new_key_handle: key_handle.to_string(),
                rotated_at: now,
            });
            let _ = self.bus.emit(topics::DEVICE_KEY_ROTATED, serde_json::json!({ "deviceId": req.device_id })).await;
        } else {
            guard.insert(record.id.clone(), record);
            drop(guard);
            let _ = self.bus.emit(topics::DEVICE_REGISTERED, serde_json::json!({ "deviceId": req.device_id })).await;
        }
        Ok(())
    }

    /// Force-rotate the active device record for `device_id`, independent of
    /// a fresh client-initiated exchange (used by admin tooling).
    pub async fn rotate_for_device(&self, user_id: &str, req: ExchangeRequest) -> Result<ExchangeResponse> {
        self.exchange(user_id, req).await
    }

    /// Scan for devices whose validity window has lapsed, transition them to
    /// `expired`, emit `device.expired`, and strip their vault entry.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(String, String)> = {
            let mut guard = self.records.write().await;
            let mut found = Vec::new();
            for record in guard.values_mut() {
                if record.status == DeviceStatus::Active && record.expires_at < now {
                    record.status = DeviceStatus::Expired;
                    found.push((record.device_id.clone(), record.key_handle.clone()));
                }
            }
            found
        };
        for (device_id, key_handle) in &expired {
            let _ = self.store.delete_kv(&format!("device/{key_handle}")).await;
            let _ = self.bus.emit(topics::DEVICE_EXPIRED, serde_json::json!({ "deviceId": device_id })).await;
        }
        expired.len()
    }

    /// All devices currently on record (test/inspection helper).
    pub async fn list_devices(&self) -> Vec<DeviceRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TracingEventBus;
    use crate::secret_store::InMemorySecretStore;

    fn sample_device_public_key() -> String {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        STANDARD.encode(secret.public_key().to_sec1_bytes())
    }

    fn exchange_service(max_devices: usize) -> DeviceKeyExchange {
        DeviceKeyExchange::new(
            Arc::new(InMemorySecretStore::new()),
            Arc::new(TracingEventBus::new()),
            max_devices,
            ChronoDuration::days(90),
            "trust-core/device-channel".to_string(),
            32,
        )
    }

    fn sample_request() -> ExchangeRequest {
        ExchangeRequest {
            device_public_key: sample_device_public_key(),
            device_id: "device-1".to_string(),
            app_version: "1.2.3".to_string(),
            platform: "ios".to_string(),
            device_name: None,
        }
    }

    #[tokio::test]
    async fn exchange_registers_new_device() {
        let svc = exchange_service(5);
        let resp = svc.exchange("user-1", sample_request()).await.unwrap();
        assert_eq!(resp.salt.len() > 0, true);
        assert_eq!(svc.list_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn second_exchange_for_same_device_rotates() {
        let svc = exchange_service(5);
        svc.exchange("user-1", sample_request()).await.unwrap();
        svc.exchange("user-1", sample_request()).await.unwrap();
        let devices = svc.list_devices().await;
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().any(|d| d.status == DeviceStatus::Rotated));
        assert!(devices.iter().any(|d| d.status == DeviceStatus::Active));
    }

    #[tokio::test]
    async fn rejects_malformed_public_key() {
        let svc = exchange_service(5);
        let mut req = sample_request();
        req.device_public_key = "short".to_string();
        assert!(svc.exchange("user-1", req).await.is_err());
    }

    #[tokio::test]
    async fn enforces_device_cap() {
        let svc = exchange_service(1);
        svc.exchange("user-1", ExchangeRequest { device_id: "a".to_string(), ..sample_request() })
            .await
            .unwrap();
        let result = svc
            .exchange("user-1", ExchangeRequest { device_id: "b".to_string(), ..sample_request() })
            .await;
        assert!(matches!(result, Err(TrustError::DeviceLimitReached)));
    }

    #[tokio::test]
    async fn rejects_bad_semver() {
        let svc = exchange_service(5);
        let mut req = sample_request();
        req.app_version = "not-semver".to_string();
        assert!(svc.exchange("user-1", req).await.is_err());
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_devices() {
        let svc = exchange_service(5);
        svc.exchange("user-1", sample_request()).await.unwrap();
        {
            let mut guard = svc.records.write().await;
            for record in guard.values_mut() {
                record.expires_at = Utc::now() - ChronoDuration::seconds(1);
            }
        }
        let count = svc.sweep_expired().await;
        assert_eq!(count, 1);
        let devices = svc.list_devices().await;
        assert_eq!(devices[0].status, DeviceStatus::Expired);
    }
}
