//! Key Ring (C1)
//!
//! Owns the RSA signing keys behind every issued JWT and their public JWKS
//! view. Metadata (`kid -> {alg, publicKeyPem, createdAt, expiresAt,
//! isActive}`) is cached in memory for O(1) lookup; private material is
//! fetched from the secret store on demand per sign, never cached.

mod rotation;

pub use rotation::RotationHandle;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};
use crate::secret_store::SecretStore;

const DEFAULT_KID: &str = "jwks-default";
const METADATA_PATH: &str = "jwks";
const RSA_KEY_BITS: usize = 2048;

/// Public signing key metadata, per §3's `SigningKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub kid: String,
    pub alg: String,
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl SigningKey {
    /// This key's JWKS view, per §6 (`kid, alg, use, kty, n, e, createdAt, expiresAt`).
    ///
    /// # Errors
    /// Returns an error if the stored PEM fails to parse as an RSA public key.
    pub fn to_jwk(&self) -> Result<serde_json::Value> {
        let (n, e) = self.rsa_components_base64url()?;
        Ok(serde_json::json!({
            "kid": self.kid,
            "alg": self.alg,
            "use": "sig",
            "kty": "RSA",
            "n": n,
            "e": e,
            "createdAt": self.created_at,
            "expiresAt": self.expires_at,
        }))
    }

    /// This key's modulus and public exponent, base64url (no padding)
    /// encoded, for use as `jsonwebtoken::DecodingKey::from_rsa_components`.
    ///
    /// # Errors
    /// Returns an error if the stored PEM fails to parse as an RSA public key.
    pub fn rsa_components_base64url(&self) -> Result<(String, String)> {
        let public_key = RsaPublicKey::from_public_key_pem(&self.public_key_pem)
            .map_err(|e| TrustError::JwtDecodeFailed(format!("bad stored public key: {e}")))?;
        use rsa::traits::PublicKeyParts;
        let n = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            public_key.n().to_bytes_be(),
        );
        let e = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            public_key.e().to_bytes_be(),
        );
        Ok((n, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    alg: String,
    public_key_pem: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
}

/// Process-wide owner of RSA signing keys (C1). A process has exactly one
/// `KeyRing`; it is the global singleton §9 describes.
pub struct KeyRing {
    store: Arc<dyn SecretStore>,
    bus: Arc<dyn EventBus>,
    rotation_interval: ChronoDuration,
    key_validity: ChronoDuration,
    metadata: RwLock<HashMap<String, SigningKey>>,
}

impl KeyRing {
    /// Load (or bootstrap) the key ring from the secret store. Fails closed:
    /// any read/write error here is fatal at startup, per §4.1.
    pub async fn init(
        store: Arc<dyn SecretStore>,
        bus: Arc<dyn EventBus>,
        rotation_interval: std::time::Duration,
        key_validity: std::time::Duration,
    ) -> Result<Arc<Self>> {
        let rotation_interval = ChronoDuration::from_std(rotation_interval)
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        let key_validity =
            ChronoDuration::from_std(key_validity).unwrap_or_else(|_| ChronoDuration::days(90));

        let ring = Arc::new(Self {
            store,
            bus,
            rotation_interval,
            key_validity,
            metadata: RwLock::new(HashMap::new()),
        });

        ring.load_or_bootstrap().await?;
        Ok(ring)
    }

    async fn load_or_bootstrap(&self) -> Result<()> {
        let raw = self
            .store
            .read_kv(METADATA_PATH)
            .await
            .map_err(|e| TrustError::SecretStore(e.to_string()))?;

        let mut loaded: HashMap<String, SigningKey> = HashMap::new();
        if let Some(doc) = raw {
            for (kid, value) in doc {
                let stored: StoredMetadata = serde_json::from_value(value)
                    .map_err(|e| TrustError::SecretStore(format!("corrupt jwks entry: {e}")))?;
                loaded.insert(
                    kid.clone(),
                    SigningKey {
                        kid,
                        alg: stored.alg,
                        public_key_pem: stored.public_key_pem,
                        created_at: stored.created_at,
                        expires_at: stored.expires_at,
                        is_active: stored.is_active,
                    },
                );
            }
        }

        if loaded.is_empty() {
            info!(kid = DEFAULT_KID, "bootstrapping default signing key");
            self.generate_and_store(DEFAULT_KID.to_string(), &mut loaded)
                .await?;
        } else if !loaded.values().any(|k| k.is_active) {
            let first_kid = loaded.keys().next().cloned();
            if let Some(kid) = first_kid {
                warn!(kid, "no active key on load, activating first available");
                if let Some(key) = loaded.get_mut(&kid) {
                    key.is_active = true;
                }
            }
        }

        self.persist_metadata(&loaded).await?;
        *self.metadata.write().await = loaded;
        Ok(())
    }

    async fn generate_and_store(
        &self,
        kid: String,
        loaded: &mut HashMap<String, SigningKey>,
    ) -> Result<()> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| TrustError::JwtSignFailed(format!("rsa keygen failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| TrustError::JwtSignFailed(format!("pkcs1 encode failed: {e}")))?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| TrustError::JwtSignFailed(format!("spki encode failed: {e}")))?;

        let now = Utc::now();
        let expires_at = now + self.key_validity;

        let mut private_doc = crate::secret_store::KvMap::new();
        private_doc.insert("pem".to_string(), serde_json::json!(private_pem));
        self.store
            .write_kv(&format!("jwks-private/{kid}"), private_doc)
            .await
            .map_err(|e| TrustError::SecretStore(e.to_string()))?;

        for key in loaded.values_mut() {
            key.is_active = false;
        }
        loaded.insert(
            kid.clone(),
            SigningKey {
                kid,
                alg: "RS256".to_string(),
                public_key_pem: public_pem,
                created_at: now,
                expires_at,
                is_active: true,
            },
        );
        Ok(())
    }

    async fn persist_metadata(&self, metadata: &HashMap<String, SigningKey>) -> Result<()> {
        let mut doc = crate::secret_store::KvMap::new();
        for (kid, key) in metadata {
            let stored = StoredMetadata {
                alg: key.alg.clone(),
                public_key_pem: key.public_key_pem.clone(),
                created_at: key.created_at,
                expires_at: key.expires_at,
                is_active: key.is_active,
            };
            doc.insert(
                kid.clone(),
                serde_json::to_value(stored)
                    .map_err(|e| TrustError::SecretStore(e.to_string()))?,
            );
        }
        self.store
            .write_kv(METADATA_PATH, doc)
            .await
            .map_err(|e| TrustError::SecretStore(e.to_string()))
    }

    /// The currently active key, rotating synchronously first if it has
    /// expired (§4.1: "If `getActiveKey` is requested and the active key's
    /// `expiresAt < now`, rotate synchronously before returning").
    pub async fn get_active_key(&self) -> Result<Option<SigningKey>> {
        let needs_rotation = {
            let guard = self.metadata.read().await;
            guard
                .values()
                .find(|k| k.is_active)
                .map(|k| k.expires_at < Utc::now())
                .unwrap_or(false)
        };
        if needs_rotation {
            self.rotate().await?;
        }
        let guard = self.metadata.read().await;
        Ok(guard.values().find(|k| k.is_active).cloned())
    }

    /// Look up a key (active or retained-for-verification) by `kid`.
    pub async fn get_key(&self, kid: &str) -> Option<SigningKey> {
        self.metadata.read().await.get(kid).cloned()
    }

    /// All known keys, active and retired.
    pub async fn list_keys(&self) -> Vec<SigningKey> {
        self.metadata.read().await.values().cloned().collect()
    }

    /// Generate a fresh 2048-bit RSA pair, activate it, retire the previous
    /// active key, persist metadata, and emit `jwks.key_rotated`.
    pub async fn rotate(&self) -> Result<SigningKey> {
        let new_kid = uuid::Uuid::new_v4().to_string();
        let mut guard = self.metadata.write().await;
        self.generate_and_store(new_kid.clone(), &mut guard).await?;
        self.persist_metadata(&guard).await?;
        let new_key = guard.get(&new_kid).cloned().expect("just inserted");
        drop(guard);

        let _ = self
            .bus
            .emit(
                topics::JWKS_KEY_ROTATED,
                serde_json::json!({ "kid": new_kid }),
            )
            .await;
        info!(kid = new_kid, "signing key rotated");
        Ok(new_key)
    }

    /// Mark `kid` inactive (and, if it is the active key, trigger a
    /// rotation). Emits `jwks.key_invalidated`.
    pub async fn invalidate(&self, kid: &str) -> Result<()> {
        let was_active = {
            let mut guard = self.metadata.write().await;
            match guard.get_mut(kid) {
                Some(key) => {
                    let was_active = key.is_active;
                    key.is_active = false;
                    self.persist_metadata(&guard).await?;
                    was_active
                }
                None => return Err(TrustError::NoActiveKey),
            }
        };

        let _ = self
            .bus
            .emit(
                topics::JWKS_KEY_INVALIDATED,
                serde_json::json!({ "kid": kid }),
            )
            .await;

        if was_active {
            self.rotate().await?;
        }
        Ok(())
    }

    /// The active key's private PEM bytes, fetched fresh on every call.
    /// Returns [`TrustError::NoActiveKey`] if the active `kid`'s private
    /// material is missing from the secret store.
    pub async fn get_active_private_key(&self) -> Result<String> {
        let active = self
            .get_active_key()
            .await?
            .ok_or(TrustError::NoActiveKey)?;
        let doc = self
            .store
            .read_kv(&format!("jwks-private/{}", active.kid))
            .await
            .map_err(|e| TrustError::SecretStore(e.to_string()))?
            .ok_or(TrustError::NoActiveKey)?;
        let pem = doc
            .get("pem")
            .and_then(|v| v.as_str())
            .ok_or(TrustError::NoActiveKey)?;
        debug!(kid = active.kid, "fetched active private key");
        Ok(pem.to_string())
    }

    /// The current JWKS document: every key's public view, per §6.
    pub async fn jwks_document(&self) -> Result<Vec<serde_json::Value>> {
        let guard = self.metadata.read().await;
        guard.values().map(SigningKey::to_jwk).collect()
    }

    pub(crate) fn rotation_interval(&self) -> ChronoDuration {
        self.rotation_interval
    }
}
