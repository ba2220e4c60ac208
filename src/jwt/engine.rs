//! Sign/verify/decode implementation for the Token Engine (C3)

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};
use crate::keyring::KeyRing;
use crate::metrics;
use crate::replay::AntiReplaySet;

use super::claims::JwtClaims;

/// Caller-supplied intent for a new token, before `jti`/`iat`/`exp` are stamped.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub sub: String,
    pub aud: String,
    pub scope: String,
    pub refresh: bool,
}

/// A freshly signed token plus the metadata needed to hand back to a caller.
#[derive(Debug, Clone, Serialize)]
pub struct SignedToken {
    pub token: String,
    pub kid: String,
    pub expires_at: i64,
}

/// Decoded token parts, for callers that need the raw header (§4.3 `decode`).
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub header: Header,
    pub payload: JwtClaims,
    pub kid: String,
}

/// RS256 sign/verify engine integrating the key ring (C1) and the
/// anti-replay set (C2).
pub struct TokenEngine {
    keyring: Arc<KeyRing>,
    replay: Arc<AntiReplaySet>,
    bus: Arc<dyn EventBus>,
    issuer: String,
    audience: String,
    clock_skew_sec: i64,
    token_lifetime_sec: i64,
}

impl TokenEngine {
    /// Construct a new engine bound to the given key ring, replay set, and
    /// event bus, configured per §6's JWT environment variables. `audience`
    /// is the single expected `aud` (`JWT_AUDIENCE`); every verify checks
    /// the presented token against this fixed value, not against whatever
    /// the token itself claims.
    pub fn new(
        keyring: Arc<KeyRing>,
        replay: Arc<AntiReplaySet>,
        bus: Arc<dyn EventBus>,
        issuer: String,
        audience: String,
        clock_skew_sec: i64,
        token_lifetime_sec: i64,
    ) -> Self {
        Self {
            keyring,
            replay,
            bus,
            issuer,
            audience,
            clock_skew_sec,
            token_lifetime_sec,
        }
    }

    /// Sign algorithm per §4.3: obtain active key, build claims, sign RS256.
    /// The `jti` is not registered here — only `verify()` registers a `jti`,
    /// on its own first successful verification, so a freshly signed token
    /// is not mistaken for a replay before it has ever been presented.
    pub async fn sign(&self, req: SignRequest) -> Result<SignedToken> {
        let active = match self.keyring.get_active_key().await?.ok_or(TrustError::NoActiveKey) {
            Ok(key) => key,
            Err(e) => {
                metrics::record_jwt_sign(false);
                return Err(e);
            }
        };
        let private_pem = self.keyring.get_active_private_key().await?;

        let now = Utc::now().timestamp();
        let exp = now + self.token_lifetime_sec;
        let jti = uuid::Uuid::new_v4().to_string();

        let claims = JwtClaims {
            sub: req.sub.clone(),
            iss: self.issuer.clone(),
            aud: req.aud,
            scope: req.scope,
            jti: jti.clone(),
            iat: now,
            exp,
            token_type: req.refresh.then(|| "refresh".to_string()),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(active.kid.clone());

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| TrustError::JwtSignFailed(format!("bad private key: {e}")))?;

        let token = encode(&header, &claims, &encoding_key)
            .map_err(|e| TrustError::JwtSignFailed(e.to_string()))?;

        let _ = self
            .bus
            .emit(
                topics::JWT_GENERATED,
                serde_json::json!({ "sub": req.sub, "kid": active.kid, "jti": jti }),
            )
            .await;
        info!(kid = active.kid, sub = %claims.sub, "token signed");
        metrics::record_jwt_sign(true);

        Ok(SignedToken {
            token,
            kid: active.kid,
            expires_at: exp,
        })
    }

    /// Verify algorithm per §4.3: decode header, fetch public key, validate
    /// signature and canonical claims, enforce anti-replay unless refresh.
    pub async fn verify(&self, token: &str) -> Result<JwtClaims> {
        let started = std::time::Instant::now();
        let result = self.verify_inner(token).await;
        metrics::record_jwt_verify_duration(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::record_jwt_verify("ok"),
            Err(TrustError::JwtInvalid(msg)) if msg.contains("replay") => {
                metrics::record_jwt_verify("replay");
            }
            Err(_) => metrics::record_jwt_verify("invalid"),
        }
        result
    }

    async fn verify_inner(&self, token: &str) -> Result<JwtClaims> {
        let decoded = self.decode_unverified(token)?;

        let key = self
            .keyring
            .get_key(&decoded.kid)
            .await
            .ok_or_else(|| self.invalid(&decoded.kid, "unknown kid"))?;

        let (n, e) = key
            .rsa_components_base64url()
            .map_err(|_| self.invalid(&decoded.kid, "unparseable stored key"))?;
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|_| self.invalid(&decoded.kid, "bad rsa components"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = self.clock_skew_sec.max(0) as u64;

        let token_data = decode::<JwtClaims>(token, &decoding_key, &validation)
            .map_err(|e| self.invalid(&decoded.kid, &e.to_string()))?;
        let claims = token_data.claims;

        if claims.jti.is_empty() {
            return Err(self.invalid(&decoded.kid, "missing jti"));
        }

        if !claims.is_refresh() {
            let now_ms = Utc::now().timestamp_millis();
            if self.replay.is_consumed(&claims.jti, now_ms).await {
                let _ = self
                    .bus
                    .emit(
                        topics::REPLAY_DETECTED,
                        serde_json::json!({ "jti": claims.jti }),
                    )
                    .await;
                warn!(jti = claims.jti, "replay detected");
                return Err(TrustError::JwtInvalid(format!(
                    "replay detected for jti {}",
                    claims.jti
                )));
            }
            let registered = self
                .replay
                .register(&claims.jti, claims.exp * 1000, now_ms)
                .await;
            if !registered {
                return Err(TrustError::JtiRegistrationFailed(claims.jti));
            }
        }

        let _ = self
            .bus
            .emit(
                topics::JWT_VALIDATED,
                serde_json::json!({ "sub": claims.sub, "jti": claims.jti }),
            )
            .await;

        Ok(claims)
    }

    /// Decode without verifying signature/claims — header and payload only,
    /// per §4.3's `decode` contract.
    pub fn decode(&self, token: &str) -> Result<DecodedToken> {
        self.decode_unverified(token)
    }

    /// The key ring's currently active `kid`, if any.
    pub async fn get_active_kid(&self) -> Option<String> {
        self.keyring
            .get_active_key()
            .await
            .ok()
            .flatten()
            .map(|k| k.kid)
    }

    fn decode_unverified(&self, token: &str) -> Result<DecodedToken> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TrustError::JwtDecodeFailed(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| TrustError::JwtDecodeFailed("missing kid".to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(TrustError::JwtDecodeFailed(
                "unsupported algorithm".to_string(),
            ));
        }
        let mut insecure = Validation::new(Algorithm::RS256);
        insecure.insecure_disable_signature_validation();
        insecure.validate_exp = false;
        insecure.validate_aud = false;
        // A zero-length key satisfies jsonwebtoken's API without ever being
        // used to check a signature (validation is disabled above).
        let placeholder = DecodingKey::from_secret(&[]);
        let token_data = decode::<JwtClaims>(token, &placeholder, &insecure)
            .map_err(|e| TrustError::JwtDecodeFailed(e.to_string()))?;
        Ok(DecodedToken {
            header: header.clone(),
            payload: token_data.claims,
            kid,
        })
    }

    fn invalid(&self, kid: &str, detail: &str) -> TrustError {
        TrustError::JwtInvalid(format!("kid={kid}: {detail}"))
    }
}
