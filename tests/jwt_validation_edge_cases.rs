//! JWT validation edge cases: header tampering, signature tampering, and the
//! decode/verify contract split (§4.3).

mod common;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use trust_core::jwt::SignRequest;

async fn sign_token(core: &trust_core::TrustCore) -> String {
    core.jwt
        .sign(SignRequest {
            sub: "u1".to_string(),
            aud: core.config.jwt_audience.clone(),
            scope: String::new(),
            refresh: false,
        })
        .await
        .unwrap()
        .token
}

#[tokio::test]
async fn verify_rejects_a_token_signed_for_a_different_audience() {
    let core = common::make_core().await;
    let signed = core
        .jwt
        .sign(SignRequest {
            sub: "u1".to_string(),
            aud: "some-other-service".to_string(),
            scope: String::new(),
            refresh: false,
        })
        .await
        .unwrap();

    assert!(core.jwt.verify(&signed.token).await.is_err());
}

#[tokio::test]
async fn verify_rejects_unknown_kid() {
    let core = common::make_core().await;
    let token = sign_token(&core).await;

    let mut parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3);

    let header_json = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
    let mut header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();
    header["kid"] = serde_json::Value::String("not-a-real-kid".to_string());
    let tampered_header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());

    parts[0] = &tampered_header;
    let tampered = parts.join(".");

    assert!(core.jwt.verify(&tampered).await.is_err());
}

#[tokio::test]
async fn verify_rejects_tampered_signature() {
    let core = common::make_core().await;
    let mut token = sign_token(&core).await;
    token.push('x');

    assert!(core.jwt.verify(&token).await.is_err());
}

#[tokio::test]
async fn decode_never_checks_signature_or_expiry() {
    let core = common::make_core().await;
    let mut token = sign_token(&core).await;
    token.push('x');

    // decode() is the insecure, unverified variant per §4.3 — it only
    // reads header/payload and never checks the signature.
    let decoded = core.jwt.decode(&token).unwrap();
    assert_eq!(decoded.payload.sub, "u1");
}

#[tokio::test]
async fn malformed_token_fails_decode() {
    let core = common::make_core().await;
    assert!(core.jwt.decode("not-a-jwt").is_err());
}
