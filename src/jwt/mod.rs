//! Token Engine (C3)
//!
//! Signs and verifies RS256 JWTs against the locally owned [`crate::keyring::KeyRing`],
//! enforcing issuer/audience/exp/nbf/kid/jti rules and integrating the
//! anti-replay set (C2). Grounded on the teacher's `jwt/validator.rs`
//! algorithm-allowlist and claim-validation pattern, rebuilt around a
//! keyring the process owns instead of a remote JWKS fetch.

mod claims;
mod engine;

pub use claims::JwtClaims;
pub use engine::{DecodedToken, SignRequest, SignedToken, TokenEngine};
