//! Password hashing (§4.10 `hashPassword`/`verifyPassword`)
//!
//! Grounded on `other_examples/.../whispem-minikv/src/common/auth.rs`'s use
//! of `argon2::Argon2` with `PasswordHash`/`SaltString` for API-key hashing;
//! adapted here for user login passwords.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::{Result, TrustError};

/// Hash a plaintext password with argon2id and a fresh random salt.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TrustError::Validation(format!("password hash failed: {e}")))
}

/// Verify a plaintext password against a previously stored argon2 hash.
#[must_use]
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        assert!(!verify_password("anything", "not-a-phc-hash"));
    }
}
