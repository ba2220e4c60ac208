//! Constant-time `x-api-key` comparison for the API-key guard (spec.md §6).
//!
//! Service-to-service callers may authenticate with a static `x-api-key`
//! header instead of a bearer JWT. [`validate_api_key`] hashes both sides
//! with BLAKE3 before comparing so that comparison time never depends on
//! the key's length, and compares the hashes with `subtle::ConstantTimeEq`
//! so it never depends on *where* the two keys first diverge either —
//! without both, an attacker measuring response latency could recover a
//! valid key one character at a time.
//!
//! There is exactly one expected key per deployment
//! ([`crate::config::TrustConfig::api_key`]), so this module only exposes
//! a single-key comparison, not a lookup over a set of keys.

use subtle::ConstantTimeEq;

#[inline]
fn hash_api_key(key: &str) -> [u8; 32] {
    blake3::hash(key.as_bytes()).into()
}

/// Keys shorter than this are rejected outright (non-constant-time, but the
/// only information leaked is "too short", which tells an attacker nothing
/// about the expected key's content).
pub const MIN_API_KEY_LENGTH: usize = 32;

/// Compare `provided` against the configured `expected` key in constant
/// time. Both must meet [`MIN_API_KEY_LENGTH`].
///
/// ```rust
/// use trust_core::api_key_validation::validate_api_key;
///
/// let expected = "test_key_correct_abcdefghij123456";
/// assert!(validate_api_key(expected, expected));
/// assert!(!validate_api_key("test_key_wrongxx_abcdefghij123456", expected));
/// ```
#[must_use]
#[inline]
pub fn validate_api_key(provided: &str, expected: &str) -> bool {
    if provided.len() < MIN_API_KEY_LENGTH || expected.len() < MIN_API_KEY_LENGTH {
        tracing::warn!(
            provided_len = provided.len(),
            min = MIN_API_KEY_LENGTH,
            "x-api-key rejected: below minimum length"
        );
        return false;
    }

    let provided_hash = hash_api_key(provided);
    let expected_hash = hash_api_key(expected);
    provided_hash.ct_eq(&expected_hash).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const TEST_KEY_1: &str = "test_key_1234567890abcdef1234567890abc";
    const TEST_KEY_2: &str = "test_key_0000000000000000111111111111a";

    #[test]
    fn matching_keys_validate() {
        assert!(validate_api_key(TEST_KEY_1, TEST_KEY_1));
    }

    #[test]
    fn mismatched_keys_are_rejected() {
        assert!(!validate_api_key(TEST_KEY_2, TEST_KEY_1));
    }

    #[test]
    fn a_single_trailing_character_difference_is_rejected() {
        let wrong_suffix = "test_key_1234567890abcdef1234567890abx";
        assert!(!validate_api_key(wrong_suffix, TEST_KEY_1));
    }

    #[test]
    fn empty_and_short_keys_are_rejected() {
        assert!(!validate_api_key("", ""));
        assert!(!validate_api_key("key", ""));
        assert!(!validate_api_key("", "key"));
        assert!(!validate_api_key("too_short", TEST_KEY_1));
        assert!(!validate_api_key(TEST_KEY_1, "too_short"));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        let lower = "test_key_abcdefghijklmnopqrstuvwxyz1234";
        let upper = "TEST_KEY_ABCDEFGHIJKLMNOPQRSTUVWXYZ1234";
        assert!(!validate_api_key(lower, upper));
    }

    #[test]
    fn hashing_is_deterministic_and_collision_resistant() {
        let key1 = "test_key_1234567890abcdef";
        let key2 = "test_key_1234567890abcdeg";
        assert_eq!(hash_api_key(key1), hash_api_key(key1));
        assert_ne!(hash_api_key(key1), hash_api_key(key2));
    }

    #[test]
    fn unicode_and_special_character_keys_validate() {
        let key = "test_key_!@#$%^&*()_+-={}[]|:;<>?,./你好世界🔒ab";
        assert!(validate_api_key(key, key));
    }

    /// A prefix mismatch and a suffix mismatch must take statistically
    /// indistinguishable time, since both are hashed to a fixed-width
    /// digest before comparison. May be flaky under heavy system load.
    #[test]
    fn timing_is_independent_of_where_keys_diverge() {
        let correct_key = TEST_KEY_1;
        let wrong_prefix = "xk_live_1234567890abcdef1234567890abc";
        let wrong_suffix = "test_key_1234567890abcdef1234567890abx";

        for _ in 0..1000 {
            let _ = validate_api_key(wrong_prefix, correct_key);
            let _ = validate_api_key(wrong_suffix, correct_key);
        }

        let start = Instant::now();
        for _ in 0..10000 {
            let _ = validate_api_key(wrong_prefix, correct_key);
        }
        let prefix_time = start.elapsed();

        let start = Instant::now();
        for _ in 0..10000 {
            let _ = validate_api_key(wrong_suffix, correct_key);
        }
        let suffix_time = start.elapsed();

        let diff_ns = (prefix_time.as_nanos() as i128 - suffix_time.as_nanos() as i128).abs();
        let avg_diff_ns = diff_ns / 10000;

        assert!(
            avg_diff_ns < 500,
            "timing difference too large: {avg_diff_ns}ns (threshold: 500ns)"
        );
    }
}
