//! Token and one-time-code material.
//!
//! Secrets are 256-bit random values, base64url encoded; only their SHA-256
//! hex digest is ever persisted. Comparison happens digest-to-digest, so no
//! secret round-trips through the event log.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a 256-bit random secret, base64url (43 characters).
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a secret.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Whether `secret` hashes to `hash`.
#[must_use]
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    hash_secret(secret) == hash
}

/// Generate a numeric one-time code of `digits` digits.
#[must_use]
pub fn generate_otp_code(digits: u32) -> String {
    let mut rng = rand::thread_rng();
    let modulus = 10u64.pow(digits);
    let code = rng.next_u64() % modulus;
    format!("{code:0width$}", width = digits as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_unique_and_url_safe() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn hash_verifies_only_the_original() {
        let secret = generate_secret();
        let hash = hash_secret(&secret);
        assert!(verify_secret(&secret, &hash));
        assert!(!verify_secret("forged", &hash));
    }

    #[test]
    fn otp_codes_are_zero_padded() {
        for _ in 0..50 {
            let code = generate_otp_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
