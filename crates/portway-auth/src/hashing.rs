//! PBKDF2 token hashing and constant-time verification.
//!
//! Tokens hash with PBKDF2-HMAC-SHA256, 10 000 iterations, 32-byte output,
//! 16-byte salt, matching the material written by the token administration
//! tool. Comparison is constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// PBKDF2 iteration count.
pub const ITERATIONS: u32 = 10_000;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derive the stored hash for a token and salt.
#[must_use]
pub fn derive(token: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut output = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(token.as_bytes(), salt, ITERATIONS, &mut output);
    output
}

/// Constant-time comparison of a presented token against stored material.
#[must_use]
pub fn verify(token: &str, salt: &[u8], expected: &[u8]) -> bool {
    if expected.len() != KEY_LEN {
        return false;
    }
    let derived = derive(token, salt);
    derived.ct_eq(expected).into()
}

/// Fresh random salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encode hash or salt bytes for storage.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode stored hash or salt bytes.
#[must_use]
pub fn decode(text: &str) -> Option<Vec<u8>> {
    BASE64.decode(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_per_salt() {
        let salt = generate_salt();
        assert_eq!(derive("secret", &salt), derive("secret", &salt));
        assert_ne!(derive("secret", &salt), derive("other", &salt));
    }

    #[test]
    fn different_salts_produce_different_hashes() {
        let first = generate_salt();
        let second = generate_salt();
        assert_ne!(derive("secret", &first), derive("secret", &second));
    }

    #[test]
    fn verify_accepts_matching_material_only() {
        let salt = generate_salt();
        let hash = derive("secret", &salt);
        assert!(verify("secret", &salt, &hash));
        assert!(!verify("Secret", &salt, &hash));
        assert!(!verify("secret", &salt, &hash[..16]));
    }

    #[test]
    fn storage_encoding_round_trips() {
        let salt = generate_salt();
        let decoded = decode(&encode(&salt)).expect("decode");
        assert_eq!(decoded, salt);
    }
}
