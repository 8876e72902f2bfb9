//! Encrypted settings envelope and secret-string handling.
//!
//! Settings files may arrive as ciphertext: a fixed marker, an RSA-OAEP-SHA256
//! wrapped AES key+IV, a `::` separator, and the AES-256-CBC payload, all
//! base64 encoded. Decryption is transparent at load time. Decrypted
//! connection strings are held in a wiped-on-drop container whose only exit
//! point is [`SecretString::expose`].

use std::env;
use std::fmt;
use std::path::Path;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ConfigError, ConfigResult};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Marker prefix identifying an encrypted settings body.
pub const ENCRYPTION_MARKER: &str = "PWENC:";

/// Environment variable carrying the RSA private key (inline PEM or a path).
pub const ENCRYPTION_KEY_VAR: &str = "PORTWAY_ENCRYPTION_KEY";

const AES_KEY_LEN: usize = 32;
const AES_IV_LEN: usize = 16;

/// Whether a settings body carries the encryption marker.
#[must_use]
pub fn is_encrypted(body: &str) -> bool {
    body.trim_start().starts_with(ENCRYPTION_MARKER)
}

/// Load the configured RSA private key, if any.
///
/// The variable may hold the PEM text itself or a filesystem path to it.
/// Both PKCS#8 and PKCS#1 encodings are accepted.
///
/// # Errors
///
/// Returns an error if the variable points at an unreadable file or the PEM
/// fails to parse.
pub fn load_private_key() -> ConfigResult<Option<RsaPrivateKey>> {
    let Ok(value) = env::var(ENCRYPTION_KEY_VAR) else {
        return Ok(None);
    };
    if value.trim().is_empty() {
        return Ok(None);
    }

    let pem = if value.trim_start().starts_with("-----BEGIN") {
        Zeroizing::new(value)
    } else {
        let raw =
            std::fs::read_to_string(Path::new(&value)).map_err(|source| ConfigError::Io {
                operation: "crypto.read_private_key",
                source,
            })?;
        Zeroizing::new(raw)
    };

    let key = RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_err| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|_err| ConfigError::SettingsDecryptionFailed {
            reason: "private key PEM is not valid PKCS#8 or PKCS#1",
        })?;
    Ok(Some(key))
}

/// Decrypt an encrypted settings body.
///
/// # Errors
///
/// Returns [`ConfigError::SettingsDecryptionFailed`] when the envelope is
/// malformed or the key does not match.
pub fn decrypt_settings(body: &str, key: &RsaPrivateKey) -> ConfigResult<String> {
    let stripped = body
        .trim()
        .strip_prefix(ENCRYPTION_MARKER)
        .ok_or(ConfigError::SettingsDecryptionFailed {
            reason: "missing encryption marker",
        })?;
    let (wrapped_b64, payload_b64) =
        stripped
            .split_once("::")
            .ok_or(ConfigError::SettingsDecryptionFailed {
                reason: "missing envelope separator",
            })?;

    let wrapped = BASE64
        .decode(wrapped_b64.trim())
        .map_err(|_err| ConfigError::SettingsDecryptionFailed {
            reason: "key envelope is not valid base64",
        })?;
    let payload = BASE64
        .decode(payload_b64.trim())
        .map_err(|_err| ConfigError::SettingsDecryptionFailed {
            reason: "payload is not valid base64",
        })?;

    let key_material = Zeroizing::new(key.decrypt(Oaep::new::<Sha256>(), &wrapped).map_err(
        |_err| ConfigError::SettingsDecryptionFailed {
            reason: "RSA unwrap failed",
        },
    )?);
    if key_material.len() != AES_KEY_LEN + AES_IV_LEN {
        return Err(ConfigError::SettingsDecryptionFailed {
            reason: "unwrapped key material has unexpected length",
        });
    }

    let (aes_key, iv) = key_material.split_at(AES_KEY_LEN);
    let cipher = Aes256CbcDec::new_from_slices(aes_key, iv).map_err(|_err| {
        ConfigError::SettingsDecryptionFailed {
            reason: "invalid AES key or IV length",
        }
    })?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&payload)
        .map_err(|_err| ConfigError::SettingsDecryptionFailed {
            reason: "AES decryption failed",
        })?;

    String::from_utf8(plain).map_err(|_err| ConfigError::SettingsDecryptionFailed {
        reason: "decrypted payload is not valid UTF-8",
    })
}

/// Encrypt a settings body into the marker envelope.
///
/// The inverse of [`decrypt_settings`]; used by operator tooling and tests.
///
/// # Errors
///
/// Returns an error when RSA wrapping fails.
pub fn encrypt_settings(body: &str, key: &RsaPublicKey) -> ConfigResult<String> {
    let mut rng = rand::thread_rng();
    let mut key_material = Zeroizing::new([0u8; AES_KEY_LEN + AES_IV_LEN]);
    rand::Rng::fill(&mut rng, key_material.as_mut_slice());

    let (aes_key, iv) = key_material.split_at(AES_KEY_LEN);
    let cipher = Aes256CbcEnc::new_from_slices(aes_key, iv).map_err(|_err| {
        ConfigError::SettingsDecryptionFailed {
            reason: "invalid AES key or IV length",
        }
    })?;
    let payload = cipher.encrypt_padded_vec_mut::<Pkcs7>(body.as_bytes());

    let wrapped = key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), key_material.as_slice())
        .map_err(|_err| ConfigError::SettingsDecryptionFailed {
            reason: "RSA wrap failed",
        })?;

    Ok(format!(
        "{ENCRYPTION_MARKER}{}::{}",
        BASE64.encode(wrapped),
        BASE64.encode(payload)
    ))
}

/// Connection-string keys whose values must never reach the logs.
const SENSITIVE_KEYS: &[&str] = &["password", "pwd", "user id", "uid", "secret", "token"];

const MASK: &str = "***MASKED***";

/// Wiped-on-drop container for secret material such as connection strings.
///
/// `Debug` and `Display` render the mask; [`SecretString::expose`] is the only
/// exit point for the raw value.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Access the raw secret. Callers pass the value straight to backend
    /// drivers and must not persist or log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the wrapped value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked projection of a `Key=Value;…` connection string: keys stay
    /// visible, secret values are replaced with the mask.
    #[must_use]
    pub fn masked(&self) -> String {
        self.0
            .split(';')
            .filter(|segment| !segment.trim().is_empty())
            .map(|segment| {
                segment.split_once('=').map_or_else(
                    || segment.trim().to_string(),
                    |(key, value)| {
                        let lowered = key.trim().to_ascii_lowercase();
                        if SENSITIVE_KEYS.iter().any(|secret| lowered == *secret) {
                            format!("{}={MASK}", key.trim())
                        } else {
                            format!("{}={}", key.trim(), value.trim())
                        }
                    },
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for SecretString {}

impl fmt::Debug for SecretString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(MASK)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(MASK)
    }
}

impl<'de> serde::Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key")
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let private = test_key();
        let public = RsaPublicKey::from(&private);
        let body = r#"{"ConnectionString":"Server=db;Password=hunter2"}"#;

        let envelope = encrypt_settings(body, &public).expect("encrypt");
        assert!(is_encrypted(&envelope));
        let decrypted = decrypt_settings(&envelope, &private).expect("decrypt");
        assert_eq!(decrypted, body);
    }

    #[test]
    fn decrypt_rejects_malformed_envelope() {
        let private = test_key();
        let err = decrypt_settings("PWENC:not-base64", &private).expect_err("must fail");
        assert!(matches!(err, ConfigError::SettingsDecryptionFailed { .. }));
    }

    #[test]
    fn plain_body_is_not_encrypted() {
        assert!(!is_encrypted(r#"{"ConnectionString":"Server=db"}"#));
        assert!(is_encrypted("  PWENC:abc::def"));
    }

    #[test]
    fn masked_projection_hides_secret_values() {
        let secret = SecretString::new(
            "Server=sql01;Database=orders;User Id=svc;Password=hunter2;Encrypt=true".to_string(),
        );
        let masked = secret.masked();
        assert!(masked.contains("Server=sql01"));
        assert!(masked.contains("User Id=***MASKED***"));
        assert!(masked.contains("Password=***MASKED***"));
        assert!(!masked.contains("hunter2"));
        assert!(!masked.contains("svc"));
    }

    #[test]
    fn display_and_debug_never_leak() {
        let secret = SecretString::new("Password=topsecret".to_string());
        assert_eq!(format!("{secret}"), "***MASKED***");
        assert_eq!(format!("{secret:?}"), "***MASKED***");
    }
}
