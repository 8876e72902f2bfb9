//! Response cache policy: keys, durations, entry encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cached upstream response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// Response body, base64 inside the stored JSON.
    #[serde(with = "base64_bytes")]
    pub content: Bytes,
    /// Response headers worth replaying.
    pub headers: BTreeMap<String, String>,
    /// Upstream status code.
    pub status_code: u16,
    /// Capture instant.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Encode for storage.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; entries always encode in practice.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decode a stored entry, `None` for corrupt payloads.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }
}

mod base64_bytes {
    use super::{BASE64, Bytes, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Prefix owning every cached GET of one endpoint in one environment.
#[must_use]
pub fn endpoint_prefix(environment: &str, endpoint: &str) -> String {
    format!(
        "proxy:{}:{}:",
        environment.to_ascii_lowercase(),
        endpoint.to_ascii_lowercase()
    )
}

/// Deterministic cache key for one request variant.
///
/// The key hashes method, full URL, environment, endpoint, the caller's
/// `Accept-Language`, and a hash of the authorization context so different
/// principals never share entries.
#[must_use]
pub fn cache_key(
    method: &str,
    url: &str,
    environment: &str,
    endpoint: &str,
    accept_language: &str,
    auth_context_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(environment.to_ascii_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(endpoint.to_ascii_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(accept_language.as_bytes());
    hasher.update(b"\n");
    hasher.update(auth_context_hash.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{}{}",
        endpoint_prefix(environment, endpoint),
        hex(&digest)
    )
}

/// Effective cache duration: the minimum of the upstream `max-age`, the
/// per-endpoint override, and the gateway default.
#[must_use]
pub fn cache_duration(
    cache_control: Option<&str>,
    endpoint_override_seconds: Option<u64>,
    default_seconds: u64,
) -> Duration {
    let mut seconds = default_seconds;
    if let Some(max_age) = cache_control.and_then(parse_max_age) {
        seconds = seconds.min(max_age);
    }
    if let Some(override_seconds) = endpoint_override_seconds {
        seconds = seconds.min(override_seconds);
    }
    Duration::from_secs(seconds)
}

/// Whether a response content type participates in caching.
#[must_use]
pub fn is_cacheable_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("json") || lowered.contains("xml") || lowered.starts_with("text/")
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|value| value.trim().parse().ok())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_and_variant_sensitive() {
        let base = cache_key("GET", "http://u/a", "prod", "Accounts", "en", "h1");
        assert_eq!(
            base,
            cache_key("get", "http://u/a", "PROD", "accounts", "en", "h1")
        );
        assert_ne!(
            base,
            cache_key("GET", "http://u/a", "prod", "Accounts", "nl", "h1")
        );
        assert_ne!(
            base,
            cache_key("GET", "http://u/a", "prod", "Accounts", "en", "h2")
        );
        assert!(base.starts_with("proxy:prod:accounts:"));
    }

    #[test]
    fn duration_takes_the_minimum_of_all_sources() {
        assert_eq!(
            cache_duration(Some("public, max-age=60"), None, 300),
            Duration::from_secs(60)
        );
        assert_eq!(
            cache_duration(Some("max-age=600"), Some(120), 300),
            Duration::from_secs(120)
        );
        assert_eq!(cache_duration(None, None, 300), Duration::from_secs(300));
    }

    #[test]
    fn entry_encoding_round_trips_byte_identically() {
        let entry = CacheEntry {
            content: Bytes::from_static(b"{\"d\":1}"),
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            status_code: 200,
            created_at: Utc::now(),
        };
        let encoded = entry.to_bytes().expect("encode");
        let decoded = CacheEntry::from_bytes(&encoded).expect("decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn content_type_gate_matches_text_like_payloads() {
        assert!(is_cacheable_content_type("application/json"));
        assert!(is_cacheable_content_type("text/html; charset=utf-8"));
        assert!(!is_cacheable_content_type("application/octet-stream"));
    }
}
