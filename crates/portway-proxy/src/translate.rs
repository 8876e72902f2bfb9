//! Verb aliasing and companion headers.
//!
//! Some upstreams require translated verbs (`PUT` → `MERGE`) and extra
//! headers carrying the original intent. Endpoints declare
//! `HttpMethodTranslation: "FROM:TO,FROM2:TO2"` (colon preferred, semicolon
//! legacy) and `HttpMethodAppendHeaders: "FROM:Name={ORIGINAL_METHOD},…"`.
//! Translation is idempotent by construction: a translated verb always maps
//! to itself.

use std::collections::BTreeMap;

use crate::error::{ProxyError, ProxyResult};

/// Verbs accepted on either side of a translation pair.
const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "MERGE", "HEAD", "OPTIONS",
];

/// Placeholder replaced with the inbound verb.
pub const ORIGINAL_METHOD_TOKEN: &str = "{ORIGINAL_METHOD}";

/// Placeholder replaced with the translated verb.
pub const TRANSLATED_METHOD_TOKEN: &str = "{TRANSLATED_METHOD}";

/// How appended headers interact with headers already on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderConflictPolicy {
    /// Keep the existing request header.
    #[default]
    Skip,
    /// Replace the existing request header.
    Overwrite,
}

/// Parsed verb translation map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationMap {
    pairs: BTreeMap<String, String>,
}

impl TranslationMap {
    /// Parse a declaration such as `PUT:MERGE,POST:PUT`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TranslationInvalid`] for unknown verbs,
    /// malformed pairs, or a map that would not be idempotent.
    pub fn parse(raw: &str) -> ProxyResult<Self> {
        let mut pairs = BTreeMap::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (from, to) = entry
                .split_once(':')
                .or_else(|| entry.split_once(';'))
                .ok_or_else(|| ProxyError::TranslationInvalid {
                    detail: format!("expected FROM:TO but found '{entry}'"),
                })?;
            let from = validate_method(from)?;
            let to = validate_method(to)?;
            pairs.insert(from, to);
        }

        // Idempotence: translating a translated verb must be a no-op.
        for target in pairs.values() {
            if let Some(next) = pairs.get(target)
                && next != target
            {
                return Err(ProxyError::TranslationInvalid {
                    detail: format!("'{target}' is both a translation target and remapped"),
                });
            }
        }
        Ok(Self { pairs })
    }

    /// Translate a verb; unmapped verbs pass through uppercased.
    #[must_use]
    pub fn translate(&self, method: &str) -> String {
        let upper = method.to_ascii_uppercase();
        self.pairs.get(&upper).cloned().unwrap_or(upper)
    }

    /// Whether the map declares any pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Parsed append-header declaration.
#[derive(Debug, Clone, Default)]
pub struct AppendHeaders {
    by_method: BTreeMap<String, Vec<(String, String)>>,
}

impl AppendHeaders {
    /// Parse a declaration such as
    /// `PUT:X-HTTP-Method={ORIGINAL_METHOD},X-Source=gateway;DELETE:X-Tomb=1`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::TranslationInvalid`] for malformed groups.
    pub fn parse(raw: &str) -> ProxyResult<Self> {
        let mut by_method = BTreeMap::new();
        for group in raw.split(';') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let (verb, headers) =
                group
                    .split_once(':')
                    .ok_or_else(|| ProxyError::TranslationInvalid {
                        detail: format!("expected VERB:Name=value but found '{group}'"),
                    })?;
            let verb = validate_method(verb)?;
            let mut parsed = Vec::new();
            for header in headers.split(',') {
                let header = header.trim();
                if header.is_empty() {
                    continue;
                }
                let (name, value) =
                    header
                        .split_once('=')
                        .ok_or_else(|| ProxyError::TranslationInvalid {
                            detail: format!("expected Name=value but found '{header}'"),
                        })?;
                parsed.push((name.trim().to_string(), value.trim().to_string()));
            }
            by_method.insert(verb, parsed);
        }
        Ok(Self { by_method })
    }

    /// Headers to append for an inbound verb, with placeholders substituted.
    #[must_use]
    pub fn resolve(&self, original: &str, translated: &str) -> Vec<(String, String)> {
        self.by_method
            .get(&original.to_ascii_uppercase())
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, value)| {
                        let substituted = value
                            .replace(ORIGINAL_METHOD_TOKEN, &original.to_ascii_uppercase())
                            .replace(TRANSLATED_METHOD_TOKEN, translated);
                        (name.clone(), substituted)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn validate_method(raw: &str) -> ProxyResult<String> {
    let upper = raw.trim().to_ascii_uppercase();
    if KNOWN_METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ProxyError::TranslationInvalid {
            detail: format!("unknown HTTP method '{raw}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_maps_declared_verbs_only() {
        let map = TranslationMap::parse("PUT:MERGE").expect("map");
        assert_eq!(map.translate("put"), "MERGE");
        assert_eq!(map.translate("POST"), "POST");
    }

    #[test]
    fn legacy_semicolon_pairs_parse() {
        let map = TranslationMap::parse("PUT;MERGE").expect("map");
        assert_eq!(map.translate("PUT"), "MERGE");
    }

    #[test]
    fn translation_is_idempotent() {
        let map = TranslationMap::parse("PUT:MERGE,POST:PUT").expect_err("PUT remapped");
        assert!(matches!(map, ProxyError::TranslationInvalid { .. }));

        let map = TranslationMap::parse("PUT:MERGE,PATCH:MERGE").expect("map");
        for verb in ["PUT", "PATCH", "GET", "MERGE"] {
            let once = map.translate(verb);
            assert_eq!(map.translate(&once), once);
        }
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        assert!(TranslationMap::parse("PUT:BREW").is_err());
        assert!(TranslationMap::parse("TRACE:GET").is_err());
    }

    #[test]
    fn append_headers_substitute_method_tokens() {
        let headers =
            AppendHeaders::parse("PUT:X-HTTP-Method={ORIGINAL_METHOD},X-Via={TRANSLATED_METHOD}")
                .expect("headers");
        let resolved = headers.resolve("put", "MERGE");
        assert_eq!(
            resolved,
            vec![
                ("X-HTTP-Method".to_string(), "PUT".to_string()),
                ("X-Via".to_string(), "MERGE".to_string()),
            ]
        );
        assert!(headers.resolve("GET", "GET").is_empty());
    }

    #[test]
    fn append_header_groups_split_per_verb() {
        let headers =
            AppendHeaders::parse("PUT:A=1;DELETE:B=2,C=3").expect("headers");
        assert_eq!(headers.resolve("DELETE", "DELETE").len(), 2);
        assert_eq!(headers.resolve("PUT", "MERGE").len(), 1);
    }
}
