//! Scope and environment pattern matching.
//!
//! Token grants store comma-separated patterns: `*` matches everything,
//! `Name*` matches by prefix, and anything else matches exactly. The same
//! grammar covers endpoint scopes and environment grants. Matching is
//! case-insensitive.

use std::fmt;

/// One parsed grant pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopePattern {
    /// `*` — every name matches.
    All,
    /// `Name*` — names starting with the prefix match.
    Prefix(String),
    /// Exact, case-insensitive name.
    Exact(String),
}

impl ScopePattern {
    /// Parse a single pattern.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "*" {
            Self::All
        } else if let Some(prefix) = trimmed.strip_suffix('*') {
            Self::Prefix(prefix.to_ascii_lowercase())
        } else {
            Self::Exact(trimmed.to_ascii_lowercase())
        }
    }

    /// Whether the pattern matches a candidate name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        match self {
            Self::All => true,
            Self::Prefix(prefix) => lowered.starts_with(prefix),
            Self::Exact(exact) => lowered == *exact,
        }
    }
}

/// A token's full grant set for one dimension (scopes or environments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    patterns: Vec<ScopePattern>,
    raw: String,
}

impl ScopeSet {
    /// Parse a comma-separated grant list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let patterns = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ScopePattern::parse)
            .collect();
        Self {
            patterns,
            raw: raw.trim().to_string(),
        }
    }

    /// Whether any pattern matches the candidate name.
    ///
    /// An empty grant list matches nothing.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }

    /// The grant list as stored, for audit payloads.
    #[must_use]
    pub fn as_raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything() {
        let scopes = ScopeSet::parse("*");
        assert!(scopes.matches("Products"));
        assert!(scopes.matches("anything/at/all"));
    }

    #[test]
    fn prefix_patterns_match_by_prefix() {
        let scopes = ScopeSet::parse("Order*");
        assert!(scopes.matches("Orders"));
        assert!(scopes.matches("orderlines"));
        assert!(!scopes.matches("Products"));
    }

    #[test]
    fn exact_patterns_are_case_insensitive() {
        let scopes = ScopeSet::parse("Products,Invoices");
        assert!(scopes.matches("products"));
        assert!(scopes.matches("INVOICES"));
        assert!(!scopes.matches("Orders"));
    }

    #[test]
    fn empty_grant_list_matches_nothing() {
        let scopes = ScopeSet::parse("");
        assert!(!scopes.matches("Products"));
    }

    #[test]
    fn raw_form_is_preserved_for_audits() {
        let scopes = ScopeSet::parse("Products, Order*");
        assert_eq!(scopes.as_raw(), "Products, Order*");
    }
}
