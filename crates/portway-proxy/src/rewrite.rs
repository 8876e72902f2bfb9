//! Textual response URL rewriting.
//!
//! Upstream payloads frequently embed absolute links to the internal
//! service. For JSON and XML bodies, every occurrence of the configured
//! upstream base is replaced with the public gateway base. The replacement
//! is purely textual; the payload is never parsed structurally.

/// Whether a content type is eligible for rewriting.
#[must_use]
pub fn should_rewrite(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("json") || lowered.contains("xml")
}

/// Replace the upstream base with the public base throughout the body.
///
/// Trailing slashes on either base are normalised away so
/// `http://internal/srv/` and `http://internal/srv` rewrite identically.
#[must_use]
pub fn rewrite_urls(body: &str, upstream_base: &str, public_base: &str) -> String {
    let upstream = upstream_base.trim_end_matches('/');
    let public = public_base.trim_end_matches('/');
    if upstream.is_empty() {
        return body.to_string();
    }
    body.replace(upstream, public)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_and_xml_content_types_are_eligible() {
        assert!(should_rewrite("application/json; charset=utf-8"));
        assert!(should_rewrite("text/xml"));
        assert!(should_rewrite("application/atom+xml"));
        assert!(!should_rewrite("application/pdf"));
        assert!(!should_rewrite("text/plain"));
    }

    #[test]
    fn upstream_links_become_public_links() {
        let body = r#"{"d":{"url":"http://internal/srv/Account(guid'X')"}}"#;
        let rewritten = rewrite_urls(
            body,
            "http://internal/srv/Account",
            "https://host/api/prod/Accounts",
        );
        assert_eq!(
            rewritten,
            r#"{"d":{"url":"https://host/api/prod/Accounts(guid'X')"}}"#
        );
    }

    #[test]
    fn trailing_slashes_do_not_break_matching() {
        let body = r#"{"next":"http://internal/srv/Account?page=2"}"#;
        let rewritten = rewrite_urls(
            body,
            "http://internal/srv/Account/",
            "https://host/api/prod/Accounts/",
        );
        assert!(rewritten.contains("https://host/api/prod/Accounts?page=2"));
    }

    #[test]
    fn unrelated_urls_are_untouched() {
        let body = r#"{"other":"http://elsewhere/x"}"#;
        let rewritten = rewrite_urls(body, "http://internal/srv", "https://host/api/prod/S");
        assert_eq!(rewritten, body);
    }
}
