//! Security headers applied to every gate response.

use http::header::{HeaderMap, HeaderName, HeaderValue};

fn security_headers() -> [(HeaderName, &'static str); 6] {
    [
        (
            HeaderName::from_static("x-content-type-options"),
            "nosniff",
        ),
        (HeaderName::from_static("x-frame-options"), "DENY"),
        (
            HeaderName::from_static("referrer-policy"),
            "strict-origin-when-cross-origin",
        ),
        (
            HeaderName::from_static("strict-transport-security"),
            "max-age=63072000; includeSubDomains",
        ),
        (
            HeaderName::from_static("content-security-policy"),
            "default-src 'none'; frame-ancestors 'none'; base-uri 'none'",
        ),
        (
            HeaderName::from_static("permissions-policy"),
            "geolocation=(), microphone=(), camera=()",
        ),
    ]
}

/// Inserts the platform's security headers, overwriting existing values.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in security_headers() {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_all_security_headers() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert!(headers.contains_key("strict-transport-security"));
        assert!(headers.contains_key("content-security-policy"));
        assert!(headers.contains_key("permissions-policy"));
    }

    #[test]
    fn overwrites_preexisting_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
        apply_security_headers(&mut headers);
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    }
}
