//! Intake validation: replay-target URL guarding and secret comparison.

use std::net::IpAddr;
use subtle::ConstantTimeEq;
use tokio::net::lookup_host;
use url::Url;

use apitoll_types::netguard::is_forbidden_ip;

/// Errors rejecting a `/pay` intake before anything is persisted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UrlGuardError {
    #[error("original_url is not a valid URL")]
    Malformed,
    #[error("original_url must be http or https")]
    Scheme,
    #[error("original_url has no host")]
    NoHost,
    #[error("original_url resolves to a forbidden address range")]
    ForbiddenRange,
    #[error("original_url hostname did not resolve")]
    Unresolvable,
}

/// Validates a buyer-supplied replay target.
///
/// Rejects non-http(s) schemes and any host that is, or resolves to, a
/// loopback/private/link-local address. Every resolved address must be
/// public; one bad A record poisons the whole host.
pub async fn check_replay_url(raw: &str) -> Result<Url, UrlGuardError> {
    let url = Url::parse(raw).map_err(|_| UrlGuardError::Malformed)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlGuardError::Scheme);
    }
    let host = url.host_str().ok_or(UrlGuardError::NoHost)?;

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_forbidden_ip(ip) {
            return Err(UrlGuardError::ForbiddenRange);
        }
        return Ok(url);
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|_| UrlGuardError::Unresolvable)?
        .collect();
    if addrs.is_empty() {
        return Err(UrlGuardError::Unresolvable);
    }
    if addrs.iter().any(|addr| is_forbidden_ip(addr.ip())) {
        return Err(UrlGuardError::ForbiddenRange);
    }
    Ok(url)
}

/// Constant-time shared-secret comparison. Never short-circuits.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        assert_eq!(
            check_replay_url("ftp://example.com/x").await.unwrap_err(),
            UrlGuardError::Scheme
        );
        assert_eq!(
            check_replay_url("file:///etc/passwd").await.unwrap_err(),
            UrlGuardError::Scheme
        );
    }

    #[tokio::test]
    async fn rejects_loopback_and_private_literals() {
        for url in [
            "http://127.0.0.1/admin",
            "http://10.0.0.5/internal",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]:8080/",
        ] {
            assert_eq!(
                check_replay_url(url).await.unwrap_err(),
                UrlGuardError::ForbiddenRange,
                "expected {url} to be rejected"
            );
        }
    }

    #[tokio::test]
    async fn accepts_public_literals() {
        assert!(check_replay_url("https://1.1.1.1/api").await.is_ok());
    }

    #[test]
    fn secret_comparison_matches_exactly() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cret "));
        assert!(!secrets_match("", "s3cret"));
        assert!(!secrets_match("a", "b"));
    }
}
