//! Paid endpoint configuration and path patterns.

use http::Method;

use apitoll_types::address::{AddressError, WalletAddress};
use apitoll_types::chain::Chain;
use apitoll_types::fees::FeeConfig;
use apitoll_types::money::{MoneyAmount, MoneyAmountParseError, TokenAmount};

/// A path pattern with `:param` segments, e.g. `/api/users/:id`.
///
/// A pattern matches a concrete path when segment counts are equal and every
/// non-parameter segment is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                if segment.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        PathPattern {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(parts)
            .all(|(segment, part)| match segment {
                Segment::Literal(expected) => expected == part,
                Segment::Param => true,
            })
    }
}

/// Errors building an [`EndpointConfig`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointConfigError {
    #[error("invalid price: {0}")]
    Price(#[from] MoneyAmountParseError),
    #[error("invalid seller wallet: {0}")]
    Wallet(#[from] AddressError),
    #[error("endpoint must accept at least one chain")]
    NoChains,
}

/// One paid route guarded by the gate.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub method: Method,
    pub pattern: PathPattern,
    pub price: MoneyAmount,
    /// Precomputed smallest-units price.
    pub price_units: TokenAmount,
    pub currency: String,
    pub chains: Vec<Chain>,
    pub pay_to: WalletAddress,
    pub fee: Option<FeeConfig>,
    pub description: String,
    pub active: bool,
    /// Platform endpoint id carried into analytics reports.
    pub endpoint_id: Option<String>,
}

impl EndpointConfig {
    /// Builds a config for `price` (human-readable USDC) on `chains`.
    pub fn new(
        method: Method,
        pattern: &str,
        price: &str,
        chains: &[Chain],
        pay_to: &str,
    ) -> Result<Self, EndpointConfigError> {
        if chains.is_empty() {
            return Err(EndpointConfigError::NoChains);
        }
        let price = MoneyAmount::parse(price)?;
        let price_units = price.as_token_amount(6)?;
        Ok(EndpointConfig {
            method,
            pattern: PathPattern::parse(pattern),
            price,
            price_units,
            currency: "USDC".to_string(),
            chains: chains.to_vec(),
            pay_to: WalletAddress::parse(pay_to)?,
            fee: None,
            description: String::new(),
            active: true,
            endpoint_id: None,
        })
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_fee(mut self, fee: FeeConfig) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.endpoint_id = Some(id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.active && &self.method == method && self.pattern.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        let pattern = PathPattern::parse("/api/joke");
        assert!(pattern.matches("/api/joke"));
        assert!(pattern.matches("/api/joke/"));
        assert!(!pattern.matches("/api/jokes"));
        assert!(!pattern.matches("/api/joke/extra"));
    }

    #[test]
    fn param_segments_match_any_value() {
        let pattern = PathPattern::parse("/api/users/:id/posts/:post");
        assert!(pattern.matches("/api/users/42/posts/7"));
        assert!(pattern.matches("/api/users/abc/posts/xyz"));
        assert!(!pattern.matches("/api/users/42/posts"));
        assert!(!pattern.matches("/api/users/42/comments/7"));
    }

    #[test]
    fn endpoint_precomputes_units() {
        let endpoint = EndpointConfig::new(
            Method::GET,
            "/api/joke",
            "0.005",
            &[Chain::Base],
            "0x71C7656EC7ab88b098defB751B7401B5f6d8976F",
        )
        .unwrap();
        assert_eq!(endpoint.price_units, TokenAmount(5000));
        assert!(endpoint.matches(&Method::GET, "/api/joke"));
        assert!(!endpoint.matches(&Method::POST, "/api/joke"));
    }

    #[test]
    fn inactive_endpoint_never_matches() {
        let endpoint = EndpointConfig::new(
            Method::GET,
            "/api/joke",
            "0.005",
            &[Chain::Base],
            "0x71C7656EC7ab88b098defB751B7401B5f6d8976F",
        )
        .unwrap()
        .inactive();
        assert!(!endpoint.matches(&Method::GET, "/api/joke"));
    }
}
