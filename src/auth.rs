//! Organization resolution from request credentials.

use axum::http::HeaderMap;

use apitoll_store::tables::Organization;
use apitoll_store::{Id, Store};

use crate::error::ApiError;

/// Resolves the calling organization from `Authorization: Bearer <key>` or
/// `X-API-Key`. Both carry the same opaque API key.
pub fn require_org(
    store: &Store,
    headers: &HeaderMap,
) -> Result<(Id<Organization>, Organization), ApiError> {
    let api_key = bearer_token(headers)
        .or_else(|| header_value(headers, "x-api-key"))
        .ok_or(ApiError::Unauthorized)?;
    store
        .read(|inner| inner.org_by_api_key(&api_key))
        .ok_or(ApiError::Unauthorized)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_store::tables::{DailyUsage, Plan};
    use axum::http::HeaderValue;

    fn store_with_org() -> Store {
        let store = Store::new();
        store
            .mutate(|inner| {
                inner.insert_organization(Organization {
                    name: "acme".to_string(),
                    api_key: "sk-acme".to_string(),
                    plan: Plan::Free,
                    stripe_customer_id: None,
                    stripe_subscription_id: None,
                    stripe_price_id: None,
                    billing_period_end: None,
                    daily_usage: DailyUsage {
                        date: "2026-03-15".to_string(),
                        count: 0,
                    },
                    owner_identity: None,
                    created_at: 1,
                })
            })
            .unwrap();
        store
    }

    #[test]
    fn resolves_via_bearer_and_api_key_headers() {
        let store = store_with_org();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-acme"));
        assert!(require_org(&store, &headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-acme"));
        assert!(require_org(&store, &headers).is_ok());
    }

    #[test]
    fn rejects_missing_or_unknown_keys() {
        let store = store_with_org();
        let headers = HeaderMap::new();
        assert!(matches!(
            require_org(&store, &headers),
            Err(ApiError::Unauthorized)
        ));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-wrong"));
        assert!(matches!(
            require_org(&store, &headers),
            Err(ApiError::Unauthorized)
        ));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(matches!(
            require_org(&store, &headers),
            Err(ApiError::Unauthorized)
        ));
    }
}
