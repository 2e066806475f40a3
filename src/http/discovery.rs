//! Tool discovery and listing management.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::document::IndexKey;
use apitoll_store::tables::{Endpoint, ListingTier, Tool, WebhookEventType};
use apitoll_store::Id;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{clamp, data, gate_org, gate_public};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

fn tool_json(tool: &Tool) -> serde_json::Value {
    json!({
        "slug": tool.slug,
        "name": tool.name,
        "description": tool.description,
        "category": tool.category,
        "tags": tool.tags,
        "verified": tool.verified,
        "listingTier": tool.listing_tier,
        "rating": if tool.rating_count == 0 {
            json!(null)
        } else {
            json!(tool.rating_sum as f64 / tool.rating_count as f64)
        },
        "active": tool.active,
    })
}

/// `GET /v1/discovery/tools`: public ranked search; params clamped.
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    gate_public(&state, &headers)?;
    let limit = clamp(params.limit, 1, 50, 20) as usize;
    let results = state.store.read(|inner| {
        inner.search_tools(
            params.q.as_deref().unwrap_or(""),
            params.category.as_deref(),
            limit,
        )
    });
    let tools: Vec<serde_json::Value> =
        results.iter().map(|(_, tool)| tool_json(tool)).collect();
    Ok(data(tools))
}

/// `GET /v1/tools/{slug}`: public listing lookup.
pub async fn get_by_slug(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    gate_public(&state, &headers)?;
    let tool = state
        .store
        .read(|inner| {
            inner
                .tools
                .unique_by_index("by_slug", &IndexKey::single(slug))
                .map(|(_, tool)| tool.clone())
        })
        .ok_or(ApiError::NotFound)?;
    Ok(data(tool_json(&tool)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterToolBody {
    pub endpoint_id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST /v1/tools`: lists one of the org's endpoints for discovery.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterToolBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    if body.slug.len() < 3
        || !body
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ApiError::validation(
            "slug",
            "slug must be at least 3 characters of [a-z0-9-]",
        ));
    }
    let endpoint_id = Id::<Endpoint>::from_string(body.endpoint_id.clone());
    // The endpoint must belong to one of the org's sellers.
    let owned = state.store.read(|inner| {
        inner
            .endpoints
            .get(&endpoint_id)
            .and_then(|endpoint| inner.sellers.get(&endpoint.seller))
            .is_some_and(|seller| seller.org.as_ref() == Some(&org_id))
    });
    if !owned {
        return Err(ApiError::NotFound);
    }
    let slug = body.slug.clone();
    state.store.mutate(|inner| {
        inner.insert_tool(Tool {
            endpoint: endpoint_id.clone(),
            slug: body.slug.clone(),
            name: body.name.clone(),
            description: body.description.clone(),
            category: body.category.clone(),
            tags: body.tags.clone(),
            verified: false,
            listing_tier: ListingTier::Standard,
            boost_score: 0,
            rating_sum: 0,
            rating_count: 0,
            active: true,
            created_at: now_millis(),
        })
    })?;
    // Listing events are ancillary; failures must not undo the listing.
    if let Err(err) = state.webhooks.emit(
        &org_id,
        WebhookEventType::ToolRegistered,
        json!({ "slug": slug }),
    ) {
        tracing::warn!(error = %err, "tool.registered emit failed");
    }
    Ok(data(json!({ "slug": slug })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateToolBody {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// `POST /v1/tools/{slug}/listing`: updates an owned listing.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(body): Json<UpdateToolBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let updated = state.store.mutate(|inner| {
        let Some((tool_id, tool)) = inner
            .tools
            .unique_by_index("by_slug", &IndexKey::single(slug.clone()))
            .map(|(id, tool)| (id, tool.clone()))
        else {
            return Ok(false);
        };
        let owned = inner
            .endpoints
            .get(&tool.endpoint)
            .and_then(|endpoint| inner.sellers.get(&endpoint.seller))
            .is_some_and(|seller| seller.org.as_ref() == Some(&org_id));
        if !owned {
            return Ok(false);
        }
        inner.tools.patch(&tool_id, |tool| {
            if let Some(description) = &body.description {
                tool.description = description.clone();
            }
            if let Some(tags) = &body.tags {
                tool.tags = tags.clone();
            }
            if let Some(active) = body.active {
                tool.active = active;
            }
            Ok(())
        })?;
        Ok(true)
    })?;
    if !updated {
        return Err(ApiError::NotFound);
    }
    if let Err(err) = state.webhooks.emit(
        &org_id,
        WebhookEventType::ToolUpdated,
        json!({ "slug": slug }),
    ) {
        tracing::warn!(error = %err, "tool.updated emit failed");
    }
    Ok(data(json!({ "slug": slug })))
}
