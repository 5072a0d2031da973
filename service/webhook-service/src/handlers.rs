//! Axum handlers. Each one only extracts the request and calls into the core
//! library crates — no business logic lives here.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::HttpError;
use crate::state::AppState;
use webhook_common::model::EventStatus;
use webhook_store::SearchFilter;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: String,
    pub status: EventStatus,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<IngestResponse>, HttpError> {
    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok());
    let idempotency_key = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok());

    let outcome = webhook_worker::ingest_event(
        state.store.as_ref(),
        &state.metrics,
        &state.settings.hmac_secret,
        &body,
        signature,
        idempotency_key,
    )
    .await?;

    let message = if outcome.duplicate {
        "duplicate event, returning prior record".to_string()
    } else {
        "event accepted".to_string()
    };

    Ok(Json(IngestResponse {
        id: outcome.id,
        status: outcome.status,
        received_at: outcome.received_at,
        message,
    }))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<webhook_common::model::Event>, HttpError> {
    let event = state
        .store
        .find_by_id(&id)
        .await
        .map_err(webhook_common::error::ApiError::from)?
        .ok_or_else(|| {
            HttpError::from(webhook_common::error::ApiError::Store(
                webhook_common::error::StoreError::NotFound(id.clone()),
            ))
        })?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub status: Option<EventStatus>,
    pub event_type: Option<String>,
    pub from_date: Option<chrono::DateTime<chrono::Utc>>,
    pub to_date: Option<chrono::DateTime<chrono::Utc>>,
    pub search_query: Option<String>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub include_aggregations: bool,
}

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub events: Vec<webhook_common::model::Event>,
    pub total: u64,
    pub aggregations: Option<AggregationsResponse>,
}

#[derive(Debug, Serialize)]
pub struct AggregationsResponse {
    pub by_status: std::collections::HashMap<String, u64>,
    pub by_event_type: std::collections::HashMap<String, u64>,
    pub hourly: Vec<(String, u64)>,
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    let filter = SearchFilter {
        status: request.status,
        event_type: request.event_type,
        from_date: request.from_date,
        to_date: request.to_date,
        search_query: request.search_query,
        skip: request.skip,
        limit: request.limit,
    };

    let results = state
        .store
        .search(filter.clone())
        .await
        .map_err(webhook_common::error::ApiError::from)?;

    let aggregations = if request.include_aggregations {
        let agg = state
            .store
            .aggregate(filter)
            .await
            .map_err(webhook_common::error::ApiError::from)?;
        Some(AggregationsResponse {
            by_status: agg.by_status,
            by_event_type: agg.by_event_type,
            hourly: agg.hourly,
        })
    } else {
        None
    };

    Ok(Json(SearchResponse {
        events: results.events,
        total: results.total,
        aggregations,
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "webhook-delivery-system" }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.render())
}
