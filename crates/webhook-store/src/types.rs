//! Request/response shapes used by [`crate::EventStore`] beyond the core `Event` model.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use webhook_common::model::EventStatus;

/// Fields required to insert a brand-new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub payload: serde_json::Value,
    pub event_type: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Filter and pagination parameters accepted by `search`/`aggregate`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub status: Option<EventStatus>,
    pub event_type: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub search_query: Option<String>,
    pub skip: u64,
    pub limit: u64,
}

impl SearchFilter {
    pub fn with_pagination(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = limit.clamp(1, 100);
        self
    }
}

/// A page of matching events plus the total count ignoring pagination.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub events: Vec<webhook_common::model::Event>,
    pub total: u64,
}

/// One `(hour bucket, count)` pair, hour formatted `YYYY-MM-DDTHH:00:00Z`.
pub type HourlyBucket = (String, u64);

/// Grouped counts over a filtered set of events.
#[derive(Debug, Clone, Default)]
pub struct Aggregations {
    pub by_status: HashMap<String, u64>,
    pub by_event_type: HashMap<String, u64>,
    pub hourly: Vec<HourlyBucket>,
}
