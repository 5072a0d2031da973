//! In-memory `EventStore` implementation used by unit and property tests so they
//! do not require a live MongoDB instance.

use crate::trait_def::EventStore;
use crate::types::{Aggregations, NewEvent, SearchFilter, SearchResults};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use webhook_common::error::StoreError;
use webhook_common::model::{Attempt, Event, EventStatus};

#[derive(Default)]
struct Inner {
    events: HashMap<String, Event>,
    idempotency_index: HashMap<String, String>,
    next_id: u64,
}

/// An `EventStore` backed by a single in-process `HashMap`, guarded by one lock.
/// Not suitable for multi-replica deployments — it exists purely for tests.
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, new_event: NewEvent) -> Result<Event, StoreError> {
        let mut inner = self.inner.lock();

        if let Some(key) = &new_event.idempotency_key {
            if inner.idempotency_index.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey);
            }
        }

        inner.next_id += 1;
        let id = format!("{:024x}", inner.next_id);

        let event = Event {
            id: id.clone(),
            payload: new_event.payload,
            status: EventStatus::Received,
            received_at: Utc::now(),
            event_type: new_event.event_type,
            idempotency_key: new_event.idempotency_key.clone(),
            delivery_attempts: Vec::new(),
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            version: 1,
        };

        if let Some(key) = new_event.idempotency_key {
            inner.idempotency_index.insert(key, id.clone());
        }
        inner.events.insert(id, event.clone());
        Ok(event)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .idempotency_index
            .get(key)
            .and_then(|id| inner.events.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.inner.lock().events.get(id).cloned())
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        claim_timeout: ChronoDuration,
    ) -> Result<Option<Event>, StoreError> {
        let mut inner = self.inner.lock();
        let candidate_id = inner
            .events
            .values()
            .find(|e| {
                e.status == EventStatus::Received
                    || (e.status == EventStatus::Processing
                        && e.next_retry_at.map(|t| t <= now).unwrap_or(false))
            })
            .map(|e| e.id.clone());

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let event = inner.events.get_mut(&id).expect("candidate exists");
        event.status = EventStatus::Processing;
        event.next_retry_at = Some(now + claim_timeout);
        event.version += 1;
        Ok(Some(event.clone()))
    }

    async fn mark_delivered(&self, id: &str, attempt: Attempt) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        event.delivery_attempts.push(attempt);
        event.status = EventStatus::Delivered;
        event.delivered_at = Some(Utc::now());
        event.next_retry_at = None;
        event.version += 1;
        Ok(())
    }

    async fn mark_failed_permanent(&self, id: &str, attempt: Attempt) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        event.delivery_attempts.push(attempt);
        event.status = EventStatus::FailedPermanently;
        event.failed_at = Some(Utc::now());
        event.next_retry_at = None;
        event.version += 1;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: &str,
        attempt: Option<Attempt>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(attempt) = attempt {
            event.delivery_attempts.push(attempt);
        }
        event.next_retry_at = Some(next_retry_at);
        event.version += 1;
        Ok(())
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .events
            .values()
            .filter(|e| !e.status.is_terminal())
            .count() as u64)
    }

    async fn search(&self, filter: SearchFilter) -> Result<SearchResults, StoreError> {
        let inner = self.inner.lock();
        let mut matched: Vec<Event> = inner
            .events
            .values()
            .filter(|e| matches_filter(e, &filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(filter.skip as usize)
            .take(filter.limit.max(1) as usize)
            .collect();

        Ok(SearchResults {
            events: page,
            total,
        })
    }

    async fn aggregate(&self, filter: SearchFilter) -> Result<Aggregations, StoreError> {
        let inner = self.inner.lock();
        let mut aggregations = Aggregations::default();

        for event in inner.events.values().filter(|e| matches_filter(e, &filter)) {
            *aggregations
                .by_status
                .entry(event.status.as_wire_str().to_string())
                .or_insert(0) += 1;
            *aggregations
                .by_event_type
                .entry(event.event_type_label().to_string())
                .or_insert(0) += 1;
        }

        let mut hourly_counts: HashMap<String, u64> = HashMap::new();
        for event in inner.events.values().filter(|e| matches_filter(e, &filter)) {
            let bucket = event
                .received_at
                .format("%Y-%m-%dT%H:00:00Z")
                .to_string();
            *hourly_counts.entry(bucket).or_insert(0) += 1;
        }
        let mut hourly: Vec<_> = hourly_counts.into_iter().collect();
        hourly.sort_by(|a, b| a.0.cmp(&b.0));
        aggregations.hourly = hourly;

        Ok(aggregations)
    }
}

fn matches_filter(event: &Event, filter: &SearchFilter) -> bool {
    if let Some(status) = filter.status {
        if event.status != status {
            return false;
        }
    }
    if let Some(event_type) = &filter.event_type {
        if event.event_type.as_deref() != Some(event_type.as_str()) {
            return false;
        }
    }
    if let Some(from) = filter.from_date {
        if event.received_at < from {
            return false;
        }
    }
    if let Some(to) = filter.to_date {
        if event.received_at > to {
            return false;
        }
    }
    if let Some(query) = &filter.search_query {
        let haystack = event.payload.to_string();
        if !haystack.contains(query.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn new_event(event_type: &str) -> NewEvent {
        NewEvent {
            payload: json!({"event_type": event_type}),
            event_type: Some(event_type.to_string()),
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn insert_then_find_by_id() {
        let store = InMemoryEventStore::new();
        let event = store.insert(new_event("order.created")).await.unwrap();
        let found = store.find_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(found.status, EventStatus::Received);
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryEventStore::new();
        let mut first = new_event("a");
        first.idempotency_key = Some("k1".to_string());
        store.insert(first).await.unwrap();

        let mut second = new_event("a");
        second.idempotency_key = Some("k1".to_string());
        let err = store.insert(second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey));
    }

    #[tokio::test]
    async fn claim_next_transitions_to_processing_and_sets_provisional_retry() {
        let store = InMemoryEventStore::new();
        let event = store.insert(new_event("a")).await.unwrap();
        let now = Utc::now();

        let claimed = store
            .claim_next(now, ChronoDuration::seconds(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, event.id);
        assert_eq!(claimed.status, EventStatus::Processing);
        assert!(claimed.next_retry_at.is_some());

        // Not eligible again immediately (next_retry_at is in the future).
        let second = store.claim_next(now, ChronoDuration::seconds(30)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_next_returns_none_when_nothing_eligible() {
        let store = InMemoryEventStore::new();
        assert!(store
            .claim_next(Utc::now(), ChronoDuration::seconds(30))
            .await
            .unwrap()
            .is_none());
    }

    /// Concurrent callers must never be handed the same record: `claim_next` is the
    /// linearisation point for multi-replica safety, so this must hold even against
    /// a store with more claimable events than tasks trying to claim them.
    #[tokio::test]
    async fn concurrent_claim_next_hands_out_disjoint_events() {
        let store = Arc::new(InMemoryEventStore::new());
        for i in 0..20 {
            store
                .insert(new_event(&format!("event-{i}")))
                .await
                .unwrap();
        }

        let now = Utc::now();
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.claim_next(now, ChronoDuration::seconds(30)).await
            }));
        }

        let mut claimed_ids = HashSet::new();
        for task in tasks {
            if let Some(event) = task.await.unwrap().unwrap() {
                assert!(
                    claimed_ids.insert(event.id.clone()),
                    "event {} was claimed more than once",
                    event.id
                );
            }
        }
        assert_eq!(claimed_ids.len(), 20);
    }
}
