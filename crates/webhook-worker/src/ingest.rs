//! Ingest path: authenticate, deduplicate, and persist an inbound webhook.
//!
//! Framework-agnostic by design — the HTTP handler in `webhook-service` only
//! extracts headers/body and calls [`ingest_event`]; every decision lives here
//! so it is testable without an HTTP server.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use webhook_common::error::ApiError;
use webhook_common::metrics::Metrics;
use webhook_common::model::{Event, EventStatus};
use webhook_store::{EventStore, NewEvent};

/// Outcome of an ingest call, returned to the HTTP layer for serialization.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub id: String,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub duplicate: bool,
}

impl From<Event> for IngestOutcome {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            status: event.status,
            received_at: event.received_at,
            duplicate: false,
        }
    }
}

/// Validate the signature, deduplicate on `idempotency_key`, and persist a new
/// event. `body` must be the exact bytes the signature was computed over.
pub async fn ingest_event(
    store: &dyn EventStore,
    metrics: &Arc<Metrics>,
    hmac_secret: &str,
    body: &[u8],
    signature: Option<&str>,
    idempotency_key: Option<&str>,
) -> Result<IngestOutcome, ApiError> {
    webhook_security::validate(body, signature, hmac_secret)?;

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::MalformedJson(e.to_string()))?;

    if let Some(key) = idempotency_key {
        if let Some(existing) = store.find_by_idempotency_key(key).await? {
            let mut outcome = IngestOutcome::from(existing);
            outcome.duplicate = true;
            return Ok(outcome);
        }
    }

    let event_type = Event::extract_event_type(&payload);

    let new_event = NewEvent {
        payload,
        event_type: event_type.clone(),
        idempotency_key: idempotency_key.map(|s| s.to_string()),
    };

    let inserted = match store.insert(new_event).await {
        Ok(event) => event,
        Err(webhook_common::error::StoreError::DuplicateIdempotencyKey) => {
            // Lost a race with a concurrent ingest of the same idempotency key.
            let key = idempotency_key.expect("duplicate key error implies a key was supplied");
            let existing = store
                .find_by_idempotency_key(key)
                .await?
                .ok_or_else(|| ApiError::Internal("duplicate reported but record missing".into()))?;
            let mut outcome = IngestOutcome::from(existing);
            outcome.duplicate = true;
            return Ok(outcome);
        }
        Err(e) => return Err(e.into()),
    };

    metrics
        .events_received_total
        .with_label_values(&[event_type.as_deref().unwrap_or("unknown")])
        .inc();

    Ok(IngestOutcome::from(inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webhook_store::InMemoryEventStore;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new())
    }

    #[tokio::test]
    async fn accepts_correctly_signed_payload() {
        let store = InMemoryEventStore::new();
        let body = br#"{"event_type":"order.created","order_id":1}"#;
        let sig = webhook_security::generate(body, "secret");

        let outcome = ingest_event(&store, &metrics(), "secret", body, Some(&sig), None)
            .await
            .unwrap();

        assert_eq!(outcome.status, EventStatus::Received);
        assert!(!outcome.duplicate);
    }

    #[tokio::test]
    async fn rejects_missing_signature() {
        let store = InMemoryEventStore::new();
        let body = br#"{"event_type":"a"}"#;
        let err = ingest_event(&store, &metrics(), "secret", body, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Security(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let store = InMemoryEventStore::new();
        let body = b"not json";
        let sig = webhook_security::generate(body, "secret");
        let err = ingest_event(&store, &metrics(), "secret", body, Some(&sig), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_prior_record() {
        let store = InMemoryEventStore::new();
        let body = br#"{"event_type":"a"}"#;
        let sig = webhook_security::generate(body, "secret");

        let first = ingest_event(
            &store,
            &metrics(),
            "secret",
            body,
            Some(&sig),
            Some("idem-1"),
        )
        .await
        .unwrap();

        let second = ingest_event(
            &store,
            &metrics(),
            "secret",
            body,
            Some(&sig),
            Some("idem-1"),
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.duplicate);
    }
}
