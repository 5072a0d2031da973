//! The `EventStore` abstraction the delivery worker and ingest handler depend on.

use crate::types::{Aggregations, NewEvent, SearchFilter, SearchResults};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use webhook_common::error::StoreError;
use webhook_common::model::{Attempt, Event};

/// Durable storage for webhook events, with an atomic claim primitive that is the
/// linearization point for safe concurrent delivery across replicas.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create indexes/collections the store needs. Called once at startup;
    /// implementations backed by a schemaless store may no-op.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Insert a new event at status RECEIVED. Fails with
    /// [`StoreError::DuplicateIdempotencyKey`] if `idempotency_key` is set and
    /// already present on another record.
    async fn insert(&self, new_event: NewEvent) -> Result<Event, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, StoreError>;

    /// Atomically select one record with `status = RECEIVED` or
    /// `(status = PROCESSING AND next_retry_at <= now)`, transition it to
    /// PROCESSING, set a provisional `next_retry_at` of `now + claim_timeout`
    /// (bounding how long a crashed worker can hold the claim), and return it.
    /// Returns `None` if no record matched.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        claim_timeout: chrono::Duration,
    ) -> Result<Option<Event>, StoreError>;

    /// Append `attempt`, transition to DELIVERED, set `delivered_at`, clear
    /// `next_retry_at`.
    async fn mark_delivered(&self, id: &str, attempt: Attempt) -> Result<(), StoreError>;

    /// Append `attempt`, transition to FAILED_PERMANENTLY, set `failed_at`, clear
    /// `next_retry_at`.
    async fn mark_failed_permanent(&self, id: &str, attempt: Attempt) -> Result<(), StoreError>;

    /// Reschedule a PROCESSING record for another delivery attempt. `attempt` is
    /// `None` when the delivery was skipped due to an open circuit breaker, in
    /// which case `attempt_number` is not consumed.
    async fn schedule_retry(
        &self,
        id: &str,
        attempt: Option<Attempt>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Count of events not yet in a terminal state.
    async fn count_pending(&self) -> Result<u64, StoreError>;

    async fn search(&self, filter: SearchFilter) -> Result<SearchResults, StoreError>;

    async fn aggregate(&self, filter: SearchFilter) -> Result<Aggregations, StoreError>;
}
