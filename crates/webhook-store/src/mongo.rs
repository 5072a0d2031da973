//! MongoDB-backed [`EventStore`]. The atomic claim is implemented with
//! `find_one_and_update`, which MongoDB guarantees is a single atomic operation —
//! this is the one primitive this system requires the underlying store to provide;
//! it must never be approximated with an application-level read-then-write.

use crate::trait_def::EventStore;
use crate::types::{Aggregations, NewEvent, SearchFilter, SearchResults};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use webhook_common::error::StoreError;
use webhook_common::model::{Attempt, Event, EventStatus};

const COLLECTION: &str = "webhooks";

/// On-wire document shape. Kept separate from [`Event`] because Mongo's `_id` is
/// an `ObjectId`, not the hex string the rest of the system deals in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    payload: Bson,
    status: String,
    received_at: DateTime<Utc>,
    event_type: Option<String>,
    idempotency_key: Option<String>,
    delivery_attempts: Vec<AttemptDocument>,
    next_retry_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptDocument {
    attempt_number: u32,
    timestamp: DateTime<Utc>,
    status_code: Option<u16>,
    success: bool,
    error_message: Option<String>,
    duration_ms: u64,
}

impl From<Attempt> for AttemptDocument {
    fn from(a: Attempt) -> Self {
        Self {
            attempt_number: a.attempt_number,
            timestamp: a.timestamp,
            status_code: a.status_code,
            success: a.success,
            error_message: a.error_message,
            duration_ms: a.duration_ms,
        }
    }
}

impl From<AttemptDocument> for Attempt {
    fn from(a: AttemptDocument) -> Self {
        Self {
            attempt_number: a.attempt_number,
            timestamp: a.timestamp,
            status_code: a.status_code,
            success: a.success,
            error_message: a.error_message,
            duration_ms: a.duration_ms,
        }
    }
}

fn to_bson<T: Serialize>(value: &T) -> Result<Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::InvalidId(e.to_string()))
}

fn doc_to_event(doc: EventDocument) -> Result<Event, StoreError> {
    let id = doc
        .id
        .ok_or_else(|| StoreError::InvalidId("document missing _id".to_string()))?
        .to_hex();
    let payload = bson::from_bson(doc.payload).map_err(|e| StoreError::InvalidId(e.to_string()))?;
    Ok(Event {
        id,
        payload,
        status: EventStatus::from_wire_str(&doc.status),
        received_at: doc.received_at,
        event_type: doc.event_type,
        idempotency_key: doc.idempotency_key,
        delivery_attempts: doc.delivery_attempts.into_iter().map(Into::into).collect(),
        next_retry_at: doc.next_retry_at,
        delivered_at: doc.delivered_at,
        failed_at: doc.failed_at,
        version: doc.version,
    })
}

/// `EventStore` backed by a MongoDB collection `webhooks` in the configured database.
pub struct MongoEventStore {
    collection: Collection<EventDocument>,
}

impl MongoEventStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(client, database))
    }

    pub fn new(client: Client, database: &str) -> Self {
        let collection = client.database(database).collection(COLLECTION);
        Self { collection }
    }

    fn object_id(id: &str) -> Result<ObjectId, StoreError> {
        ObjectId::parse_str(id).map_err(|_| StoreError::InvalidId(id.to_string()))
    }

    fn to_mongo_error(e: mongodb::error::Error) -> StoreError {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl EventStore for MongoEventStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let status_idx = IndexModel::builder().keys(doc! { "status": 1 }).build();
        let received_idx = IndexModel::builder()
            .keys(doc! { "received_at": -1 })
            .build();
        let event_type_idx = IndexModel::builder()
            .keys(doc! { "event_type": 1 })
            .build();
        let claim_idx = IndexModel::builder()
            .keys(doc! { "status": 1, "next_retry_at": 1 })
            .build();
        let idempotency_idx = IndexModel::builder()
            .keys(doc! { "idempotency_key": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "idempotency_key": { "$exists": true } })
                    .build(),
            )
            .build();

        self.collection
            .create_indexes(
                [status_idx, received_idx, event_type_idx, claim_idx, idempotency_idx],
                None,
            )
            .await
            .map_err(Self::to_mongo_error)?;
        Ok(())
    }

    async fn insert(&self, new_event: NewEvent) -> Result<Event, StoreError> {
        let payload_bson = to_bson(&new_event.payload)?;
        let document = EventDocument {
            id: None,
            payload: payload_bson,
            status: EventStatus::Received.as_wire_str().to_string(),
            received_at: Utc::now(),
            event_type: new_event.event_type,
            idempotency_key: new_event.idempotency_key,
            delivery_attempts: Vec::new(),
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            version: 1,
        };

        let result = self.collection.insert_one(&document, None).await.map_err(|e| {
            if is_duplicate_key_error(&e) {
                StoreError::DuplicateIdempotencyKey
            } else {
                Self::to_mongo_error(e)
            }
        })?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::InvalidId("insert did not return an ObjectId".into()))?;

        doc_to_event(EventDocument {
            id: Some(id),
            ..document
        })
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, StoreError> {
        let found = self
            .collection
            .find_one(doc! { "idempotency_key": key }, None)
            .await
            .map_err(Self::to_mongo_error)?;
        found.map(doc_to_event).transpose()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let oid = Self::object_id(id)?;
        let found = self
            .collection
            .find_one(doc! { "_id": oid }, None)
            .await
            .map_err(Self::to_mongo_error)?;
        found.map(doc_to_event).transpose()
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        claim_timeout: ChronoDuration,
    ) -> Result<Option<Event>, StoreError> {
        let filter = doc! {
            "$or": [
                { "status": EventStatus::Received.as_wire_str() },
                {
                    "status": EventStatus::Processing.as_wire_str(),
                    "next_retry_at": { "$lte": now },
                },
            ],
        };
        let provisional_retry_at = now + claim_timeout;
        let update = doc! {
            "$set": {
                "status": EventStatus::Processing.as_wire_str(),
                "next_retry_at": provisional_retry_at,
            },
            "$inc": { "version": 1i64 },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .collection
            .find_one_and_update(filter, update, options)
            .await
            .map_err(Self::to_mongo_error)?;
        updated.map(doc_to_event).transpose()
    }

    async fn mark_delivered(&self, id: &str, attempt: Attempt) -> Result<(), StoreError> {
        let oid = Self::object_id(id)?;
        let attempt_doc = to_bson(&AttemptDocument::from(attempt))?;
        let update = doc! {
            "$push": { "delivery_attempts": attempt_doc },
            "$set": {
                "status": EventStatus::Delivered.as_wire_str(),
                "delivered_at": Utc::now(),
                "next_retry_at": Bson::Null,
            },
            "$inc": { "version": 1i64 },
        };
        self.update_one(oid, update).await
    }

    async fn mark_failed_permanent(&self, id: &str, attempt: Attempt) -> Result<(), StoreError> {
        let oid = Self::object_id(id)?;
        let attempt_doc = to_bson(&AttemptDocument::from(attempt))?;
        let update = doc! {
            "$push": { "delivery_attempts": attempt_doc },
            "$set": {
                "status": EventStatus::FailedPermanently.as_wire_str(),
                "failed_at": Utc::now(),
                "next_retry_at": Bson::Null,
            },
            "$inc": { "version": 1i64 },
        };
        self.update_one(oid, update).await
    }

    async fn schedule_retry(
        &self,
        id: &str,
        attempt: Option<Attempt>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let oid = Self::object_id(id)?;
        let mut update = doc! {
            "$set": { "next_retry_at": next_retry_at },
            "$inc": { "version": 1i64 },
        };
        if let Some(attempt) = attempt {
            let attempt_doc = to_bson(&AttemptDocument::from(attempt))?;
            update.insert("$push", doc! { "delivery_attempts": attempt_doc });
        }
        self.update_one(oid, update).await
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let filter = doc! {
            "status": { "$in": [
                EventStatus::Received.as_wire_str(),
                EventStatus::Processing.as_wire_str(),
            ] },
        };
        let count = self
            .collection
            .count_documents(filter, None)
            .await
            .map_err(Self::to_mongo_error)?;
        Ok(count)
    }

    async fn search(&self, filter: SearchFilter) -> Result<SearchResults, StoreError> {
        let mongo_filter = build_filter(&filter);

        let total = self
            .collection
            .count_documents(mongo_filter.clone(), None)
            .await
            .map_err(Self::to_mongo_error)?;

        let options = FindOptions::builder()
            .sort(doc! { "received_at": -1 })
            .skip(filter.skip)
            .limit(filter.limit.clamp(1, 100) as i64)
            .build();

        let mut cursor = self
            .collection
            .find(mongo_filter, options)
            .await
            .map_err(Self::to_mongo_error)?;

        let mut events = Vec::new();
        use futures::stream::TryStreamExt;
        while let Some(document) = cursor.try_next().await.map_err(Self::to_mongo_error)? {
            events.push(doc_to_event(document)?);
        }

        Ok(SearchResults { events, total })
    }

    async fn aggregate(&self, filter: SearchFilter) -> Result<Aggregations, StoreError> {
        let mongo_filter = build_filter(&filter);

        let pipeline = vec![
            doc! { "$match": mongo_filter },
            doc! {
                "$facet": {
                    "by_status": [
                        { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
                    ],
                    "by_event_type": [
                        { "$group": { "_id": { "$ifNull": ["$event_type", "unknown"] }, "count": { "$sum": 1 } } },
                    ],
                    "hourly": [
                        {
                            "$group": {
                                "_id": {
                                    "$dateToString": {
                                        "format": "%Y-%m-%dT%H:00:00Z",
                                        "date": "$received_at",
                                    },
                                },
                                "count": { "$sum": 1 },
                            },
                        },
                        { "$sort": { "_id": 1 } },
                    ],
                },
            },
        ];

        let mut cursor = self
            .collection
            .clone_with_type::<Document>()
            .aggregate(pipeline, None)
            .await
            .map_err(Self::to_mongo_error)?;

        use futures::stream::TryStreamExt;
        let facet_doc = cursor
            .try_next()
            .await
            .map_err(Self::to_mongo_error)?
            .unwrap_or_default();

        let mut aggregations = Aggregations::default();
        if let Some(by_status) = facet_doc.get_array("by_status").ok() {
            for entry in by_status {
                if let Some(d) = entry.as_document() {
                    let key = d.get_str("_id").unwrap_or("unknown").to_string();
                    let count = d.get_i32("count").unwrap_or(0) as u64;
                    aggregations.by_status.insert(key, count);
                }
            }
        }
        if let Some(by_event_type) = facet_doc.get_array("by_event_type").ok() {
            for entry in by_event_type {
                if let Some(d) = entry.as_document() {
                    let key = d.get_str("_id").unwrap_or("unknown").to_string();
                    let count = d.get_i32("count").unwrap_or(0) as u64;
                    aggregations.by_event_type.insert(key, count);
                }
            }
        }
        if let Some(hourly) = facet_doc.get_array("hourly").ok() {
            let mut buckets: Vec<(String, u64)> = Vec::new();
            for entry in hourly {
                if let Some(d) = entry.as_document() {
                    let key = d.get_str("_id").unwrap_or("").to_string();
                    let count = d.get_i32("count").unwrap_or(0) as u64;
                    buckets.push((key, count));
                }
            }
            aggregations.hourly = buckets;
        }

        Ok(aggregations)
    }
}

impl MongoEventStore {
    async fn update_one(&self, id: ObjectId, update: Document) -> Result<(), StoreError> {
        let result = self
            .collection
            .update_one(doc! { "_id": id }, update, None)
            .await
            .map_err(Self::to_mongo_error)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_hex()));
        }
        Ok(())
    }
}

/// `search_query` is matched as a case-insensitive substring of `event_type` via
/// `$regex` rather than `$text`, so it needs no text index on the collection.
fn build_filter(filter: &SearchFilter) -> Document {
    let mut conditions: Vec<Document> = Vec::new();
    if let Some(status) = filter.status {
        conditions.push(doc! { "status": status.as_wire_str() });
    }
    if let Some(event_type) = &filter.event_type {
        conditions.push(doc! { "event_type": event_type });
    }
    let mut range = Document::new();
    if let Some(from) = filter.from_date {
        range.insert("$gte", from);
    }
    if let Some(to) = filter.to_date {
        range.insert("$lte", to);
    }
    if !range.is_empty() {
        conditions.push(doc! { "received_at": range });
    }
    if let Some(query) = &filter.search_query {
        conditions.push(doc! {
            "event_type": { "$regex": regex_escape(query), "$options": "i" },
        });
    }

    match conditions.len() {
        0 => Document::new(),
        1 => conditions.remove(0),
        _ => doc! { "$and": conditions },
    }
}

/// Escapes regex metacharacters so a `search_query` is matched literally.
fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
            mongodb::error::WriteError { code: 11000, .. }
        ))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    // Integration tests require MongoDB running; point MONGODB_TEST_URI at it.
    // Run with: cargo test --features integration -- --ignored

    #[tokio::test]
    #[ignore]
    async fn concurrent_claim_next_hands_out_disjoint_events() {
        let uri = std::env::var("MONGODB_TEST_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let store = Arc::new(
            MongoEventStore::connect(&uri, "webhook_delivery_test")
                .await
                .expect("failed to connect to MongoDB"),
        );
        store.ensure_indexes().await.expect("failed to create indexes");

        for i in 0..20 {
            store
                .insert(NewEvent {
                    payload: serde_json::json!({"event_type": format!("event-{i}")}),
                    event_type: Some(format!("event-{i}")),
                    idempotency_key: None,
                })
                .await
                .expect("failed to insert event");
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
