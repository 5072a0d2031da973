//! Domain types shared between the store, worker and HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a persisted webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Received,
    Processing,
    Delivered,
    FailedPermanently,
}

impl EventStatus {
    /// A terminal state never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Delivered | EventStatus::FailedPermanently)
    }

    /// Canonical wire representation, shared by persistence and aggregation so every
    /// `EventStore` implementation groups identical data under identical keys.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            EventStatus::Received => "RECEIVED",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Delivered => "DELIVERED",
            EventStatus::FailedPermanently => "FAILED_PERMANENTLY",
        }
    }

    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "PROCESSING" => EventStatus::Processing,
            "DELIVERED" => EventStatus::Delivered,
            "FAILED_PERMANENTLY" => EventStatus::FailedPermanently,
            _ => EventStatus::Received,
        }
    }
}

/// One delivery try against the downstream sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

/// A persisted webhook event and its delivery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub event_type: Option<String>,
    pub idempotency_key: Option<String>,
    pub delivery_attempts: Vec<Attempt>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Event {
    /// Extract `event_type` from the first of `event_type`, `type`, `event` present
    /// at the top level of the payload.
    pub fn extract_event_type(payload: &serde_json::Value) -> Option<String> {
        payload
            .as_object()
            .and_then(|obj| {
                obj.get("event_type")
                    .or_else(|| obj.get("type"))
                    .or_else(|| obj.get("event"))
            })
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn event_type_label(&self) -> &str {
        self.event_type.as_deref().unwrap_or("unknown")
    }

    /// `attempt_number` that the next delivery attempt for this event should use.
    pub fn next_attempt_number(&self) -> u32 {
        self.delivery_attempts.len() as u32 + 1
    }
}

/// Parameters of the exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
}

impl BackoffPolicy {
    /// `delay(n) = min(base * 2^(n-1), max)`, for 1-based attempt numbers.
    pub fn delay_seconds(&self, attempt_number: u32) -> f64 {
        let exp = attempt_number.saturating_sub(1);
        let raw = self.base_delay_seconds * 2f64.powi(exp as i32);
        raw.min(self.max_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_event_type_precedence() {
        assert_eq!(
            Event::extract_event_type(&json!({"event_type": "a", "type": "b"})),
            Some("a".to_string())
        );
        assert_eq!(
            Event::extract_event_type(&json!({"type": "b", "event": "c"})),
            Some("b".to_string())
        );
        assert_eq!(
            Event::extract_event_type(&json!({"event": "c"})),
            Some("c".to_string())
        );
        assert_eq!(Event::extract_event_type(&json!({"other": 1})), None);
    }

    #[test]
    fn backoff_matches_expected_schedule() {
        let policy = BackoffPolicy {
            base_delay_seconds: 1.0,
            max_delay_seconds: 16.0,
        };
        let delays: Vec<f64> = (1..=6).map(|n| policy.delay_seconds(n)).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0, 16.0, 16.0]);
    }
}
