//! Error taxonomy shared across the webhook delivery crates.

use thiserror::Error;

/// Errors raised validating an inbound signature.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("missing X-Signature header")]
    MissingSignature,

    #[error("signature does not match payload")]
    InvalidSignature,
}

/// Errors raised by the durable event store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("idempotency key already exists")]
    DuplicateIdempotencyKey,

    #[error("event {0} not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),
}

impl StoreError {
    /// Whether the worker loop should treat this as transient (log and keep polling)
    /// rather than something that should surface to an operator differently.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Errors raised attempting a downstream delivery.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("downstream request timed out")]
    Timeout,

    #[error("downstream transport error: {0}")]
    Transport(String),

    #[error("downstream returned non-200 status {0}")]
    NonSuccessStatus(u16),

    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl DeliveryError {
    /// The HTTP status the downstream call failed with, if it got a response at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::NonSuccessStatus(code) => Some(*code),
            _ => None,
        }
    }

    /// Short text recorded on the `Attempt`, matching the documented wire format
    /// (distinct from `Display`, which is the more verbose log-facing message).
    pub fn message(&self) -> String {
        match self {
            DeliveryError::Timeout => "Timeout".to_string(),
            DeliveryError::Transport(msg) => msg.clone(),
            DeliveryError::NonSuccessStatus(code) => format!("HTTP {code}"),
            DeliveryError::CircuitOpen => "circuit breaker is open".to_string(),
        }
    }
}

/// Top-level error type the HTTP surface maps onto status codes.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("internal error: {0}")]
    Internal(String),
}
