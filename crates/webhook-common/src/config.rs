//! Configuration for the webhook delivery system.

use serde::{Deserialize, Serialize};

/// Settings for the whole service, loaded once at startup from the environment.
///
/// Required fields have no default and cause [`Settings::from_env`] to fail fast
/// if unset, matching the "validate once, fail fast" policy for process startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Shared secret used to validate inbound `X-Signature` headers.
    pub hmac_secret: String,

    /// MongoDB connection string.
    pub mongodb_uri: String,

    /// MongoDB database name holding the `webhooks` collection.
    #[serde(default = "default_mongodb_database")]
    pub mongodb_database: String,

    /// Redis connection URL. Reserved for future use; unused by the core pipeline.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Base URL of the downstream HTTP sink events are delivered to.
    pub downstream_url: String,

    /// `tracing`/`RUST_LOG`-style log level filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often the delivery worker polls for deliverable events, in seconds.
    #[serde(default = "default_worker_poll_interval")]
    pub worker_poll_interval: f64,

    /// Maximum number of delivery attempts before an event is marked FAILED_PERMANENTLY.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Base delay for exponential backoff, in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: f64,

    /// Cap on the exponential backoff delay, in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: f64,

    /// Address the HTTP surface binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Timeout for a single downstream HTTP delivery call, in seconds.
    #[serde(default = "default_downstream_timeout_seconds")]
    pub downstream_timeout_seconds: u64,

    /// Circuit breaker consecutive-failure threshold before opening.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Circuit breaker recovery timeout, in seconds, before probing half-open.
    #[serde(default = "default_circuit_recovery_timeout")]
    pub circuit_recovery_timeout_seconds: u64,

    /// Consecutive half-open successes required to close the circuit.
    #[serde(default = "default_circuit_half_open_successes")]
    pub circuit_half_open_required_successes: u32,
}

impl Settings {
    /// Load configuration from process environment variables (optionally via a `.env` file).
    pub fn from_env() -> Result<Self, envy::Error> {
        let _ = dotenvy::dotenv();
        envy::from_env()
    }
}

fn default_mongodb_database() -> String {
    "webhook_delivery".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_poll_interval() -> f64 {
    1.0
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> f64 {
    1.0
}

fn default_retry_max_delay() -> f64 {
    16.0
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_downstream_timeout_seconds() -> u64 {
    30
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_recovery_timeout() -> u64 {
    30
}

fn default_circuit_half_open_successes() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        assert_eq!(default_max_retry_attempts(), 5);
        assert_eq!(default_retry_base_delay(), 1.0);
        assert_eq!(default_retry_max_delay(), 16.0);
        assert_eq!(default_circuit_failure_threshold(), 5);
        assert_eq!(default_circuit_recovery_timeout(), 30);
        assert_eq!(default_circuit_half_open_successes(), 3);
    }

    #[test]
    fn from_env_requires_mandatory_fields() {
        // SAFETY: tests run single-threaded within this module; no concurrent env mutation.
        std::env::remove_var("HMAC_SECRET");
        std::env::remove_var("MONGODB_URI");
        std::env::remove_var("DOWNSTREAM_URL");
        assert!(Settings::from_env().is_err());
    }
}
