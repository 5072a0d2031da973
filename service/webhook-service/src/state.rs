//! Shared application context built once in `main` and cloned (cheaply, via
//! `Arc`) into the HTTP router and the background worker task.

use std::sync::Arc;
use webhook_breaker::CircuitBreaker;
use webhook_common::{Metrics, Settings};
use webhook_store::EventStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn EventStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<Metrics>,
}
