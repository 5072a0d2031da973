use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;
use webhook_breaker::{CircuitBreaker, CircuitBreakerConfig};
use webhook_common::{Metrics, Settings};
use webhook_service::{build_router, AppState};
use webhook_store::InMemoryEventStore;

fn test_settings() -> Settings {
    Settings {
        hmac_secret: "test-secret".to_string(),
        mongodb_uri: "mongodb://unused".to_string(),
        mongodb_database: "unused".to_string(),
        redis_url: "redis://unused".to_string(),
        downstream_url: "http://unused".to_string(),
        log_level: "info".to_string(),
        worker_poll_interval: 1.0,
        max_retry_attempts: 5,
        retry_base_delay: 1.0,
        retry_max_delay: 16.0,
        bind_addr: "0.0.0.0:0".to_string(),
        downstream_timeout_seconds: 30,
        circuit_failure_threshold: 5,
        circuit_recovery_timeout_seconds: 30,
        circuit_half_open_required_successes: 3,
    }
}

fn test_state() -> AppState {
    AppState {
        settings: Arc::new(test_settings()),
        store: Arc::new(InMemoryEventStore::new()),
        breaker: Arc::new(CircuitBreaker::new("downstream", CircuitBreakerConfig::default())),
        metrics: Arc::new(Metrics::new()),
    }
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ingest_without_signature_is_rejected() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/ingest")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"event_type":"a"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_with_valid_signature_is_accepted() {
    let app = build_router(test_state());
    let body = r#"{"event_type":"order.created"}"#;
    let sig = webhook_security::generate(body.as_bytes(), "test-secret");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/ingest")
                .header("content-type", "application/json")
                .header("X-Signature", sig)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
