//! Prometheus metrics registry for the webhook delivery pipeline.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// Holds every series the system exposes on `/metrics`.
///
/// Constructed once per process and shared (via `Arc`) between the ingest handler,
/// the delivery worker and the HTTP exposition handler.
pub struct Metrics {
    registry: Registry,
    pub events_received_total: CounterVec,
    pub events_delivered_total: CounterVec,
    pub events_failed_total: CounterVec,
    pub retry_attempts_total: CounterVec,
    pub delivery_duration_seconds: HistogramVec,
    pub pending_events: Gauge,
    pub circuit_breaker_state: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_received_total = CounterVec::new(
            Opts::new(
                "webhook_events_received_total",
                "Total webhook events accepted at ingest",
            ),
            &["event_type"],
        )
        .expect("valid metric");

        let events_delivered_total = CounterVec::new(
            Opts::new(
                "webhook_events_delivered_total",
                "Total webhook events successfully delivered",
            ),
            &["event_type"],
        )
        .expect("valid metric");

        let events_failed_total = CounterVec::new(
            Opts::new(
                "webhook_events_failed_total",
                "Total webhook events that exhausted retries",
            ),
            &["event_type"],
        )
        .expect("valid metric");

        let retry_attempts_total = CounterVec::new(
            Opts::new(
                "webhook_retry_attempts_total",
                "Total delivery attempts made, labeled by attempt number",
            ),
            &["attempt_number"],
        )
        .expect("valid metric");

        let delivery_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "webhook_delivery_duration_seconds",
                "Duration of a downstream delivery HTTP call",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["event_type"],
        )
        .expect("valid metric");

        let pending_events = Gauge::new(
            "webhook_pending_events",
            "Number of events not yet in a terminal state",
        )
        .expect("valid metric");

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "webhook_circuit_breaker_state",
                "Circuit breaker state: 0=closed, 1=open, 2=half-open",
            ),
            &["name"],
        )
        .expect("valid metric");

        registry
            .register(Box::new(events_received_total.clone()))
            .expect("register metric");
        registry
            .register(Box::new(events_delivered_total.clone()))
            .expect("register metric");
        registry
            .register(Box::new(events_failed_total.clone()))
            .expect("register metric");
        registry
            .register(Box::new(retry_attempts_total.clone()))
            .expect("register metric");
        registry
            .register(Box::new(delivery_duration_seconds.clone()))
            .expect("register metric");
        registry
            .register(Box::new(pending_events.clone()))
            .expect("register metric");
        registry
            .register(Box::new(circuit_breaker_state.clone()))
            .expect("register metric");

        Self {
            registry,
            events_received_total,
            events_delivered_total,
            events_failed_total,
            retry_attempts_total,
            delivery_duration_seconds,
            pending_events,
            circuit_breaker_state,
        }
    }

    /// Render the current state of every series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("encode metrics");
        String::from_utf8(buffer).expect("utf8 metrics output")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_panicking_and_renders_text() {
        let metrics = Metrics::new();
        metrics
            .events_received_total
            .with_label_values(&["order.created"])
            .inc();
        let rendered = metrics.render();
        assert!(rendered.contains("webhook_events_received_total"));
    }
}
