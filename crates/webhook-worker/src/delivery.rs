//! Background delivery worker: claims events, calls the downstream sink,
//! records outcomes, and schedules retries with exponential backoff.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};
use webhook_breaker::CircuitBreaker;
use webhook_common::error::DeliveryError;
use webhook_common::model::{Attempt, BackoffPolicy, Event};
use webhook_common::Metrics;
use webhook_store::EventStore;

/// Tunables for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_retry_attempts: u32,
    pub backoff: BackoffPolicy,
    pub downstream_url: String,
    pub downstream_timeout: Duration,
}

/// Runs the poll → claim → deliver → retry/terminate loop until cancelled.
///
/// Mirrors the "never let a per-item error kill the loop" policy: every
/// sub-operation failure is logged and the loop continues on its next tick.
pub struct DeliveryWorker {
    config: WorkerConfig,
    store: Arc<dyn EventStore>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
}

impl DeliveryWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn EventStore>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.downstream_timeout)
            .build()
            .expect("downstream HTTP client builds");
        Self {
            config,
            store,
            breaker,
            metrics,
            http,
        }
    }

    /// Run until `shutdown` is set to `true`. The polling sleep is checked
    /// against the signal so shutdown is observed promptly between ticks.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("delivery worker shutting down");
                        return;
                    }
                }
            }

            if *shutdown.borrow() {
                return;
            }

            self.drain_claimable().await;

            if let Err(e) = self.refresh_pending_gauge().await {
                warn!("failed to refresh pending_events gauge: {}", e);
            }
        }
    }

    async fn drain_claimable(&self) {
        loop {
            let claim_timeout = ChronoDuration::from_std(self.config.downstream_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(30));

            let claimed = match self.store.claim_next(Utc::now(), claim_timeout).await {
                Ok(Some(event)) => event,
                Ok(None) => return,
                Err(e) => {
                    warn!("claim_next failed: {}", e);
                    return;
                }
            };

            if let Err(e) = self.deliver(claimed).await {
                warn!("delivery procedure failed: {}", e);
            }
        }
    }

    async fn refresh_pending_gauge(&self) -> Result<(), webhook_common::error::StoreError> {
        let pending = self.store.count_pending().await?;
        self.metrics.pending_events.set(pending as f64);
        Ok(())
    }

    /// One delivery attempt (or a circuit-gated reschedule) for a single claimed event.
    async fn deliver(&self, event: Event) -> Result<(), webhook_common::error::StoreError> {
        let attempt_number = event.next_attempt_number();
        self.metrics
            .retry_attempts_total
            .with_label_values(&[&attempt_number.to_string()])
            .inc();

        if !self.breaker.can_execute() {
            // No attempt is consumed: attempt_number does not advance, so repeated
            // circuit rejections use a constant backoff rather than growing.
            let delay = self.config.backoff.delay_seconds(attempt_number);
            let next_retry_at = Utc::now() + ChronoDuration::milliseconds((delay * 1000.0) as i64);
            return self.store.schedule_retry(&event.id, None, next_retry_at).await;
        }

        let start = Instant::now();
        let outcome = self.call_downstream(&event).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let event_type = event.event_type_label().to_string();
        self.metrics
            .delivery_duration_seconds
            .with_label_values(&[&event_type])
            .observe(duration_ms as f64 / 1000.0);

        let attempt = match &outcome {
            Ok(status_code) => Attempt {
                attempt_number,
                timestamp: Utc::now(),
                status_code: Some(*status_code),
                success: *status_code == 200,
                error_message: if *status_code == 200 {
                    None
                } else {
                    Some(format!("HTTP {}", status_code))
                },
                duration_ms,
            },
            Err(e) => Attempt {
                attempt_number,
                timestamp: Utc::now(),
                status_code: e.status_code(),
                success: false,
                error_message: Some(e.message()),
                duration_ms,
            },
        };

        if attempt.success {
            self.breaker.record_success();
            self.store.mark_delivered(&event.id, attempt).await?;
            self.metrics
                .events_delivered_total
                .with_label_values(&[&event_type])
                .inc();
            return Ok(());
        }

        self.breaker.record_failure();

        if attempt_number >= self.config.max_retry_attempts {
            self.store.mark_failed_permanent(&event.id, attempt).await?;
            self.metrics
                .events_failed_total
                .with_label_values(&[&event_type])
                .inc();
        } else {
            let delay = self.config.backoff.delay_seconds(attempt_number);
            let next_retry_at = Utc::now() + ChronoDuration::milliseconds((delay * 1000.0) as i64);
            self.store
                .schedule_retry(&event.id, Some(attempt), next_retry_at)
                .await?;
        }

        Ok(())
    }

    async fn call_downstream(&self, event: &Event) -> Result<u16, DeliveryError> {
        let url = format!("{}/downstream/receive", self.config.downstream_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("X-Event-Id", &event.id)
            .json(&event.payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}
