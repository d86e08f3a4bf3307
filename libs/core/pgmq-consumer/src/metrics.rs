//! Prometheus metrics for the consumer
//!
//! Provides observability into polling and per-message outcomes.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .inspect(|_| info!("Prometheus metrics initialized"))
            .inspect_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
    });
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Consumer metrics helper
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    /// Queue name for labeling
    queue_name: String,
    /// Handler name for labeling
    handler_name: String,
}

impl ConsumerMetrics {
    /// Create new ConsumerMetrics
    pub fn new(queue_name: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            handler_name: handler_name.into(),
        }
    }

    /// Record a fetched batch
    pub fn batch_fetched(&self, size: usize) {
        counter!(
            "pgmq_consumer_messages_received_total",
            "queue" => self.queue_name.clone()
        )
        .increment(size as u64);

        histogram!(
            "pgmq_consumer_batch_size",
            "queue" => self.queue_name.clone()
        )
        .record(size as f64);
    }

    /// Record a failed fetch
    pub fn fetch_failed(&self) {
        counter!(
            "pgmq_consumer_fetch_errors_total",
            "queue" => self.queue_name.clone()
        )
        .increment(1);
    }

    /// Record a message handled and deleted
    pub fn message_finished(&self, duration: Duration) {
        counter!(
            "pgmq_consumer_messages_processed_total",
            "queue" => self.queue_name.clone(),
            "handler" => self.handler_name.clone(),
            "status" => "finish"
        )
        .increment(1);

        histogram!(
            "pgmq_consumer_handler_duration_seconds",
            "queue" => self.queue_name.clone(),
            "handler" => self.handler_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a handler or driver failure
    pub fn message_failed(&self) {
        counter!(
            "pgmq_consumer_messages_processed_total",
            "queue" => self.queue_name.clone(),
            "handler" => self.handler_name.clone(),
            "status" => "error"
        )
        .increment(1);
    }

    /// Record a message whose visibility budget elapsed
    pub fn message_aborted(&self) {
        counter!(
            "pgmq_consumer_messages_processed_total",
            "queue" => self.queue_name.clone(),
            "handler" => self.handler_name.clone(),
            "status" => "abort_error"
        )
        .increment(1);
    }

    /// Record a message moved to the DLQ
    pub fn message_dead_lettered(&self) {
        counter!(
            "pgmq_consumer_messages_processed_total",
            "queue" => self.queue_name.clone(),
            "handler" => self.handler_name.clone(),
            "status" => "send_to_dlq"
        )
        .increment(1);
    }
}
