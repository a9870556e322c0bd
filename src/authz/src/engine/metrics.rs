//! Prometheus metrics for filter rendering

use parking_lot::RwLock;
use std::time::Duration;

/// Filter rendering metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of filter requests
    pub total_filters: u64,

    /// Requests answered without a filter
    pub unrestricted: u64,

    /// Requests refused by a wildcard resource
    pub refused: u64,

    /// Requests answered with a row filter
    pub restricted: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Error count
    pub error_count: u64,
}

impl EngineMetrics {
    /// Share of answered requests that received a row filter
    pub fn restriction_rate(&self) -> f64 {
        let total = self.unrestricted + self.refused + self.restricted;
        if total == 0 {
            0.0
        } else {
            self.restricted as f64 / total as f64
        }
    }
}

/// Outcome class recorded per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Unrestricted,
    Refused,
    Restricted,
}

/// Recent latency samples with their running sum
#[derive(Debug, Default)]
struct LatencyWindow {
    samples: Vec<f64>,
    sum: f64,
}

/// Metrics collector with Prometheus-compatible storage
///
/// Recording only touches counters and the sample window. Percentiles are
/// computed when a snapshot is taken.
pub struct MetricsCollector {
    metrics: RwLock<EngineMetrics>,

    /// Latency samples for percentile calculation
    latency: RwLock<LatencyWindow>,

    /// Maximum samples to keep
    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_max_samples(10_000)
    }

    /// Create a collector keeping at most `max_samples` latency samples
    pub fn with_max_samples(max_samples: usize) -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            latency: RwLock::new(LatencyWindow {
                samples: Vec::with_capacity(max_samples),
                sum: 0.0,
            }),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a rendered filter
    pub fn record_filter(&self, kind: FilterKind) {
        let mut metrics = self.metrics.write();
        metrics.total_filters += 1;
        match kind {
            FilterKind::Unrestricted => metrics.unrestricted += 1,
            FilterKind::Refused => metrics.refused += 1,
            FilterKind::Restricted => metrics.restricted += 1,
        }
    }

    /// Record request latency
    pub fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut window = self.latency.write();
        window.samples.push(latency_ms);
        window.sum += latency_ms;

        // Keep only recent samples
        if window.samples.len() > self.max_samples {
            let excess = (self.max_samples / 10).max(window.samples.len() - self.max_samples);
            let dropped: f64 = window.samples.drain(0..excess).sum();
            window.sum -= dropped;
        }
    }

    /// Number of latency samples currently kept
    pub fn latency_sample_count(&self) -> usize {
        self.latency.read().samples.len()
    }

    /// Record an error
    pub fn record_error(&self) {
        let mut metrics = self.metrics.write();
        metrics.total_filters += 1;
        metrics.error_count += 1;
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics.read().clone();

        let (mut sorted, sum) = {
            let window = self.latency.read();
            (window.samples.clone(), window.sum)
        };
        if sorted.is_empty() {
            return metrics;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        metrics.avg_latency_ms = sum / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        metrics
    }

    /// Reset all metrics
    pub fn reset(&self) {
        *self.metrics.write() = EngineMetrics::default();
        let mut window = self.latency.write();
        window.samples.clear();
        window.sum = 0.0;
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP rowguard_filters_total Total number of row filter requests
# TYPE rowguard_filters_total counter
rowguard_filters_total {}

# HELP rowguard_filter_outcomes_total Row filter requests by outcome
# TYPE rowguard_filter_outcomes_total counter
rowguard_filter_outcomes_total{{outcome="unrestricted"}} {}
rowguard_filter_outcomes_total{{outcome="refused"}} {}
rowguard_filter_outcomes_total{{outcome="restricted"}} {}

# HELP rowguard_filter_latency_seconds Filter rendering latency percentiles
# TYPE rowguard_filter_latency_seconds summary
rowguard_filter_latency_seconds{{quantile="0.5"}} {}
rowguard_filter_latency_seconds{{quantile="0.9"}} {}
rowguard_filter_latency_seconds{{quantile="0.99"}} {}

# HELP rowguard_errors_total Error count
# TYPE rowguard_errors_total counter
rowguard_errors_total {}
"#,
            metrics.total_filters,
            metrics.unrestricted,
            metrics.refused,
            metrics.restricted,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
