//! Metrics collection for pool monitoring.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pool metrics collector, shared by the controller and its workers
#[derive(Debug)]
pub struct Metrics {
    // Task counters
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_panicked: AtomicU64,
    tasks_retried: AtomicU64,

    // Descriptor cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // Execution time histogram (protected by RwLock for interior mutability)
    latency_histogram: RwLock<Option<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        // 3 significant figures, max value of 1 hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3).ok();

        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    /// Record a task execution with duration
    pub fn record_task_execution(&self, duration_ns: u64) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            if let Some(hist) = hist.as_mut() {
                let _ = hist.record(duration_ns);
            }
        }
    }

    pub fn record_task_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed task replayed in the calling thread
    pub fn record_retry(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();
        let (avg, p50, p99, max) = match histogram.as_ref() {
            Some(h) if h.len() > 0 => (
                h.mean() as u64,
                h.value_at_quantile(0.50),
                h.value_at_quantile(0.99),
                h.max(),
            ),
            _ => (0, 0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            avg_latency_ns: avg,
            p50_latency_ns: p50,
            p99_latency_ns: p99,
            max_latency_ns: max,
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.tasks_executed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.tasks_panicked.store(0, Ordering::Relaxed);
        self.tasks_retried.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.latency_histogram.try_write() {
            if let Some(hist) = hist.as_mut() {
                hist.reset();
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub tasks_panicked: u64,
    pub tasks_retried: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Share of descriptor lookups served from the cache (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    /// Calculate tasks per second
    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.tasks_executed as f64 / seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let metrics = Metrics::new();

        metrics.record_task_execution(1000);
        metrics.record_task_execution(2000);
        metrics.record_task_failure();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_executed, 2);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.tasks_retried, 1);
        assert!(snapshot.avg_latency_ns > 0);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = Metrics::new();

        metrics.record_task_execution(1000);
        metrics.record_cache_hit();
        assert_eq!(metrics.snapshot().tasks_executed, 1);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_executed, 0);
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.avg_latency_ns, 0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().cache_hit_rate(), 0.0);

        metrics.record_cache_miss();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        assert_eq!(metrics.snapshot().cache_hit_rate(), 0.75);
    }
}
