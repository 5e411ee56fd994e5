use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::cache::CacheStats;

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,

    // Counts
    total_entities_extracted: AtomicUsize,
    total_categories_failed: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_extract_time_us: AtomicU64::new(0),
            total_entities_extracted: AtomicUsize::new(0),
            total_categories_failed: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_extract(&self, duration: Duration, entities: usize, failed_categories: usize) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_entities_extracted
            .fetch_add(entities, Ordering::Relaxed);
        self.total_categories_failed
            .fetch_add(failed_categories, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache: Option<CacheStats>) -> MetricsSnapshot {
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let total_us = self.total_extract_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: successful,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_extract_time_ms: if successful > 0 {
                total_us / successful as f64 / 1000.0
            } else {
                0.0
            },
            total_entities_extracted: self.total_entities_extracted.load(Ordering::Relaxed),
            total_categories_failed: self.total_categories_failed.load(Ordering::Relaxed),
            cache,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_extract_time_ms: f64,
    pub total_entities_extracted: usize,
    pub total_categories_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_extract(Duration::from_millis(10), 3, 0);
        metrics.record_extract(Duration::from_millis(30), 1, 2);

        let snapshot = metrics.snapshot(None);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.total_entities_extracted, 4);
        assert_eq!(snapshot.total_categories_failed, 2);
        assert!((snapshot.avg_extract_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().snapshot(None);
        assert_eq!(snapshot.avg_extract_time_ms, 0.0);
    }
}
