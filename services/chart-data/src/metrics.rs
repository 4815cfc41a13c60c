//! Observability counters for the candle engine
//!
//! Tracks ingestion outcomes per event and per bucket, store failures, and
//! apply latency. Exported as a flat map for Prometheus-style exposition.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Core metrics for the candle engine.
pub struct EngineMetrics {
    // Events
    pub events_received: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_partially_applied: AtomicU64,
    pub apply_latency_us: Mutex<LatencyWindow>,

    // Buckets
    pub buckets_created: AtomicU64,
    pub buckets_updated: AtomicU64,
    pub buckets_duplicate: AtomicU64,
    pub bucket_failures: AtomicU64,
    pub store_timeouts: AtomicU64,

    // Reads
    pub read_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_partially_applied: AtomicU64::new(0),
            apply_latency_us: Mutex::new(LatencyWindow::new(1024)),
            buckets_created: AtomicU64::new(0),
            buckets_updated: AtomicU64::new(0),
            buckets_duplicate: AtomicU64::new(0),
            bucket_failures: AtomicU64::new(0),
            store_timeouts: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        }
    }

    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_apply(&self) {
        self.events_partially_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_apply_latency(&self, latency_us: u64) {
        if let Ok(mut window) = self.apply_latency_us.lock() {
            window.record(latency_us);
        }
    }

    pub fn record_bucket_created(&self) {
        self.buckets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_updated(&self) {
        self.buckets_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_duplicate(&self) {
        self.buckets_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_failure(&self, timed_out: bool) {
        self.bucket_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.store_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read_failure(&self, timed_out: bool) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.store_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (apply_p50_us, apply_p99_us) = match self.apply_latency_us.lock() {
            Ok(window) => (window.percentile(50), window.percentile(99)),
            Err(_) => (None, None),
        };
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_partially_applied: self.events_partially_applied.load(Ordering::Relaxed),
            buckets_created: self.buckets_created.load(Ordering::Relaxed),
            buckets_updated: self.buckets_updated.load(Ordering::Relaxed),
            buckets_duplicate: self.buckets_duplicate.load(Ordering::Relaxed),
            bucket_failures: self.bucket_failures.load(Ordering::Relaxed),
            store_timeouts: self.store_timeouts.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            apply_p50_us,
            apply_p99_us,
        }
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("events_received".to_string(), s.events_received);
        m.insert("events_rejected".to_string(), s.events_rejected);
        m.insert("events_partially_applied".to_string(), s.events_partially_applied);
        m.insert("buckets_created".to_string(), s.buckets_created);
        m.insert("buckets_updated".to_string(), s.buckets_updated);
        m.insert("buckets_duplicate".to_string(), s.buckets_duplicate);
        m.insert("bucket_failures".to_string(), s.bucket_failures);
        m.insert("store_timeouts".to_string(), s.store_timeouts);
        m.insert("read_failures".to_string(), s.read_failures);
        m
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`EngineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_rejected: u64,
    pub events_partially_applied: u64,
    pub buckets_created: u64,
    pub buckets_updated: u64,
    pub buckets_duplicate: u64,
    pub bucket_failures: u64,
    pub store_timeouts: u64,
    pub read_failures: u64,
    pub apply_p50_us: Option<u64>,
    pub apply_p99_us: Option<u64>,
}

/// Sliding window of the most recent apply latencies, in microseconds.
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    pub fn percentile(&self, p: u8) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let rank = (usize::from(p.min(100)) * sorted.len()).div_ceil(100);
        Some(sorted[rank.saturating_sub(1)])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
