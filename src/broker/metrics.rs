use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Upper bounds, in seconds, of the session duration buckets.
pub const SESSION_DURATION_BUCKETS: [u64; 25] = [
    5, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 120, 140, 160, 180, 200, 250, 300, 400, 500, 600,
    700, 800, 900, 1000,
];

/// Broker-wide counters. Cheap to bump from any session or dispatch path.
#[derive(Debug, Default)]
pub struct Metrics {
    pub connected_sessions: AtomicU64,
    pub events_received: AtomicU64,
    pub events_pushed: AtomicU64,
    pub events_acked: AtomicU64,
    pub events_failed: AtomicU64,
    pub unknown_acks: AtomicU64,
    sent_by_event: DashMap<String, AtomicU64>,
    received_by_event: DashMap<String, AtomicU64>,
    session_duration: DurationHistogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// One event pushed into a session's queue.
    pub fn record_sent(&self, event: &str) {
        Self::incr(&self.events_pushed);
        bump(&self.sent_by_event, event);
    }

    /// One event accepted from a session for dispatch.
    pub fn record_received(&self, event: &str) {
        Self::incr(&self.events_received);
        bump(&self.received_by_event, event);
    }

    pub fn observe_session(&self, lifetime: Duration) {
        self.session_duration.observe(lifetime);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connected_sessions: self.connected_sessions.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_pushed: self.events_pushed.load(Ordering::Relaxed),
            events_acked: self.events_acked.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            unknown_acks: self.unknown_acks.load(Ordering::Relaxed),
            sent_by_event: collect(&self.sent_by_event),
            received_by_event: collect(&self.received_by_event),
            session_duration: self.session_duration.snapshot(),
        }
    }
}

fn bump(counters: &DashMap<String, AtomicU64>, event: &str) {
    if let Some(counter) = counters.get(event) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    counters
        .entry(event.to_string())
        .or_default()
        .fetch_add(1, Ordering::Relaxed);
}

fn collect(counters: &DashMap<String, AtomicU64>) -> BTreeMap<String, u64> {
    counters
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

/// Fixed-bucket histogram of session lifetimes. The last slot counts
/// observations above the largest bound.
#[derive(Debug)]
struct DurationHistogram {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_millis: AtomicU64,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self {
            buckets: (0..=SESSION_DURATION_BUCKETS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            count: AtomicU64::new(0),
            sum_millis: AtomicU64::new(0),
        }
    }
}

impl DurationHistogram {
    fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        let idx = SESSION_DURATION_BUCKETS
            .iter()
            .position(|&bound| secs <= bound as f64)
            .unwrap_or(SESSION_DURATION_BUCKETS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        self.sum_millis.fetch_add(millis, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = SESSION_DURATION_BUCKETS
            .iter()
            .zip(&self.buckets)
            .map(|(&le_seconds, slot)| {
                cumulative += slot.load(Ordering::Relaxed);
                BucketCount {
                    le_seconds,
                    count: cumulative,
                }
            })
            .collect();

        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_millis: self.sum_millis.load(Ordering::Relaxed),
            buckets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connected_sessions: u64,
    pub events_received: u64,
    pub events_pushed: u64,
    pub events_acked: u64,
    pub events_failed: u64,
    pub unknown_acks: u64,
    #[serde(default)]
    pub sent_by_event: BTreeMap<String, u64>,
    #[serde(default)]
    pub received_by_event: BTreeMap<String, u64>,
    #[serde(default)]
    pub session_duration: HistogramSnapshot,
}

/// Cumulative bucket counts, as in a Prometheus histogram. Observations
/// above the last bound only show up in `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_millis: u64,
    pub buckets: Vec<BucketCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub le_seconds: u64,
    pub count: u64,
}
