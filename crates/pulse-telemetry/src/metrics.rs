use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use ahash::AHashMap;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A label set is a sorted list of key=value pairs, used to distinguish
/// counter families (e.g. `kind="post_velocity"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Format labels as `{key="value",key2="value2"}` for text exposition.
    pub fn exposition_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Counter registry for the engine's observability hooks: push deliveries
/// and drops, emitted notifications, scheduler throughput, sweep sizes.
///
/// Thread-safe via a `RwLock` for registration and atomics for the hot
/// increment path.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), Arc<AtomicU64>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn inc(&self, name: &str, labels: Labels) {
        self.inc_by(name, labels, 1);
    }

    /// Increment a counter by `delta`.
    pub fn inc_by(&self, name: &str, labels: Labels, delta: u64) {
        let key = (name.to_string(), labels);
        {
            let counters = self.counters.read().expect("metrics lock poisoned");
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(delta, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of one counter (0 when never incremented).
    pub fn get(&self, name: &str, labels: &Labels) -> u64 {
        let counters = self.counters.read().expect("metrics lock poisoned");
        counters
            .get(&(name.to_string(), labels.clone()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every counter, sorted by name then labels.
    pub fn snapshot(&self) -> Vec<(String, Labels, u64)> {
        let counters = self.counters.read().expect("metrics lock poisoned");
        let mut out: Vec<(String, Labels, u64)> = counters
            .iter()
            .map(|((name, labels), value)| {
                (name.clone(), labels.clone(), value.load(Ordering::Relaxed))
            })
            .collect();
        out.sort_by(|a, b| (&a.0, &a.1 .0).cmp(&(&b.0, &b.1 .0)));
        out
    }

    /// Text exposition, one `name{labels} value` line per counter.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, labels, value) in self.snapshot() {
            out.push_str(&name);
            out.push_str(&labels.exposition_str());
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }
}

/// Process-wide collector the engine components record into.
pub fn global() -> &'static MetricsCollector {
    static GLOBAL: OnceLock<MetricsCollector> = OnceLock::new();
    GLOBAL.get_or_init(MetricsCollector::new)
}

// Counter names used across the crates.
pub const PUSH_DELIVERED_TOTAL: &str = "push_delivered_total";
pub const PUSH_DROPPED_TOTAL: &str = "push_dropped_total";
pub const NOTIFICATIONS_EMITTED_TOTAL: &str = "notifications_emitted_total";
pub const BATCHES_PROCESSED_TOTAL: &str = "batches_processed_total";
pub const BASELINE_SWEEP_USERS_TOTAL: &str = "baseline_sweep_users_total";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_and_get() {
        let metrics = MetricsCollector::new();
        let labels = Labels::new(&[("kind", "post_velocity")]);
        metrics.inc(NOTIFICATIONS_EMITTED_TOTAL, labels.clone());
        metrics.inc_by(NOTIFICATIONS_EMITTED_TOTAL, labels.clone(), 2);
        assert_eq!(metrics.get(NOTIFICATIONS_EMITTED_TOTAL, &labels), 3);
    }

    #[test]
    fn unknown_counter_reads_zero() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.get("nope", &Labels::empty()), 0);
    }

    #[test]
    fn labels_sort_and_format() {
        let labels = Labels::new(&[("b", "2"), ("a", "1")]);
        assert_eq!(labels.exposition_str(), "{a=\"1\",b=\"2\"}");
        assert_eq!(Labels::empty().exposition_str(), "");
    }

    #[test]
    fn label_order_does_not_split_families() {
        let metrics = MetricsCollector::new();
        metrics.inc("c", Labels::new(&[("a", "1"), ("b", "2")]));
        metrics.inc("c", Labels::new(&[("b", "2"), ("a", "1")]));
        assert_eq!(metrics.get("c", &Labels::new(&[("a", "1"), ("b", "2")])), 2);
    }

    #[test]
    fn render_lists_each_counter_once() {
        let metrics = MetricsCollector::new();
        metrics.inc(PUSH_DROPPED_TOTAL, Labels::empty());
        metrics.inc(PUSH_DELIVERED_TOTAL, Labels::empty());
        let text = metrics.render();
        assert!(text.contains("push_dropped_total 1\n"));
        assert!(text.contains("push_delivered_total 1\n"));
    }
}
