//! Performance metrics with rolling averages.
//!
//! Metrics are explicit state owned by the engine instance (and by the
//! embedding generator for its latency window) - there is no global
//! collector. Samples age out of a rolling time window; lifetime totals are
//! kept separately.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Window for embedding latency samples.
const LATENCY_WINDOW_SECS: u64 = 60;

/// Window for search phase samples. Searches are less frequent than
/// embeddings, so the window is longer.
const SEARCH_WINDOW_SECS: u64 = 300;

/// Maximum samples kept per metric.
const MAX_SAMPLES: usize = 1_000;

/// Per-query timing records kept for later retrieval.
const TIMINGS_HISTORY: usize = 100;

#[derive(Clone, Debug)]
struct TimingSample {
    timestamp: Instant,
    duration_ms: f64,
}

/// Rolling statistics for a single metric.
#[derive(Debug, Default)]
struct MetricData {
    samples: VecDeque<TimingSample>,
    total_count: u64,
    total_duration_ms: f64,
}

impl MetricData {
    fn record(&mut self, duration_ms: f64) {
        self.total_count += 1;
        self.total_duration_ms += duration_ms;
        self.samples.push_back(TimingSample {
            timestamp: Instant::now(),
            duration_ms,
        });
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn prune(&mut self, window: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(window) else {
            return;
        };
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn rolling_avg(&self, window: Duration) -> Option<f64> {
        let cutoff = Instant::now().checked_sub(window);
        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in &self.samples {
            if cutoff.is_none_or(|c| sample.timestamp >= c) {
                sum += sample.duration_ms;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }

    fn rolling_count(&self, window: Duration) -> usize {
        let cutoff = Instant::now().checked_sub(window);
        self.samples
            .iter()
            .filter(|s| cutoff.is_none_or(|c| s.timestamp >= c))
            .count()
    }
}

/// Rolling latency window for the embedding generator's health heuristic.
///
/// Thread-safe; `record` is called from concurrent embed paths and the
/// background monitor prunes it.
#[derive(Debug, Default)]
pub struct LatencyWindow {
    inner: Mutex<MetricData>,
}

impl LatencyWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample in milliseconds.
    pub fn record(&self, duration_ms: f64) {
        self.lock().record(duration_ms);
    }

    /// Rolling average over the last 60 seconds.
    pub fn average(&self) -> Option<f64> {
        self.lock().rolling_avg(Duration::from_secs(LATENCY_WINDOW_SECS))
    }

    /// Samples currently inside the window.
    pub fn count(&self) -> usize {
        self.lock()
            .rolling_count(Duration::from_secs(LATENCY_WINDOW_SECS))
    }

    /// Total samples ever recorded.
    pub fn total_count(&self) -> u64 {
        self.lock().total_count
    }

    /// Drops samples that have aged out of the window.
    pub fn prune(&self) {
        self.lock().prune(Duration::from_secs(LATENCY_WINDOW_SECS));
    }

    /// Resets the window and the lifetime totals.
    pub fn clear(&self) {
        *self.lock() = MetricData::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timing breakdown of a single search call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchTimings {
    /// Identifier assigned to this search call
    pub query_id: u64,
    /// Strategy that actually executed (`semantic`/`lexical`/`hybrid`/`error`)
    pub strategy: String,
    /// Query analysis time in milliseconds
    pub analysis_ms: f64,
    /// Semantic branch time (embed + similarity scan)
    pub semantic_ms: f64,
    /// Lexical branch time (sanitize + index query)
    pub lexical_ms: f64,
    /// Score fusion time
    pub fusion_ms: f64,
    /// Result slicing, highlight and explanation assembly time
    pub formatting_ms: f64,
    /// End-to-end time
    pub total_ms: f64,
    /// Results returned to the caller
    pub result_count: usize,
}

/// Snapshot of rolling search metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Average analysis time over the window
    pub analysis_avg_ms: Option<f64>,
    /// Average semantic branch time over the window
    pub semantic_avg_ms: Option<f64>,
    /// Average lexical branch time over the window
    pub lexical_avg_ms: Option<f64>,
    /// Average fusion time over the window
    pub fusion_avg_ms: Option<f64>,
    /// Average end-to-end search time over the window
    pub total_avg_ms: Option<f64>,
    /// Searches inside the rolling window
    pub query_count: usize,
    /// Searches since startup
    pub lifetime_query_count: u64,
}

#[derive(Default)]
struct MetricsInner {
    analysis: MetricData,
    semantic: MetricData,
    lexical: MetricData,
    fusion: MetricData,
    formatting: MetricData,
    total: MetricData,
    recent: VecDeque<SearchTimings>,
}

/// Search metrics collector owned by one engine instance.
///
/// Recording failures must never block a search from returning results, so
/// lock poisoning is absorbed rather than propagated.
#[derive(Default)]
pub struct PerformanceMetrics {
    inner: RwLock<MetricsInner>,
}

impl PerformanceMetrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the timing breakdown of a completed search.
    pub fn record_search(&self, timings: SearchTimings) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        inner.analysis.record(timings.analysis_ms);
        inner.semantic.record(timings.semantic_ms);
        inner.lexical.record(timings.lexical_ms);
        inner.fusion.record(timings.fusion_ms);
        inner.formatting.record(timings.formatting_ms);
        inner.total.record(timings.total_ms);
        inner.recent.push_back(timings);
        while inner.recent.len() > TIMINGS_HISTORY {
            inner.recent.pop_front();
        }
    }

    /// Retrieves the timing breakdown recorded for a query id, if it is
    /// still in the bounded history.
    pub fn search_timings(&self, query_id: u64) -> Option<SearchTimings> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .recent
            .iter()
            .find(|t| t.query_id == query_id)
            .cloned()
    }

    /// Snapshot of rolling averages for display or logging.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let window = Duration::from_secs(SEARCH_WINDOW_SECS);
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            analysis_avg_ms: inner.analysis.rolling_avg(window),
            semantic_avg_ms: inner.semantic.rolling_avg(window),
            lexical_avg_ms: inner.lexical.rolling_avg(window),
            fusion_avg_ms: inner.fusion.rolling_avg(window),
            total_avg_ms: inner.total.rolling_avg(window),
            query_count: inner.total.rolling_count(window),
            lifetime_query_count: inner.total.total_count,
        }
    }

    /// Drops samples outside the rolling window.
    pub fn prune(&self) {
        let window = Duration::from_secs(SEARCH_WINDOW_SECS);
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        inner.analysis.prune(window);
        inner.semantic.prune(window);
        inner.lexical.prune(window);
        inner.fusion.prune(window);
        inner.formatting.prune(window);
        inner.total.prune(window);
    }

    /// Resets all samples and totals.
    pub fn clear(&self) {
        *self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = MetricsInner::default();
    }
}
