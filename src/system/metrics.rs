//! Metrics collection for persistence and versioning
//!
//! Counters live in a crate-private Prometheus registry so that embedding
//! applications can expose them next to their own metrics without name
//! clashes in the default registry.

use crate::core::Result;
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::time::Instant;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Persistence pipeline metrics
pub struct PersistenceMetrics {
    /// Completed flushes that wrote at least one unit
    pub flushes: IntCounter,
    /// Units written
    pub units_saved: IntCounter,
    /// Flushes aborted by a serializer error
    pub flush_failures: IntCounter,
    /// Fragment units created by the splitter
    pub unit_splits: IntCounter,
}

/// Commit/update protocol metrics
pub struct VersioningMetrics {
    /// Successful commits
    pub commits: IntCounter,
    /// Commits rejected with a version conflict
    pub conflicts: IntCounter,
    /// Completed updates
    pub updates: IntCounter,
    /// Server deltas applied locally
    pub deltas_applied: IntCounter,
    /// Local operations dropped while replaying after an update
    pub local_operations_dropped: IntCounter,
    /// Duration of commit and update round trips in seconds
    pub round_trip_duration: Histogram,
}

/// Centralized metrics collection
pub struct Metrics {
    /// Persistence metrics
    pub persistence: PersistenceMetrics,
    /// Versioning metrics
    pub versioning: VersioningMetrics,
}

impl Metrics {
    /// Create and register every metric
    pub fn new() -> Result<Self> {
        Ok(Self {
            persistence: PersistenceMetrics::new()?,
            versioning: VersioningMetrics::new()?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
        &INSTANCE
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    REGISTRY.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PersistenceMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            flushes: counter("vg_flushes_total", "Total number of flushes that wrote units")?,
            units_saved: counter("vg_units_saved_total", "Total number of units written")?,
            flush_failures: counter("vg_flush_failures_total", "Total number of failed flushes")?,
            unit_splits: counter("vg_unit_splits_total", "Total number of fragment units created")?,
        })
    }
}

impl VersioningMetrics {
    fn new() -> Result<Self> {
        let round_trip_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vg_round_trip_duration_seconds",
                "Duration of commit and update round trips in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        REGISTRY.register(Box::new(round_trip_duration.clone()))?;

        Ok(Self {
            commits: counter("vg_commits_total", "Total number of successful commits")?,
            conflicts: counter("vg_conflicts_total", "Total number of commits rejected as out of date")?,
            updates: counter("vg_updates_total", "Total number of completed updates")?,
            deltas_applied: counter("vg_deltas_applied_total", "Total number of server deltas applied")?,
            local_operations_dropped: counter(
                "vg_local_operations_dropped_total",
                "Total number of local operations dropped during update replay",
            )?,
            round_trip_duration,
        })
    }
}

/// Timer recording into a histogram when finished
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Initialize the metrics registry by creating the global metrics instance
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Registry holding every crate metric
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect all metrics in the Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
