//! Metrics collection for observability
//!
//! These counters are exported for scraping only. The cache's own hit/miss
//! statistics live in [`crate::cache::stats`] and never read from here.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_histogram_with_registry, CounterVec, Encoder,
    Histogram, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::error;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Cache metrics
    pub cache_lookups: CounterVec,
    pub cache_writes: CounterVec,
    pub shared_cache_errors: CounterVec,
    pub cache_invalidations: CounterVec,

    // Context budget metrics
    pub context_tokens: Histogram,
    pub context_assemblies: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_lookups = register_counter_vec_with_registry!(
            Opts::new("cache_lookups_total", "Cache reads by kind and outcome"),
            &["kind", "outcome"],
            registry
        )?;

        let cache_writes = register_counter_vec_with_registry!(
            Opts::new("cache_writes_total", "Cache writes by kind and tier"),
            &["kind", "tier"],
            registry
        )?;

        let shared_cache_errors = register_counter_vec_with_registry!(
            Opts::new("shared_cache_errors_total", "Shared cache tier failures"),
            &["operation"],
            registry
        )?;

        let cache_invalidations = register_counter_vec_with_registry!(
            Opts::new("cache_invalidations_total", "Entries invalidated by scope"),
            &["scope"],
            registry
        )?;

        let context_tokens = register_histogram_with_registry!(
            "context_tokens",
            "Tokens used per assembled prompt, including the response reserve",
            vec![1_000.0, 4_000.0, 8_000.0, 16_000.0, 32_000.0, 64_000.0, 128_000.0],
            registry
        )?;

        let context_assemblies = register_counter_vec_with_registry!(
            Opts::new("context_assemblies_total", "Prompt assemblies by truncation outcome"),
            &["truncated"],
            registry
        )?;

        Ok(Self {
            registry,
            cache_lookups,
            cache_writes,
            shared_cache_errors,
            cache_invalidations,
            context_tokens,
            context_assemblies,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one cache read
    pub fn record_cache_lookup(&self, kind: &str, outcome: &str) {
        self.cache_lookups.with_label_values(&[kind, outcome]).inc();
    }

    /// Record one cache write
    pub fn record_cache_write(&self, kind: &str, tier: &str) {
        self.cache_writes.with_label_values(&[kind, tier]).inc();
    }

    pub fn record_shared_error(&self, operation: &str) {
        self.shared_cache_errors.with_label_values(&[operation]).inc();
    }

    pub fn record_invalidation(&self, scope: &str, entries: usize) {
        self.cache_invalidations
            .with_label_values(&[scope])
            .inc_by(entries as f64);
    }

    /// Record the size of an assembled prompt
    pub fn record_context_budget(&self, total_tokens: usize, truncated: bool) {
        self.context_tokens.observe(total_tokens as f64);
        let label = if truncated { "true" } else { "false" };
        self.context_assemblies.with_label_values(&[label]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}
