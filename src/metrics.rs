/// Metrics and telemetry for the Mojang API proxy
///
/// Prometheus-compatible counters for:
/// - Lookups by kind (name / profile)
/// - Cache hit/miss rates by kind
/// - Batches processed and names batched
/// - Upstream traffic, requests and errors
///
/// Counters are read and reset on a fixed cycle by the telemetry
/// report job (see `TelemetrySnapshot::collect_and_reset`).

use crate::error::{ProxyError, ProxyResult};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};
use serde::Serialize;

/// Label values for the two lookup kinds
pub const KIND_NAME: &str = "name";
pub const KIND_PROFILE: &str = "profile";

lazy_static! {
    // ========== Lookup Metrics ==========

    /// Identity lookups by kind
    pub static ref LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lookups_total",
        "Total number of identity lookups",
        &["kind"]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Cache hits by lookup kind
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_hits_total",
        "Total number of cache hits",
        &["kind"]
    )
    .unwrap();

    /// Cache misses by lookup kind
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_misses_total",
        "Total number of cache misses",
        &["kind"]
    )
    .unwrap();

    /// Cache size (number of entries)
    pub static ref CACHE_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "cache_size",
        "Number of entries in cache",
        &["kind"]
    )
    .unwrap();

    // ========== Batch Metrics ==========

    /// Batches dispatched upstream
    pub static ref BATCHES_TOTAL: IntCounter = register_int_counter!(
        "batches_total",
        "Total number of name batches dispatched"
    )
    .unwrap();

    /// Usernames carried by dispatched batches
    pub static ref BATCHED_NAMES_TOTAL: IntCounter = register_int_counter!(
        "batched_names_total",
        "Total number of usernames sent in batches"
    )
    .unwrap();

    // ========== Upstream Metrics ==========

    /// Upstream requests sent
    pub static ref UPSTREAM_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "upstream_requests_total",
        "Total number of requests sent to Mojang"
    )
    .unwrap();

    /// Upstream failures (non-2xx or transport)
    pub static ref UPSTREAM_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "upstream_errors_total",
        "Total number of failed requests to Mojang"
    )
    .unwrap();

    /// Request body bytes sent upstream
    pub static ref UPSTREAM_BYTES_SENT_TOTAL: IntCounter = register_int_counter!(
        "upstream_bytes_sent_total",
        "Total bytes sent to Mojang"
    )
    .unwrap();

    /// Response body bytes received from upstream
    pub static ref UPSTREAM_BYTES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "upstream_bytes_received_total",
        "Total bytes received from Mojang"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> ProxyResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ProxyError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ProxyError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

/// Record an identity lookup
pub fn record_lookup(kind: &str) {
    LOOKUPS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a cache access
pub fn record_cache_access(kind: &str, hit: bool) {
    if hit {
        CACHE_HITS_TOTAL.with_label_values(&[kind]).inc();
    } else {
        CACHE_MISSES_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Record current cache size
pub fn record_cache_size(kind: &str, entries: u64) {
    CACHE_SIZE
        .with_label_values(&[kind])
        .set(i64::try_from(entries).unwrap_or(i64::MAX));
}

/// Record a dispatched batch
pub fn record_batch(names: usize) {
    BATCHES_TOTAL.inc();
    BATCHED_NAMES_TOTAL.inc_by(names as u64);
}

/// Record an upstream exchange
///
/// `status` is `None` when the request failed at the transport level.
pub fn record_upstream_request(bytes_sent: usize, bytes_received: usize, status: Option<u16>) {
    UPSTREAM_REQUESTS_TOTAL.inc();
    UPSTREAM_BYTES_SENT_TOTAL.inc_by(bytes_sent as u64);
    UPSTREAM_BYTES_RECEIVED_TOTAL.inc_by(bytes_received as u64);

    let failed = match status {
        Some(code) => !(200..300).contains(&code),
        None => true,
    };
    if failed {
        UPSTREAM_ERRORS_TOTAL.inc();
    }
}

/// Point-in-time read of the telemetry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub name_lookups: u64,
    pub profile_lookups: u64,
    pub name_cache_hits: u64,
    pub name_cache_misses: u64,
    pub profile_cache_hits: u64,
    pub profile_cache_misses: u64,
    pub batches_processed: u64,
    pub names_batched: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub upstream_requests: u64,
    pub upstream_errors: u64,
}

impl TelemetrySnapshot {
    /// Read all counters
    pub fn collect() -> Self {
        Self {
            name_lookups: LOOKUPS_TOTAL.with_label_values(&[KIND_NAME]).get(),
            profile_lookups: LOOKUPS_TOTAL.with_label_values(&[KIND_PROFILE]).get(),
            name_cache_hits: CACHE_HITS_TOTAL.with_label_values(&[KIND_NAME]).get(),
            name_cache_misses: CACHE_MISSES_TOTAL.with_label_values(&[KIND_NAME]).get(),
            profile_cache_hits: CACHE_HITS_TOTAL.with_label_values(&[KIND_PROFILE]).get(),
            profile_cache_misses: CACHE_MISSES_TOTAL.with_label_values(&[KIND_PROFILE]).get(),
            batches_processed: BATCHES_TOTAL.get(),
            names_batched: BATCHED_NAMES_TOTAL.get(),
            bytes_sent: UPSTREAM_BYTES_SENT_TOTAL.get(),
            bytes_received: UPSTREAM_BYTES_RECEIVED_TOTAL.get(),
            upstream_requests: UPSTREAM_REQUESTS_TOTAL.get(),
            upstream_errors: UPSTREAM_ERRORS_TOTAL.get(),
        }
    }

    /// Read all counters and start a new reporting period
    pub fn collect_and_reset() -> Self {
        let snapshot = Self::collect();

        LOOKUPS_TOTAL.reset();
        CACHE_HITS_TOTAL.reset();
        CACHE_MISSES_TOTAL.reset();
        BATCHES_TOTAL.reset();
        BATCHED_NAMES_TOTAL.reset();
        UPSTREAM_BYTES_SENT_TOTAL.reset();
        UPSTREAM_BYTES_RECEIVED_TOTAL.reset();
        UPSTREAM_REQUESTS_TOTAL.reset();
        UPSTREAM_ERRORS_TOTAL.reset();

        snapshot
    }

    pub fn total_lookups(&self) -> u64 {
        self.name_lookups + self.profile_lookups
    }

    /// Hit rate across both caches, `None` when nothing was looked up
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.name_cache_hits + self.profile_cache_hits;
        let total = hits + self.name_cache_misses + self.profile_cache_misses;
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }

    pub fn average_batch_size(&self) -> Option<f64> {
        if self.batches_processed == 0 {
            None
        } else {
            Some(self.names_batched as f64 / self.batches_processed as f64)
        }
    }
}
