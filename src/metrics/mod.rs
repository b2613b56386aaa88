/*!
 * # Metrics Module
 *
 * This module provides a comprehensive metrics collection system for the MedCab API.
 * It exposes metrics for monitoring the health, performance, and usage of the API.
 *
 * ## Features
 *
 * - HTTP request/response metrics (count, latency, status codes)
 * - Database query performance metrics
 * - Business metrics (deltas, dispense units, claims, exceptions)
 *
 * ## Metrics Formats
 *
 * Metrics are exposed in the following formats:
 * - Prometheus text format at `/metrics`
 * - JSON format at `/metrics/json`
 */

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

// Simple in-memory metrics implementation
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
    #[error("Invalid metric name: {0}")]
    InvalidName(String),
    #[error("Metric not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set(&self, value: f64) {
        self.value.store(value as u64, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Relaxed) as f64
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Histogram {
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsRegistry {
    counters: Arc<DashMap<String, Counter>>,
    gauges: Arc<DashMap<String, Gauge>>,
    histograms: Arc<DashMap<String, Histogram>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            gauges: Arc::new(DashMap::new()),
            histograms: Arc::new(DashMap::new()),
        }
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_gauge(&self, name: &str) -> Gauge {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(Gauge::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    pub async fn export_metrics(&self) -> Result<String, MetricsError> {
        let mut output = String::new();

        // Export counters
        for entry in self.counters.iter() {
            let (name, counter) = entry.pair();
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, counter.get()));
        }

        // Export gauges
        for entry in self.gauges.iter() {
            let (name, gauge) = entry.pair();
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{} {}\n", name, gauge.get()));
        }

        // Export histograms
        for entry in self.histograms.iter() {
            let (name, histogram) = entry.pair();
            output.push_str(&format!("# TYPE {} histogram\n", name));
            output.push_str(&format!("{}_count {}\n", name, histogram.get_count()));
            output.push_str(&format!("{}_sum {}\n", name, histogram.get_sum()));
        }

        Ok(output)
    }

    pub async fn export_metrics_json(&self) -> Result<serde_json::Value, MetricsError> {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            let (name, counter) = entry.pair();
            counters.insert(name.to_string(), json!(counter.get()));
        }

        let mut gauges = serde_json::Map::new();
        for entry in self.gauges.iter() {
            let (name, gauge) = entry.pair();
            gauges.insert(name.to_string(), json!(gauge.get()));
        }

        let mut histograms = serde_json::Map::new();
        for entry in self.histograms.iter() {
            let (name, histogram) = entry.pair();
            histograms.insert(
                name.to_string(),
                json!({
                    "count": histogram.get_count(),
                    "sum": histogram.get_sum(),
                }),
            );
        }

        Ok(json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        }))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Global metrics registry
lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

// Metrics collection functions
pub fn increment_counter(name: &str) {
    METRICS.get_or_create_counter(name).inc();
}

pub fn increment_counter_by(name: &str, value: u64) {
    METRICS.get_or_create_counter(name).inc_by(value);
}

pub fn set_gauge(name: &str, value: f64) {
    METRICS.get_or_create_gauge(name).set(value);
}

pub fn observe_histogram(name: &str, value: f64) {
    METRICS.get_or_create_histogram(name).observe(value);
}

// Application-wide HTTP metrics
pub struct AppMetrics {
    pub requests_total: Counter,
    pub requests_duration: Histogram,
    pub database_connections: Gauge,
    pub errors_total: Counter,
    pub status_2xx: Counter,
    pub status_4xx: Counter,
    pub status_5xx: Counter,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: METRICS.get_or_create_counter("http_requests_total"),
            requests_duration: METRICS.get_or_create_histogram("http_request_duration_seconds"),
            database_connections: METRICS.get_or_create_gauge("database_connections_active"),
            errors_total: METRICS.get_or_create_counter("errors_total"),
            status_2xx: METRICS.get_or_create_counter("http_status_2xx_total"),
            status_4xx: METRICS.get_or_create_counter("http_status_4xx_total"),
            status_5xx: METRICS.get_or_create_counter("http_status_5xx_total"),
        }
    }

    pub fn record_request(&self, duration: Duration, status_code: u16) {
        self.requests_total.inc();
        self.requests_duration.observe(duration.as_secs_f64());

        match status_code {
            200..=299 => self.status_2xx.inc(),
            400..=499 => {
                self.status_4xx.inc();
                self.errors_total.inc();
            }
            500..=599 => {
                self.status_5xx.inc();
                self.errors_total.inc();
            }
            _ => {}
        }
    }

    pub fn set_database_connections(&self, count: u64) {
        self.database_connections.set(count as f64);
    }
}

// Reconciliation business metrics
pub struct BusinessMetrics {
    pub deltas_appended: Counter,
    pub deltas_rejected: Counter,
    pub units_dispensed: Counter,
    pub claims_applied: Counter,
    pub claims_rejected: Counter,
    pub claims_duplicate: Counter,
    pub exceptions_filed: Counter,
    pub reversals_filed: Counter,
    pub comparisons_recomputed: Counter,
    pub recompute_duration: Histogram,
    pub open_units: Gauge,
    pub unresolved_exceptions: Gauge,
}

impl BusinessMetrics {
    pub fn new() -> Self {
        Self {
            deltas_appended: METRICS.get_or_create_counter("deltas_appended_total"),
            deltas_rejected: METRICS.get_or_create_counter("deltas_rejected_total"),
            units_dispensed: METRICS.get_or_create_counter("units_dispensed_total"),
            claims_applied: METRICS.get_or_create_counter("claims_applied_total"),
            claims_rejected: METRICS.get_or_create_counter("claims_rejected_total"),
            claims_duplicate: METRICS.get_or_create_counter("claims_duplicate_total"),
            exceptions_filed: METRICS.get_or_create_counter("exceptions_filed_total"),
            reversals_filed: METRICS.get_or_create_counter("reversals_filed_total"),
            comparisons_recomputed: METRICS.get_or_create_counter("comparisons_recomputed_total"),
            recompute_duration: METRICS.get_or_create_histogram("recompute_duration_seconds"),
            open_units: METRICS.get_or_create_gauge("dispense_units_open"),
            unresolved_exceptions: METRICS.get_or_create_gauge("claim_exceptions_unresolved"),
        }
    }

    pub fn record_recompute(&self, duration: Duration) {
        self.comparisons_recomputed.inc();
        self.recompute_duration.observe(duration.as_secs_f64());
    }
}

// Database metrics for performance monitoring
pub struct DatabaseMetrics {
    pub queries_total: Counter,
    pub query_duration: Histogram,
    pub connections_active: Gauge,
    pub connections_idle: Gauge,
    pub connection_pool_size: Gauge,
    pub transactions_total: Counter,
    pub transaction_duration: Histogram,
    pub slow_queries: Counter,
    pub query_errors: Counter,
}

impl DatabaseMetrics {
    pub fn new() -> Self {
        Self {
            queries_total: METRICS.get_or_create_counter("db_queries_total"),
            query_duration: METRICS.get_or_create_histogram("db_query_duration_seconds"),
            connections_active: METRICS.get_or_create_gauge("db_connections_active"),
            connections_idle: METRICS.get_or_create_gauge("db_connections_idle"),
            connection_pool_size: METRICS.get_or_create_gauge("db_connection_pool_size"),
            transactions_total: METRICS.get_or_create_counter("db_transactions_total"),
            transaction_duration: METRICS
                .get_or_create_histogram("db_transaction_duration_seconds"),
            slow_queries: METRICS.get_or_create_counter("db_slow_queries_total"),
            query_errors: METRICS.get_or_create_counter("db_query_errors_total"),
        }
    }

    pub fn record_query(&self, duration: Duration) {
        self.queries_total.inc();
        self.query_duration.observe(duration.as_secs_f64());

        // Track slow queries (> 1 second)
        if duration.as_secs() >= 1 {
            self.slow_queries.inc();
        }
    }

    pub fn record_query_error(&self) {
        self.query_errors.inc();
    }

    pub fn record_transaction(&self, duration: Duration) {
        self.transactions_total.inc();
        self.transaction_duration.observe(duration.as_secs_f64());
    }

    pub fn set_connection_stats(&self, active: u64, idle: u64, pool_size: u64) {
        self.connections_active.set(active as f64);
        self.connections_idle.set(idle as f64);
        self.connection_pool_size.set(pool_size as f64);
    }
}

// Global instances
lazy_static::lazy_static! {
    pub static ref APP_METRICS: AppMetrics = AppMetrics::new();
    pub static ref BUSINESS_METRICS: BusinessMetrics = BusinessMetrics::new();
    pub static ref DATABASE_METRICS: DatabaseMetrics = DatabaseMetrics::new();
}

// Health check for metrics
pub async fn metrics_health_check() -> Result<(), MetricsError> {
    // Simple health check - just try to export metrics
    let _metrics = METRICS.export_metrics().await?;
    Ok(())
}

// Configuration for metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub export_endpoint: String,
    pub export_interval_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_endpoint: "/metrics".to_string(),
            export_interval_seconds: 60,
        }
    }
}

// HTTP endpoint handler for metrics
pub async fn metrics_handler() -> Result<String, MetricsError> {
    METRICS.export_metrics().await
}

pub async fn metrics_json_handler() -> Result<serde_json::Value, MetricsError> {
    METRICS.export_metrics_json().await
}

// Initialize metrics system
pub async fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    info!("Initializing metrics system");

    APP_METRICS.set_database_connections(0);
    BUSINESS_METRICS.open_units.set(0.0);
    BUSINESS_METRICS.unresolved_exceptions.set(0.0);

    info!("Metrics system initialized successfully");
    Ok(())
}

// Utility functions
pub fn get_metrics_summary() -> String {
    format!(
        "Requests: {}, Errors: {}, Deltas: {}, Units: {}, Claims applied: {}, Exceptions: {}",
        APP_METRICS.requests_total.get(),
        APP_METRICS.errors_total.get(),
        BUSINESS_METRICS.deltas_appended.get(),
        BUSINESS_METRICS.units_dispensed.get(),
        BUSINESS_METRICS.claims_applied.get(),
        BUSINESS_METRICS.exceptions_filed.get()
    )
}
