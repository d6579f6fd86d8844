// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

/// Prometheus metrics definitions for s3gate
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // Backing Store Metrics
    // ============================================================================

    /// Backing-store call outcomes; failed and failed_to_launch stay separate
    pub static ref KVS_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "kvs_operations_total",
        "Total backing-store calls by outcome",
        &["operation", "outcome"]
    ).unwrap();

    // ============================================================================
    // Metadata Metrics
    // ============================================================================

    /// Create attempts that reported "already exists"
    pub static ref METADATA_COLLISIONS_TOTAL: CounterVec = register_counter_vec!(
        "metadata_collisions_total",
        "Index name collisions seen while creating metadata",
        &["entity"]
    ).unwrap();

    /// Records that gave up after the collision retry budget ran out
    pub static ref METADATA_COLLISION_EXHAUSTED_TOTAL: CounterVec = register_counter_vec!(
        "metadata_collision_exhausted_total",
        "Metadata creates that exhausted the collision retry budget",
        &["entity"]
    ).unwrap();

    /// Best-effort replica writes that failed
    pub static ref METADATA_REPLICA_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "metadata_replica_failures_total",
        "Replica index writes that failed",
        &["entity", "operation"]
    ).unwrap();

    // ============================================================================
    // Action Metrics
    // ============================================================================

    /// Final outcome per action
    pub static ref ACTION_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "action_outcomes_total",
        "Actions finished by outcome",
        &["action", "outcome"]
    ).unwrap();

    /// Start to response, in seconds
    pub static ref STEP_DURATION: HistogramVec = register_histogram_vec!(
        "step_duration_seconds",
        "Action duration from start to response in seconds",
        &["action"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    ).unwrap();

    /// Actions intercepted by graceful shutdown
    pub static ref SHUTDOWN_INTERCEPTIONS_TOTAL: CounterVec = register_counter_vec!(
        "shutdown_interceptions_total",
        "Actions intercepted by shutdown",
        &["path"]
    ).unwrap();

    // ============================================================================
    // Authentication Metrics
    // ============================================================================

    /// Authentication/authorization failures by client-visible code
    pub static ref AUTH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "auth_failures_total",
        "Authentication and authorization failures",
        &["code"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a backing-store outcome
pub fn record_kvs_op(operation: &str, outcome: &str) {
    KVS_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn increment_collision(entity: &str) {
    METADATA_COLLISIONS_TOTAL.with_label_values(&[entity]).inc();
}

pub fn increment_collision_exhausted(entity: &str) {
    METADATA_COLLISION_EXHAUSTED_TOTAL
        .with_label_values(&[entity])
        .inc();
}

pub fn increment_replica_failure(entity: &str, operation: &str) {
    METADATA_REPLICA_FAILURES_TOTAL
        .with_label_values(&[entity, operation])
        .inc();
}

/// Record how an action ended and how long it took
pub fn record_action_outcome(action: &str, outcome: &str, duration: f64) {
    ACTION_OUTCOMES_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
    STEP_DURATION.with_label_values(&[action]).observe(duration);
}

pub fn increment_shutdown_interception(path: &str) {
    SHUTDOWN_INTERCEPTIONS_TOTAL
        .with_label_values(&[path])
        .inc();
}

pub fn increment_auth_failure(code: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[code]).inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    buffer
}

/// Same as [`gather_metrics`], ready to print
pub fn gather_metrics_text() -> String {
    String::from_utf8_lossy(&gather_metrics()).into_owned()
}
