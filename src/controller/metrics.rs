//! Prometheus metrics for the KubeNova operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `kubenova_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `kubenova_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `kubenova_status_conflicts_total` (counter): status writes rejected with a stale resource version.
//! - `kubenova_dependent_writes_total` (counter): writes to owned objects labeled by kind and op.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "kubenova"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Controller name, e.g. "kubenova"
    pub controller: String,
    /// Error kind/category, e.g. "kube", "validation", "conflict"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteLabels {
    /// Object kind, e.g. "Deployment"
    pub kind: String,
    /// "create", "update" or "delete"
    pub op: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking status writes that hit a version conflict
pub static STATUS_CONFLICTS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

/// Counter tracking writes to dependent objects
pub static DEPENDENT_WRITES_TOTAL: Lazy<Family<WriteLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
///
/// Counter names are registered without the `_total` suffix; the encoder adds it.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "kubenova_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "kubenova_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "kubenova_status_conflicts",
        "Total number of status writes rejected with a stale resource version",
        STATUS_CONFLICTS_TOTAL.clone(),
    );
    registry.register(
        "kubenova_dependent_writes",
        "Total number of writes to objects owned by a KubeNova",
        DEPENDENT_WRITES_TOTAL.clone(),
    );
    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_status_conflict() {
    STATUS_CONFLICTS_TOTAL.inc();
}

pub fn inc_dependent_write(kind: &str, op: &str) {
    let labels = WriteLabels {
        kind: kind.to_string(),
        op: op.to_string(),
    };
    DEPENDENT_WRITES_TOTAL.get_or_create(&labels).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_observe_reconcile_duration() {
        observe_reconcile_duration_seconds("kubenova", 0.25);
        // Function should not panic
    }

    #[test]
    fn test_registry_exports_operator_metrics() {
        inc_reconcile_error("kubenova", "validation");
        inc_status_conflict();
        inc_dependent_write("Deployment", "create");

        let mut out = String::new();
        encode(&mut out, &REGISTRY).unwrap();
        assert!(out.contains("kubenova_reconcile_errors_total"));
        assert!(out.contains("kubenova_status_conflicts_total"));
        assert!(out.contains(r#"kubenova_dependent_writes_total{kind="Deployment",op="create"}"#));
    }
}
