use kube::ResourceExt;
use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

use crate::Error;

/// Prometheus metrics exposed on `/metrics`.
///
/// One instance is built per-process and shared (via `Arc`) across all four reconcilers; the
/// per-reconciler counters are keyed by a `controller` label rather than duplicated per struct,
/// since they are otherwise identical.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,

    /// `observability_operator_mimir_head_series_query_errors_total`
    pub mimir_head_series_query_errors: IntCounter,
    /// `observability_operator_grafana_organization_info{name,display_name,org_id,status}`
    pub grafana_organization_info: IntGaugeVec,
    /// `observability_operator_grafana_organization_tenants{name,org_id}`
    pub grafana_organization_tenants: IntGaugeVec,
    /// `observability_operator_alertmanager_routes{tenant}`
    pub alertmanager_routes: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "observability_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete, in seconds",
                vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]
            ),
            &["controller"],
        )
        .unwrap();

        let reconciliations = IntCounterVec::new(
            opts!(
                "observability_operator_reconciliations_total",
                "total reconciliations"
            ),
            &["controller"],
        )
        .unwrap();

        let failures = IntCounterVec::new(
            opts!(
                "observability_operator_reconciliation_errors_total",
                "total reconciliation errors"
            ),
            &["controller", "error"],
        )
        .unwrap();

        let mimir_head_series_query_errors = IntCounter::new(
            "observability_operator_mimir_head_series_query_errors_total",
            "total failures querying Mimir for head series",
        )
        .unwrap();

        let grafana_organization_info = IntGaugeVec::new(
            opts!(
                "observability_operator_grafana_organization_info",
                "metadata about a reconciled grafana organization, value is always 1"
            ),
            &["name", "display_name", "org_id", "status"],
        )
        .unwrap();

        let grafana_organization_tenants = IntGaugeVec::new(
            opts!(
                "observability_operator_grafana_organization_tenants",
                "number of tenants declared by a grafana organization"
            ),
            &["name", "org_id"],
        )
        .unwrap();

        let alertmanager_routes = IntGaugeVec::new(
            opts!(
                "observability_operator_alertmanager_routes",
                "number of top-level routes in the alertmanager config uploaded for a tenant"
            ),
            &["tenant"],
        )
        .unwrap();

        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            mimir_head_series_query_errors,
            grafana_organization_info,
            grafana_organization_tenants,
            alertmanager_routes,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> prometheus::Result<Self> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.mimir_head_series_query_errors.clone()))?;
        registry.register(Box::new(self.grafana_organization_info.clone()))?;
        registry.register(Box::new(self.grafana_organization_tenants.clone()))?;
        registry.register(Box::new(self.alertmanager_routes.clone()))?;
        Ok(self)
    }

    /// Start a timer for `controller` that records into `reconcile_duration` and increments
    /// `reconciliations` when dropped.
    pub fn count_and_measure(&self, controller: &str) -> prometheus::HistogramTimer {
        self.reconciliations.with_label_values(&[controller]).inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .start_timer()
    }

    pub fn reconcile_failure<K: ResourceExt>(&self, controller: &str, _object: &K, error: &Error) {
        self.failures
            .with_label_values(&[controller, &error.metric_label()])
            .inc();
    }

    /// Reset the per-organization gauges before a full re-emission (§4.7.d): vanished
    /// organizations must drop out rather than linger at their last value.
    pub fn reset_organization_gauges(&self) {
        self.grafana_organization_info.reset();
        self.grafana_organization_tenants.reset();
    }
}
