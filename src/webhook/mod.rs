//! Admission webhooks and CRD conversion (spec.md §4.10).
//!
//! Three validating webhooks share the manager's `axum` server, TLS material, and Kubernetes
//! client; they enforce only what the CRD's OpenAPI schema cannot (spec.md §9 "Webhook suite vs.
//! CRD schema") by inspecting the raw admitted object rather than generating typed clients for
//! each resource. The CRD conversion webhook (`/convert`) hand-rolls the
//! `apiextensions.k8s.io/v1` `ConversionReview` wire format, since `kube`'s `admission` module
//! only models `AdmissionReview`, not CRD conversion review.

pub mod alertmanager_config;
pub mod conversion;
pub mod dashboard;
pub mod grafana_organization;

use std::sync::Arc;

use axum::{routing::post, Router};
use kube::Client;

/// Shared state for the webhook handlers. Deliberately just the client: every cross-object check
/// (tenant uniqueness, organization existence) reads the latest API state rather than caching
/// anything webhook-side, per spec.md §5.
#[derive(Clone)]
pub struct WebhookContext {
    pub client: Client,
}

/// Build the webhook routes, mounted on the webhook TLS listener unless `ENABLE_WEBHOOKS=false`
/// disables webhook setup entirely (spec.md §6).
pub fn router(client: Client) -> Router {
    Router::new()
        .route(
            "/validate-grafana-organization",
            post(grafana_organization::validate),
        )
        .route("/validate-dashboard-configmap", post(dashboard::validate))
        .route(
            "/validate-alertmanager-config",
            post(alertmanager_config::validate),
        )
        .route("/convert", post(conversion::convert))
        .with_state(Arc::new(WebhookContext { client }))
}
