//! Dashboard reconciler (C4, spec.md §4.9).

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, ResourceExt,
};
use tracing::{field, info, instrument, warn, Span};

use crate::{resources::GrafanaOrganization, telemetry, Error, Result};

use super::{Context, State};

pub const FINALIZER: &str = "observability.giantswarm.io/dashboard";
const CONTROLLER_NAME: &str = "dashboard";
const LABEL_KIND: &str = "app.giantswarm.io/kind";
const KIND_DASHBOARD: &str = "dashboard";
const ORGANIZATION_KEY: &str = "observability.giantswarm.io/organization";

fn is_dashboard_configmap(cm: &ConfigMap) -> bool {
    cm.labels().get(LABEL_KIND).map(String::as_str) == Some(KIND_DASHBOARD)
}

/// Annotation wins over label for organization resolution (spec.md §3).
fn resolve_organization(cm: &ConfigMap) -> Option<String> {
    cm.annotations()
        .get(ORGANIZATION_KEY)
        .or_else(|| cm.labels().get(ORGANIZATION_KEY))
        .cloned()
}

/// Every `(filename, uid, dashboard_json_with_id_dropped)` entry found in the ConfigMap's `*.json`
/// values. Non-JSON, non-object, or uid-less entries are rejected by the admission webhook before
/// they can reach here (spec.md §4.9/§4.10), so this just extracts.
fn extract_dashboards(cm: &ConfigMap) -> Vec<(String, String, serde_json::Value)> {
    let Some(data) = &cm.data else { return Vec::new() };
    data.iter()
        .filter(|(k, _)| k.ends_with(".json"))
        .filter_map(|(k, v)| {
            let mut parsed: serde_json::Value = serde_json::from_str(v).ok()?;
            let obj = parsed.as_object_mut()?;
            obj.remove("id");
            let uid = obj.get("uid")?.as_str()?.to_string();
            if uid.is_empty() {
                return None;
            }
            Some((k.clone(), uid, parsed))
        })
        .collect()
}

#[instrument(skip(ctx, cm), fields(trace_id))]
async fn reconcile(cm: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    if !is_dashboard_configmap(&cm) {
        return Ok(Action::await_change());
    }

    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let namespace = cm.namespace().unwrap_or_else(|| "default".to_string());
    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling dashboard configmap \"{namespace}/{}\"", cm.name_any());
    finalizer(&configmaps, FINALIZER, cm, |event| async {
        match event {
            Finalizer::Apply(cm) => apply(cm, ctx.clone()).await,
            Finalizer::Cleanup(cm) => cleanup(cm, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply(cm: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action> {
    let organization_name = resolve_organization(&cm).ok_or_else(|| {
        Error::IllegalDashboard(cm.name_any(), "no organization label or annotation".into())
    })?;

    let orgs: Api<GrafanaOrganization> = Api::all(ctx.client.clone());
    let org = orgs
        .list(&Default::default())
        .await?
        .into_iter()
        .find(|o| o.spec.display_name == organization_name);

    let Some(org) = org else {
        warn!("organization \"{organization_name}\" not found for dashboard configmap, requeuing");
        return Ok(Action::requeue(Duration::from_secs(30)));
    };
    let org_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);
    if org_id == 0 {
        warn!("organization \"{organization_name}\" not yet created in grafana, requeuing");
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    let grafana = super::grafana_client(&ctx).await?.with_org_id(org_id);
    for (_, _, dashboard) in extract_dashboards(&cm) {
        grafana.upsert_dashboard(dashboard).await?;
    }

    Ok(Action::requeue(Duration::from_secs(300)))
}

async fn cleanup(cm: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(organization_name) = resolve_organization(&cm) {
        let orgs: Api<GrafanaOrganization> = Api::all(ctx.client.clone());
        if let Ok(list) = orgs.list(&Default::default()).await {
            if let Some(org) = list.into_iter().find(|o| o.spec.display_name == organization_name) {
                let org_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);
                if org_id > 0 {
                    if let Ok(grafana) = super::grafana_client(&ctx).await {
                        let grafana = grafana.with_org_id(org_id);
                        for (_, uid, _) in extract_dashboards(&cm) {
                            let _ = grafana.delete_dashboard(&uid).await;
                        }
                    }
                }
            }
        }
    }

    Ok(Action::await_change())
}

fn error_policy(cm: Arc<ConfigMap>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("dashboard reconcile failed: {error:?}");
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &*cm, error);
    Action::requeue(Duration::from_secs(60))
}

pub async fn run(client: Client, state: State, config: Arc<crate::config::Config>) {
    let configmaps = Api::<ConfigMap>::all(client.clone());
    Controller::new(configmaps, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, config))
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cm_with(data: Vec<(&str, &str)>, labels: Vec<(&str, &str)>, annotations: Vec<(&str, &str)>) -> ConfigMap {
        ConfigMap {
            metadata: kube::core::ObjectMeta {
                name: Some("dash".into()),
                labels: Some(labels.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                annotations: Some(annotations.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            data: Some(data.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()),
            ..Default::default()
        }
    }

    #[test]
    fn annotation_wins_over_label_for_organization() {
        let cm = cm_with(
            vec![],
            vec![(ORGANIZATION_KEY, "label-org")],
            vec![(ORGANIZATION_KEY, "annotation-org")],
        );
        assert_eq!(resolve_organization(&cm), Some("annotation-org".to_string()));
    }

    #[test]
    fn extracts_and_strips_id_field() {
        let cm = cm_with(
            vec![("dash.json", r#"{"id": 42, "uid": "abc", "title": "t"}"#)],
            vec![],
            vec![],
        );
        let dashboards = extract_dashboards(&cm);
        assert_eq!(dashboards.len(), 1);
        assert_eq!(dashboards[0].1, "abc");
        assert!(dashboards[0].2.get("id").is_none());
    }

    #[test]
    fn identifies_dashboard_configmaps_by_label() {
        let cm = cm_with(vec![], vec![(LABEL_KIND, KIND_DASHBOARD)], vec![]);
        assert!(is_dashboard_configmap(&cm));
        let not_dash = cm_with(vec![], vec![], vec![]);
        assert!(!is_dashboard_configmap(&not_dash));
    }
}
