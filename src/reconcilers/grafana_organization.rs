//! Grafana-organization reconciler (C2, spec.md §4.7).

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, ResourceExt,
};
use tracing::{field, info, instrument, warn, Span};

use crate::{
    credentials::CredentialManager,
    grafana::{types::Datasource, GrafanaClient},
    resources::{
        GrafanaOrganization, OrganizationRBAC, RbacRole, RESERVED_ORGANIZATION_ID,
        RESERVED_ORGANIZATION_NAME,
    },
    telemetry, Error, Metrics, Result,
};

use super::{Context, State};

pub const FINALIZER: &str = "observability.giantswarm.io/grafana-organization";
const CONTROLLER_NAME: &str = "grafana_organization";
const LEGACY_DATASOURCE: &str = "gs-mimir-old";
const SSO_PROVIDER: &str = "generic_oauth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatasourceKind {
    Mimir,
    MimirCardinality,
    Loki,
    Tempo,
    Alertmanager,
}

impl DatasourceKind {
    const ALL: [DatasourceKind; 5] = [
        DatasourceKind::Mimir,
        DatasourceKind::MimirCardinality,
        DatasourceKind::Loki,
        DatasourceKind::Tempo,
        DatasourceKind::Alertmanager,
    ];

    fn name(&self, tenant: &str) -> String {
        let suffix = match self {
            DatasourceKind::Mimir => "mimir",
            DatasourceKind::MimirCardinality => "mimir-cardinality",
            DatasourceKind::Loki => "loki",
            DatasourceKind::Tempo => "tempo",
            DatasourceKind::Alertmanager => "alertmanager",
        };
        format!("{tenant}-{suffix}")
    }

    fn type_(&self) -> &'static str {
        match self {
            DatasourceKind::Mimir | DatasourceKind::MimirCardinality => "prometheus",
            DatasourceKind::Loki => "loki",
            DatasourceKind::Tempo => "tempo",
            DatasourceKind::Alertmanager => "alertmanager",
        }
    }

    fn enabled(&self, logging_enabled: bool, tracing_enabled: bool) -> bool {
        match self {
            DatasourceKind::Loki => logging_enabled,
            DatasourceKind::Tempo => tracing_enabled,
            _ => true,
        }
    }

    fn url(&self, ctx: &Context, tenant: &str) -> String {
        match self {
            DatasourceKind::Mimir | DatasourceKind::MimirCardinality => {
                ctx.config.monitoring.monitoring_metrics_query_url.clone()
            }
            DatasourceKind::Loki => format!(
                "http://loki-gateway.loki.svc/loki/api/v1/query_range?tenant={tenant}"
            ),
            DatasourceKind::Tempo => "http://tempo-gateway.tempo.svc".to_string(),
            DatasourceKind::Alertmanager => ctx.config.monitoring.alertmanager_url.clone(),
        }
    }
}

fn desired_datasource(kind: DatasourceKind, ctx: &Context, tenant: &str, password: &str) -> Datasource {
    Datasource {
        uid: None,
        id: None,
        name: kind.name(tenant),
        type_: kind.type_().to_string(),
        url: kind.url(ctx, tenant),
        access: "proxy".to_string(),
        basic_auth: true,
        basic_auth_user: Some(tenant.to_string()),
        secure_json_data: Some(serde_json::json!({
            "basicAuthPassword": password,
            "httpHeaderValue1": tenant,
        })),
        json_data: Some(serde_json::json!({ "httpHeaderName1": "X-Scope-OrgID" })),
        is_default: false,
    }
}

/// Diff desired against existing datasources by name: create missing, update changed, delete
/// stale (spec.md §4.7.b). The legacy `gs-mimir-old` datasource is always removed if present.
async fn reconcile_datasources(
    grafana: &GrafanaClient,
    org: &GrafanaOrganization,
    ctx: &Context,
    credentials: &CredentialManager,
) -> Result<()> {
    let primary_tenant = org
        .spec
        .tenants
        .first()
        .map(|t| t.name.clone())
        .unwrap_or_else(|| org.name_any());

    let mut desired = Vec::new();
    for kind in DatasourceKind::ALL {
        if !kind.enabled(ctx.config.logging.logging_enabled, ctx.config.logging.tracing_enabled) {
            continue;
        }
        let password = credentials.get_or_create_cluster_password(&primary_tenant).await?;
        desired.push(desired_datasource(kind, ctx, &primary_tenant, &password));
    }

    let current = grafana.list_datasources().await?;

    if let Some(legacy) = current.iter().find(|d| d.name == LEGACY_DATASOURCE) {
        if let Some(uid) = &legacy.uid {
            grafana.delete_datasource(uid).await?;
        }
    }

    for wanted in &desired {
        match current.iter().find(|d| d.name == wanted.name) {
            None => {
                grafana.create_datasource(wanted).await?;
            }
            Some(existing) => {
                if existing.url != wanted.url || existing.type_ != wanted.type_ {
                    if let Some(uid) = &existing.uid {
                        grafana.update_datasource(uid, wanted).await?;
                    }
                }
            }
        }
    }

    let wanted_names: std::collections::HashSet<&str> =
        desired.iter().map(|d| d.name.as_str()).collect();
    for stale in current
        .iter()
        .filter(|d| d.name != LEGACY_DATASOURCE && !wanted_names.contains(d.name.as_str()))
    {
        if let Some(uid) = &stale.uid {
            grafana.delete_datasource(uid).await?;
        }
    }

    Ok(())
}

/// Rebuild the installation-wide SSO `org_mapping` from every non-deleting organization
/// (spec.md §4.7.c).
async fn rebuild_sso_mapping(grafana: &GrafanaClient, client: &Client) -> Result<()> {
    let orgs: Api<GrafanaOrganization> = Api::all(client.clone());
    let list = orgs.list(&Default::default()).await?;

    let mut lines = Vec::new();
    for org in list.into_iter().filter(|o| o.meta().deletion_timestamp.is_none()) {
        let org_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);
        if org_id == 0 {
            continue;
        }
        for (group, role) in org.spec.rbac.entries() {
            lines.push(format!("\"{group}\":{org_id}:{}", role_name(role)));
        }
    }

    let mut settings = grafana.get_sso_settings(SSO_PROVIDER).await?;
    settings.set_org_mapping(&lines);
    grafana.update_sso_settings(SSO_PROVIDER, &settings).await
}

fn role_name(role: RbacRole) -> &'static str {
    match role {
        RbacRole::Admin => "Admin",
        RbacRole::Editor => "Editor",
        RbacRole::Viewer => "Viewer",
    }
}

/// Reconcile organization identity: confirm/adopt/create, write-through `status.orgID`
/// (spec.md §4.7.a).
async fn reconcile_identity(grafana: &GrafanaClient, org: &GrafanaOrganization) -> Result<i64> {
    let current_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);

    if current_id > 0 {
        if let Some(existing) = grafana.get_organization_by_id(current_id).await? {
            if existing.name != org.spec.display_name {
                grafana.update_organization(current_id, &org.spec.display_name).await?;
            }
            return Ok(current_id);
        }
    }

    if let Some(existing) = grafana.get_organization_by_name(&org.spec.display_name).await? {
        return Ok(existing.id);
    }

    grafana.create_organization(&org.spec.display_name).await
}

#[instrument(skip(ctx, org), fields(trace_id))]
async fn reconcile(org: Arc<GrafanaOrganization>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let orgs: Api<GrafanaOrganization> = Api::all(ctx.client.clone());

    info!("Reconciling grafana organization \"{}\"", org.name_any());
    finalizer(&orgs, FINALIZER, org, |event| async {
        match event {
            Finalizer::Apply(org) => apply(org, ctx.clone()).await,
            Finalizer::Cleanup(org) => cleanup(org, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply(org: Arc<GrafanaOrganization>, ctx: Arc<Context>) -> Result<Action> {
    if org.spec.display_name == RESERVED_ORGANIZATION_NAME {
        let current_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);
        if current_id != 0 && current_id != RESERVED_ORGANIZATION_ID {
            return Err(Error::IllegalGrafanaOrganization(
                org.name_any(),
                format!("display name collides with the reserved organization (id={RESERVED_ORGANIZATION_ID})"),
            ));
        }
    }

    let grafana = super::grafana_client(&ctx).await?;
    let org_id = reconcile_identity(&grafana, &org).await?;

    let org_scoped = grafana.with_org_id(org_id);
    let credentials = CredentialManager::new(ctx.client.clone(), ctx.config.operator.operator_namespace.clone());
    reconcile_datasources(&org_scoped, &org, &ctx, &credentials).await?;
    rebuild_sso_mapping(&grafana, &ctx.client).await?;

    let orgs: Api<GrafanaOrganization> = Api::all(ctx.client.clone());
    let status = serde_json::json!({
        "status": {
            "orgID": org_id,
            "datasources": [],
            "conditions": [{
                "type": "Ready",
                "status": "True",
                "reason": "ReconcileSucceeded",
                "message": "organization reconciled",
            }],
        }
    });
    orgs.patch_status(
        &org.name_any(),
        &PatchParams::apply("observability-operator").force(),
        &Patch::Merge(status),
    )
    .await?;

    // Reset before re-emitting so an org whose id changed (e.g. via an adoption race) doesn't
    // leave a stale `grafana_organization_info{org_id=<old>}` series behind (spec.md §4.7.d).
    ctx.metrics.reset_organization_gauges();
    emit_metrics(&ctx, &org, org_id, "active");

    Ok(Action::requeue(Duration::from_secs(300)))
}

fn emit_metrics(ctx: &Context, org: &GrafanaOrganization, org_id: i64, status: &str) {
    let name = org.name_any();
    let org_id_label = org_id.to_string();
    ctx.metrics
        .grafana_organization_info
        .with_label_values(&[&name, &org.spec.display_name, &org_id_label, status])
        .set(1);
    ctx.metrics
        .grafana_organization_tenants
        .with_label_values(&[&name, &org_id_label])
        .set(org.spec.tenants.len() as i64);
}

async fn cleanup(org: Arc<GrafanaOrganization>, ctx: Arc<Context>) -> Result<Action> {
    let org_id = org.status.as_ref().map(|s| s.org_id).unwrap_or(0);
    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), &*org);

    if org_id == RESERVED_ORGANIZATION_ID {
        // Deleting the CR that targets the reserved organization (id=1, "Shared Org") never
        // deletes the organization itself, mirroring Grafana's own refusal to remove org 1. This
        // is an expected, terminal outcome: the finalizer is still released (by returning `Ok`
        // from this closure) rather than retried forever (DESIGN.md "Open Questions" #2).
        recorder
            .publish(kube::runtime::events::Event {
                type_: kube::runtime::events::EventType::Warning,
                reason: "ReservedOrganizationSkipped".into(),
                note: Some(format!(
                    "`{}` targets the reserved organization (id={RESERVED_ORGANIZATION_ID}); it will not be deleted",
                    org.name_any()
                )),
                action: "Deleting".into(),
                secondary: None,
            })
            .await?;
        return Ok(Action::await_change());
    }

    if org_id > 0 {
        let grafana = super::grafana_client(&ctx).await?;
        grafana.delete_organization(org_id).await?;
        rebuild_sso_mapping(&grafana, &ctx.client).await?;
    }

    ctx.metrics.reset_organization_gauges();

    recorder
        .publish(kube::runtime::events::Event {
            type_: kube::runtime::events::EventType::Normal,
            reason: "DeleteRequested".into(),
            note: Some(format!("Deleted grafana organization `{}`", org.name_any())),
            action: "Deleting".into(),
            secondary: None,
        })
        .await?;

    Ok(Action::await_change())
}

fn error_policy(org: Arc<GrafanaOrganization>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("grafana-organization reconcile failed: {error:?}");
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &*org, error);
    Action::requeue(Duration::from_secs(60))
}

pub async fn run(client: Client, state: State, config: Arc<crate::config::Config>) {
    let orgs = Api::<GrafanaOrganization>::all(client.clone());
    Controller::new(orgs, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, config))
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_datasource_kind_names_are_stable() {
        assert_eq!(DatasourceKind::Mimir.name("gs"), "gs-mimir");
        assert_eq!(DatasourceKind::Alertmanager.name("gs"), "gs-alertmanager");
    }

    #[test]
    fn loki_and_tempo_are_conditional() {
        assert!(!DatasourceKind::Loki.enabled(false, true));
        assert!(DatasourceKind::Loki.enabled(true, true));
        assert!(!DatasourceKind::Tempo.enabled(true, false));
        assert!(DatasourceKind::Tempo.enabled(true, true));
    }

    #[test]
    fn mimir_and_alertmanager_are_unconditional() {
        assert!(DatasourceKind::Mimir.enabled(false, false));
        assert!(DatasourceKind::Alertmanager.enabled(false, false));
    }
}
