//! Alertmanager reconciler (C3, spec.md §4.8).
//!
//! Unlike the other three reconcilers, this one does not reconcile a single object to a desired
//! state: a matching Secret is merely the trigger. Every reconcile re-enumerates *all* tenant
//! Secrets and re-uploads the full merged config for each tenant, since Mimir Alertmanager has no
//! notion of a per-tenant incremental patch.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::ListParams,
    runtime::{controller::Action, events::EventType, watcher::Config as WatcherConfig, Controller},
    Api, Client, ResourceExt,
};
use tracing::{field, info, instrument, warn, Span};

use crate::{alertmanager_config, telemetry, Error, Result};

use super::{Context, State};

const CONTROLLER_NAME: &str = "alertmanager";
const LABEL_KIND: &str = "observability.giantswarm.io/kind";
const KIND_ALERTMANAGER_CONFIG: &str = "alertmanager-config";
const LABEL_TENANT: &str = "observability.giantswarm.io/tenant";
const BASE_CONFIG_KEY: &str = "alertmanager.yaml";

/// The operator's base configuration: globals, default receivers, inhibition rules, heartbeat
/// routing and the notification template, read from the `--alertmanager-secret-name` Secret in
/// the operator namespace.
async fn base_config(ctx: &Context) -> Result<String> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.config.operator.operator_namespace);
    let secret = secrets.get(&ctx.config.monitoring.alertmanager_secret_name).await?;
    let data = secret.data.unwrap_or_default();
    data.get(BASE_CONFIG_KEY)
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
        .ok_or_else(|| {
            Error::IllegalAlertmanagerConfig(
                "base".to_string(),
                format!("secret has no `{BASE_CONFIG_KEY}` key"),
            )
        })
}

fn tenant_of(secret: &Secret) -> Option<String> {
    secret.labels().get(LABEL_TENANT).cloned()
}

fn is_alertmanager_config(secret: &Secret) -> bool {
    secret.labels().get(LABEL_KIND).map(String::as_str) == Some(KIND_ALERTMANAGER_CONFIG)
}

fn tenant_secret_body(secret: &Secret) -> Result<String> {
    let data = secret.data.clone().unwrap_or_default();
    let name = secret.name_any();
    let (_, value) = data.into_iter().next().ok_or_else(|| {
        Error::IllegalAlertmanagerConfig(name.clone(), "secret has no data keys".into())
    })?;
    String::from_utf8(value.0).map_err(|e| Error::IllegalAlertmanagerConfig(name, e.to_string()))
}

/// Group all matching Secrets cluster-wide by their tenant label (spec.md §4.8 step 1).
async fn tenant_secrets(client: &Client) -> Result<BTreeMap<String, Vec<Secret>>> {
    let secrets: Api<Secret> = Api::all(client.clone());
    let list = secrets
        .list(&ListParams::default().labels(&format!("{LABEL_KIND}={KIND_ALERTMANAGER_CONFIG}")))
        .await?;

    let mut grouped: BTreeMap<String, Vec<Secret>> = BTreeMap::new();
    for secret in list.into_iter().filter(is_alertmanager_config) {
        if let Some(tenant) = tenant_of(&secret) {
            grouped.entry(tenant).or_default().push(secret);
        } else {
            warn!(
                "alertmanager-config secret \"{}/{}\" has no tenant label, skipping",
                secret.namespace().unwrap_or_default(),
                secret.name_any()
            );
        }
    }
    Ok(grouped)
}

/// Merge and upload one tenant's config. Isolated from other tenants' failures (spec.md §4.8
/// failure semantics): the caller logs/emits an event and moves on rather than propagating.
async fn reconcile_tenant(ctx: &Context, base: &str, tenant: &str, secrets: &[Secret]) -> Result<()> {
    let mut merged = base.to_string();
    for secret in secrets {
        let body = tenant_secret_body(secret)?;
        merged = alertmanager_config::merge(&merged, &body, tenant)?;
    }

    upload(ctx, tenant, &merged).await?;

    let routes = alertmanager_config::count_routes(&merged) as i64;
    ctx.metrics.alertmanager_routes.with_label_values(&[tenant]).set(routes);
    Ok(())
}

async fn upload(ctx: &Context, tenant: &str, merged_config: &str) -> Result<()> {
    let url = format!("{}/api/v1/alerts", ctx.config.monitoring.alertmanager_url.trim_end_matches('/'));

    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = reqwest::Client::new()
            .post(&url)
            .header("X-Scope-OrgID", tenant)
            .header("Content-Type", "application/yaml")
            .body(merged_config.to_string())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) if attempt < MAX_ATTEMPTS && resp.status().is_server_error() => {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
            Ok(resp) => {
                return Err(Error::GrafanaApiError {
                    status: resp.status().as_u16(),
                    message: format!("mimir alertmanager rejected config for tenant {tenant}"),
                })
            }
            Err(source) if attempt < MAX_ATTEMPTS => {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                let _ = source;
                continue;
            }
            Err(source) => {
                return Err(Error::NetworkError {
                    service: "mimir-alertmanager",
                    source,
                })
            }
        }
    }
}

#[instrument(skip(ctx, secret), fields(trace_id))]
async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    if !is_alertmanager_config(&secret) {
        return Ok(Action::await_change());
    }

    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let base = base_config(&ctx).await?;
    let grouped = tenant_secrets(&ctx.client).await?;

    info!("Reconciling alertmanager config for {} tenants", grouped.len());
    for (tenant, secrets) in &grouped {
        if let Err(error) = reconcile_tenant(&ctx, &base, tenant, secrets).await {
            warn!("alertmanager config for tenant {tenant} failed: {error:?}");
            let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), &*secret);
            let _ = recorder
                .publish(kube::runtime::events::Event {
                    type_: EventType::Warning,
                    reason: "AlertmanagerTenantConfigFailed".into(),
                    note: Some(format!("tenant {tenant}: {error}")),
                    action: "Reconciling".into(),
                    secondary: None,
                })
                .await;
        }
    }

    Ok(Action::requeue(Duration::from_secs(300)))
}

fn error_policy(secret: Arc<Secret>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("alertmanager reconcile failed: {error:?}");
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &*secret, error);
    Action::requeue(Duration::from_secs(60))
}

pub async fn run(client: Client, state: State, config: Arc<crate::config::Config>) {
    let secrets = Api::<Secret>::all(client.clone());
    Controller::new(secrets, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, config))
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn secret_with(labels: Vec<(&str, &str)>, data: Vec<(&str, &str)>) -> Secret {
        Secret {
            metadata: kube::core::ObjectMeta {
                name: Some("am-config".into()),
                labels: Some(labels.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn identifies_alertmanager_config_secrets_by_label() {
        let secret = secret_with(vec![(LABEL_KIND, KIND_ALERTMANAGER_CONFIG)], vec![]);
        assert!(is_alertmanager_config(&secret));
        let other = secret_with(vec![(LABEL_KIND, "dashboard")], vec![]);
        assert!(!is_alertmanager_config(&other));
    }

    #[test]
    fn extracts_tenant_label() {
        let secret = secret_with(vec![(LABEL_TENANT, "acme")], vec![]);
        assert_eq!(tenant_of(&secret), Some("acme".to_string()));
    }

    #[test]
    fn tenant_secret_body_reads_the_sole_data_key() {
        let secret = secret_with(vec![], vec![("alertmanager.yaml", "route: {}")]);
        assert_eq!(tenant_secret_body(&secret).unwrap(), "route: {}");
    }

    #[test]
    fn tenant_secret_body_rejects_empty_secret() {
        let secret = secret_with(vec![], vec![]);
        assert!(tenant_secret_body(&secret).is_err());
    }
}
