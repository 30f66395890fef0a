//! Cluster-monitoring reconciler (C1, spec.md §4.6).

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        events::{Event, EventType},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use semver::Version;
use serde::Serialize;
use tracing::{field, info, instrument, warn, Span};

use crate::{
    agent_config::{BundleCapabilities, ExternalLabels, QueueConfig, RenderInput, render_values},
    credentials::CredentialManager,
    organizations::OrganizationRepository,
    resources::cluster::{App, Cluster, ExtraConfig, Provider},
    sharding::{self, ShardingOverride, ShardingStrategy},
    tenants::TenantRepository,
    telemetry, Error, Metrics, Result,
};

use super::{Context, State};

pub const FINALIZER: &str = "monitoring.giantswarm.io/observability-operator";
const CONTROLLER_NAME: &str = "cluster_monitoring";
const BUNDLE_APP_NAME: &str = "observability-bundle";

const LABEL_MONITORING: &str = "giantswarm.io/monitoring";
const LABEL_LOGGING: &str = "giantswarm.io/logging";
const LABEL_SERVICE_PRIORITY: &str = "giantswarm.io/service-priority";
const ANNOTATION_SCALE_UP: &str = "monitoring.giantswarm.io/prometheus-agent-scale-up-series-count";
const ANNOTATION_SCALE_DOWN: &str = "monitoring.giantswarm.io/prometheus-agent-scale-down-percentage";

fn label_bool(cluster: &Cluster, label: &str, default: bool) -> bool {
    cluster
        .labels()
        .get(label)
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn service_priority(cluster: &Cluster) -> String {
    cluster
        .labels()
        .get(LABEL_SERVICE_PRIORITY)
        .cloned()
        .unwrap_or_else(|| "highest".to_string())
}

fn sharding_override(cluster: &Cluster) -> ShardingOverride {
    ShardingOverride {
        scale_up_series_count: cluster
            .annotations()
            .get(ANNOTATION_SCALE_UP)
            .and_then(|v| v.parse().ok()),
        scale_down_percentage: cluster
            .annotations()
            .get(ANNOTATION_SCALE_DOWN)
            .and_then(|v| v.parse().ok()),
    }
}

/// The instant-query PromQL expression used to fetch recent head-series load (spec.md §4.6.c).
fn head_series_promql(cluster_id: &str) -> String {
    format!(
        r#"sum(max_over_time((sum(prometheus_remote_write_wal_storage_active_series{{cluster_id="{cluster_id}", service="alloy-metrics"}}) by (pod))[6h:1h]))"#
    )
}

/// Parse a Prometheus instant-query response body, returning the single scalar sample.
/// A non-vector result type, an empty vector, or more than one sample is a categorical failure
/// (spec.md §4.6.c).
fn parse_head_series_response(body: &serde_json::Value) -> std::result::Result<i64, String> {
    let result_type = body["data"]["resultType"].as_str().unwrap_or("");
    if result_type != "vector" {
        return Err(format!("expected vector result, got {result_type:?}"));
    }
    let result = body["data"]["result"]
        .as_array()
        .ok_or_else(|| "missing result array".to_string())?;
    match result.len() {
        0 => Err("empty vector result".to_string()),
        1 => {
            let sample = result[0]["value"][1]
                .as_str()
                .ok_or_else(|| "missing sample value".to_string())?;
            sample
                .parse::<f64>()
                .map(|v| v as i64)
                .map_err(|e| e.to_string())
        }
        n => Err(format!("expected exactly one sample, got {n}")),
    }
}

async fn query_head_series(http: &reqwest::Client, base_url: &str, cluster_id: &str) -> Result<i64> {
    let query = head_series_promql(cluster_id);
    let response = http
        .get(format!("{base_url}/api/v1/query"))
        .query(&[("query", query.as_str())])
        .timeout(Duration::from_secs(120))
        .send()
        .await
        .map_err(|e| Error::NetworkError { service: "mimir", source: e })?;

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::NetworkError { service: "mimir", source: e })?;

    parse_head_series_response(&body).map_err(Error::MimirQueryError)
}

/// Current shard count, read from the existing monitoring ConfigMap's rendered values document
/// (`alloy.controller.replicas`); `1` if the ConfigMap doesn't exist yet (spec.md §4.6.b).
fn current_shards(existing: Option<&ConfigMap>) -> u32 {
    existing
        .and_then(|cm| cm.data.as_ref())
        .and_then(|d| d.get("values"))
        .and_then(|raw| serde_yaml::from_str::<serde_yaml::Value>(raw).ok())
        .and_then(|v| v["alloy"]["controller"]["replicas"].as_u64())
        .map(|v| v as u32)
        .unwrap_or(1)
}

/// The bundle-configuration feature-flag document (spec.md §3 "BundleConfiguration").
#[derive(Debug, Clone, Serialize)]
struct AppToggle {
    #[serde(rename = "appName")]
    app_name: &'static str,
    enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
struct BundleConfigurationApps {
    #[serde(rename = "alloyMetrics")]
    alloy_metrics: AppToggle,
    #[serde(rename = "alloyLogs")]
    alloy_logs: AppToggle,
    #[serde(rename = "alloyEvents")]
    alloy_events: AppToggle,
}

#[derive(Debug, Clone, Serialize)]
struct BundleConfigurationDocument {
    apps: BundleConfigurationApps,
}

fn render_bundle_configuration(
    monitoring_enabled: bool,
    logging_enabled: bool,
    events_enabled: bool,
) -> Result<String> {
    let doc = BundleConfigurationDocument {
        apps: BundleConfigurationApps {
            alloy_metrics: AppToggle { app_name: "alloy-metrics", enabled: monitoring_enabled },
            alloy_logs: AppToggle { app_name: "alloy-logs", enabled: logging_enabled },
            alloy_events: AppToggle { app_name: "alloy-events", enabled: events_enabled },
        },
    };
    serde_yaml::to_string(&doc).map_err(Error::from)
}

fn config_name(cluster: &str) -> String {
    format!("{cluster}-monitoring-config")
}
fn secret_name(cluster: &str) -> String {
    format!("{cluster}-monitoring-secret")
}
fn bundle_configuration_name(cluster: &str) -> String {
    format!("{cluster}-observability-platform-configuration")
}

#[instrument(skip(ctx, cluster), fields(trace_id))]
async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_NAME);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::IllegalCluster(cluster.name_any()))?;
    let clusters: Api<Cluster> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling cluster monitoring for \"{namespace}/{}\"", cluster.name_any());
    finalizer(&clusters, FINALIZER, cluster, |event| async {
        match event {
            Finalizer::Apply(cluster) => apply(cluster, ctx.clone()).await,
            Finalizer::Cleanup(cluster) => cleanup(cluster, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::IllegalCluster(name.clone()))?;
    let client = ctx.client.clone();

    let apps: Api<App> = Api::namespaced(client.clone(), &namespace);
    let Ok(bundle) = apps.get(BUNDLE_APP_NAME).await else {
        warn!("observability-bundle App not found for cluster {name}, requeuing");
        return Ok(Action::requeue(Duration::from_secs(300)));
    };
    let Ok(bundle_version) = Version::parse(bundle.spec.version.trim_start_matches('v')) else {
        warn!("observability-bundle version {:?} unparseable for cluster {name}, requeuing", bundle.spec.version);
        return Ok(Action::requeue(Duration::from_secs(300)));
    };

    let monitoring_enabled = ctx.config.monitoring.monitoring_enabled
        && label_bool(&cluster, LABEL_MONITORING, true);
    let logging_enabled = ctx.config.logging.logging_enabled
        && label_bool(&cluster, LABEL_LOGGING, ctx.config.monitoring.logging_enabled_default);
    let tracing_enabled = ctx.config.logging.tracing_enabled && ctx.config.monitoring.tracing_enabled_default;
    let events_enabled = logging_enabled || tracing_enabled;

    let bundle_config_name = bundle_configuration_name(&name);
    let bundle_doc = render_bundle_configuration(monitoring_enabled, logging_enabled, events_enabled)?;
    write_bundle_configuration(&client, &namespace, &bundle_config_name, &bundle_doc, &cluster).await?;
    ensure_bundle_extra_config(&client, &namespace, &bundle_config_name).await?;

    if !monitoring_enabled {
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let existing_cm = configmaps.get_opt(&config_name(&name)).await?;
    let shards_before = current_shards(existing_cm.as_ref());

    let http = reqwest::Client::new();
    let series = match query_head_series(&http, &ctx.config.monitoring.monitoring_metrics_query_url, &name).await {
        Ok(series) => series,
        Err(e) => {
            warn!("head-series query failed for {name}: {e}, falling back to current shard count");
            ctx.metrics.mimir_head_series_query_errors.inc();
            0
        }
    };

    let strategy = ShardingStrategy::default().merge(sharding_override(&cluster));
    let desired_shards = if series > 0 {
        sharding::desired(shards_before, series, strategy)
    } else {
        shards_before.max(1)
    };

    let organizations = OrganizationRepository::new(client.clone());
    let organization = organizations
        .cluster_organization(&namespace)
        .await?
        .unwrap_or_else(|| "giantswarm".to_string());

    let tenants_repo = TenantRepository::new(client.clone());
    let tenants: Vec<String> = tenants_repo.list_tenants().await?.into_iter().collect();
    let default_write_tenant = tenants.first().cloned().unwrap_or_else(|| organization.clone());

    let credentials = CredentialManager::new(client.clone(), ctx.config.operator.operator_namespace.clone());
    let password = credentials.get_or_create_cluster_password(&name).await?;

    let provider = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .map(|r| Provider::from_infrastructure_kind(&r.kind))
        .unwrap_or(Provider::Unknown);

    let render_input = RenderInput {
        cluster_name: name.clone(),
        provider,
        organization: organization.clone(),
        tenants: tenants.clone(),
        default_write_tenant,
        remote_write_url_env: "REMOTE_WRITE_URL".into(),
        basic_auth_username_env: "BASIC_AUTH_USERNAME".into(),
        mimir_ruler_url: ctx.config.monitoring.monitoring_metrics_query_url.clone(),
        wal_truncate_frequency: ctx.config.monitoring.monitoring_wal_truncate_frequency.clone(),
        insecure_skip_verify: ctx.config.management_cluster.insecure_ca,
        queue_config: QueueConfig {
            capacity: ctx.config.queue_config.monitoring_queue_config_capacity,
            max_samples_per_send: ctx.config.queue_config.monitoring_queue_config_max_samples_per_send,
            max_shards: ctx.config.queue_config.monitoring_queue_config_max_shards,
            min_shards: ctx.config.queue_config.monitoring_queue_config_min_shards,
            min_backoff: ctx.config.queue_config.monitoring_queue_config_min_backoff.clone(),
            max_backoff: ctx.config.queue_config.monitoring_queue_config_max_backoff.clone(),
            batch_send_deadline: ctx.config.queue_config.monitoring_queue_config_batch_send_deadline.clone(),
            sample_age_limit: ctx.config.queue_config.monitoring_queue_config_sample_age_limit.clone(),
            retry_on_http_429: ctx.config.queue_config.monitoring_queue_config_retry_on_http_429,
        },
        external_labels: ExternalLabels {
            cluster_id: name.clone(),
            cluster_type: if name == ctx.config.management_cluster.name { "management_cluster".into() } else { "workload_cluster".into() },
            customer: ctx.config.management_cluster.customer.clone(),
            installation: ctx.config.management_cluster.name.clone(),
            organization: organization.clone(),
            pipeline: ctx.config.management_cluster.pipeline.clone(),
            provider: provider.as_str().to_string(),
            region: ctx.config.management_cluster.region.clone(),
            service_priority: service_priority(&cluster),
        },
        replicas: desired_shards,
        priority_class: "giantswarm-critical".into(),
        capabilities: BundleCapabilities::from_bundle_version(&bundle_version),
    };

    let values = render_values(&render_input)?;
    write_monitoring_configmap(&configmaps, &name, &values, existing_cm.as_ref()).await?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    write_monitoring_secret(&secrets, &name, &render_input, &password).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

async fn write_bundle_configuration(
    client: &Client,
    namespace: &str,
    name: &str,
    document: &str,
    owner: &Cluster,
) -> Result<()> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let mut data = BTreeMap::new();
    data.insert("values".to_string(), document.to_string());

    let cm = ConfigMap {
        metadata: kube::core::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                ("app.kubernetes.io/name".to_string(), "observability-bundle".to_string()),
                ("app.kubernetes.io/managed-by".to_string(), "observability-operator".to_string()),
                ("app.kubernetes.io/part-of".to_string(), "observability-platform".to_string()),
            ])),
            owner_references: owner.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    configmaps
        .patch(name, &PatchParams::apply("observability-operator"), &Patch::Apply(cm))
        .await?;
    Ok(())
}

async fn ensure_bundle_extra_config(client: &Client, namespace: &str, config_name: &str) -> Result<()> {
    let apps: Api<App> = Api::namespaced(client.clone(), namespace);
    let bundle = apps.get(BUNDLE_APP_NAME).await?;

    let up_to_date = bundle.spec.extra_configs.iter().any(|c| {
        c.kind == "configMap"
            && c.name == config_name
            && c.namespace == namespace
            && c.priority == crate::resources::BUNDLE_EXTRA_CONFIG_PRIORITY
    });
    if up_to_date {
        return Ok(());
    }

    let mut extra_configs: Vec<ExtraConfig> = bundle
        .spec
        .extra_configs
        .into_iter()
        .filter(|c| !(c.kind == "configMap" && c.name == config_name))
        .collect();
    extra_configs.push(ExtraConfig::bundle_configuration(config_name, namespace));

    let patch = serde_json::json!({ "spec": { "extraConfigs": extra_configs } });
    apps.patch(BUNDLE_APP_NAME, &PatchParams::apply("observability-operator"), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn write_monitoring_configmap(
    configmaps: &Api<ConfigMap>,
    cluster: &str,
    values: &str,
    existing: Option<&ConfigMap>,
) -> Result<()> {
    if existing.and_then(|cm| cm.data.as_ref()).and_then(|d| d.get("values")).map(|v| v.as_str()) == Some(values) {
        return Ok(());
    }

    let mut data = BTreeMap::new();
    data.insert("values".to_string(), values.to_string());
    let cm = ConfigMap {
        metadata: kube::core::ObjectMeta {
            name: Some(config_name(cluster)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    configmaps
        .patch(&config_name(cluster), &PatchParams::apply("observability-operator"), &Patch::Apply(cm))
        .await?;
    Ok(())
}

async fn write_monitoring_secret(
    secrets: &Api<Secret>,
    cluster: &str,
    input: &RenderInput,
    password: &str,
) -> Result<()> {
    let mut data = BTreeMap::new();
    data.insert("REMOTE_WRITE_URL".to_string(), input.mimir_ruler_url.clone());
    data.insert("BASIC_AUTH_USERNAME".to_string(), cluster.to_string());
    data.insert("BASIC_AUTH_PASSWORD".to_string(), password.to_string());

    let secret = Secret {
        type_: Some("Opaque".to_string()),
        metadata: kube::core::ObjectMeta {
            name: Some(secret_name(cluster)),
            ..Default::default()
        },
        string_data: Some(data),
        ..Default::default()
    };
    secrets
        .patch(&secret_name(cluster), &PatchParams::apply("observability-operator"), &Patch::Apply(secret))
        .await?;
    Ok(())
}

async fn cleanup(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::IllegalCluster(name.clone()))?;
    let client = ctx.client.clone();

    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    let _ = configmaps.delete(&config_name(&name), &Default::default()).await;
    let _ = secrets.delete(&secret_name(&name), &Default::default()).await;
    let _ = configmaps.delete(&bundle_configuration_name(&name), &Default::default()).await;

    let apps: Api<App> = Api::namespaced(client.clone(), &namespace);
    let bundle_config_name = bundle_configuration_name(&name);
    if let Ok(bundle) = apps.get(BUNDLE_APP_NAME).await {
        let extra_configs: Vec<ExtraConfig> = bundle
            .spec
            .extra_configs
            .into_iter()
            .filter(|c| !(c.kind == "configMap" && c.name == bundle_config_name))
            .collect();
        let patch = serde_json::json!({ "spec": { "extraConfigs": extra_configs } });
        let _ = apps
            .patch(BUNDLE_APP_NAME, &PatchParams::apply("observability-operator"), &Patch::Merge(patch))
            .await;
    }

    let recorder = ctx.diagnostics.read().await.recorder(client, &*cluster);
    recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: "DeleteRequested".into(),
            note: Some(format!("Cleaned up monitoring resources for `{name}`")),
            action: "Deleting".into(),
            secondary: None,
        })
        .await?;

    Ok(Action::await_change())
}

fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("cluster-monitoring reconcile failed: {error:?}");
    ctx.metrics.reconcile_failure(CONTROLLER_NAME, &*cluster, error);
    Action::requeue(Duration::from_secs(300))
}

pub async fn run(client: Client, state: State, config: Arc<crate::config::Config>) {
    let clusters = Api::<Cluster>::all(client.clone());
    Controller::new(clusters, WatcherConfig::default().any_semantic())
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
    fn promql_has_expected_shape() {
        let q = head_series_promql("wc1");
        assert!(q.contains(r#"cluster_id="wc1""#));
        assert!(q.contains("alloy-metrics"));
    }

    #[test]
    fn parses_single_sample_vector() {
        let body = serde_json::json!({
            "status": "success",
            "data": { "resultType": "vector", "result": [{ "metric": {}, "value": [1.0, "1500000"] }] }
        });
        assert_eq!(parse_head_series_response(&body).unwrap(), 1_500_000);
    }

    #[test]
    fn rejects_empty_vector() {
        let body = serde_json::json!({ "data": { "resultType": "vector", "result": [] } });
        assert!(parse_head_series_response(&body).is_err());
    }

    #[test]
    fn rejects_multiple_samples() {
        let body = serde_json::json!({
            "data": { "resultType": "vector", "result": [
                { "metric": {}, "value": [1.0, "1"] },
                { "metric": {}, "value": [1.0, "2"] },
            ]}
        });
        assert!(parse_head_series_response(&body).is_err());
    }

    #[test]
    fn rejects_non_vector_result_type() {
        let body = serde_json::json!({ "data": { "resultType": "matrix", "result": [] } });
        assert!(parse_head_series_response(&body).is_err());
    }

    #[test]
    fn current_shards_defaults_to_one_when_configmap_absent() {
        assert_eq!(current_shards(None), 1);
    }

    #[test]
    fn bundle_configuration_toggles_events_when_either_logging_or_tracing_enabled() {
        let doc = render_bundle_configuration(true, false, true).unwrap();
        assert!(doc.contains("alloyMetrics"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert_eq!(parsed["apps"]["alloyEvents"]["enabled"], serde_yaml::Value::Bool(true));
        assert_eq!(parsed["apps"]["alloyLogs"]["enabled"], serde_yaml::Value::Bool(false));
    }
}
