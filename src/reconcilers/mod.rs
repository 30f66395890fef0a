//! Shared reconciler scaffolding (spec.md §5): a `Context`/`State`/`Diagnostics` triple in the
//! teacher's shape, one module per reconciler (C1-C4).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::{
    runtime::events::{Recorder, Reporter},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::{config::Config, Metrics};

pub mod alertmanager;
pub mod cluster_monitoring;
pub mod dashboard;
pub mod grafana_organization;

/// Diagnostics exposed by the web server's `/` route.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            last_event: Utc::now(),
            reporter: "observability-operator".into(),
        }
    }
}

impl Diagnostics {
    pub fn recorder<K>(&self, client: Client, object: &K) -> Recorder
    where
        K: Resource<DynamicType = ()>,
    {
        Recorder::new(client, self.reporter.clone(), object.object_ref(&()))
    }
}

/// Context handed to every reconciler (spec.md §5).
pub struct Context {
    pub client: Client,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Metrics,
    pub config: Arc<Config>,
}

/// State shared between the controller manager and the web server.
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    registry: prometheus::Registry,
}

impl State {
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context(&self, client: Client, config: Arc<Config>) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: Metrics::default()
                .register(&self.registry)
                .expect("metrics registration is infallible for a fresh registry"),
            diagnostics: self.diagnostics.clone(),
            config,
        })
    }
}

/// Build a Grafana client for this reconcile from the credentials Secret in the operator's
/// namespace (spec.md §4.5).
pub(crate) async fn grafana_client(ctx: &Context) -> crate::Result<crate::grafana::GrafanaClient> {
    crate::grafana::GrafanaClient::from_secrets(
        ctx.client.clone(),
        &ctx.config.grafana.grafana_url,
        "monitoring",
    )
    .await
}

/// Read and deserialize a YAML payload stored under `key` in a ConfigMap/Secret `data` map.
pub(crate) fn parse_yaml_key<T: DeserializeOwned>(
    data: &std::collections::BTreeMap<String, String>,
    key: &str,
) -> Option<crate::Result<T>> {
    data.get(key).map(|raw| serde_yaml::from_str(raw).map_err(crate::Error::from))
}
