use thiserror::Error;

/// Kubernetes-facing CRDs and lightweight typed views of foreign resources.
pub mod resources;

/// Configuration surface (CLI flags, env toggles).
pub mod config;

/// Sharding policy (L1).
pub mod sharding;

/// Per-cluster credential management (L2).
pub mod credentials;

/// Tenant enumeration (L3).
pub mod tenants;

/// Cluster -> organization label lookup (L4).
pub mod organizations;

/// Alloy agent configuration rendering (L5).
pub mod agent_config;

/// Grafana HTTP API client wrapper (L6).
pub mod grafana;

/// Alertmanager config merging.
pub mod alertmanager_config;

/// The four reconcilers (C1-C4) and the shared controller context.
pub mod reconcilers;

/// Admission webhooks and CRD conversion.
pub mod webhook;

/// Log and trace integrations.
pub mod telemetry;

/// Prometheus metrics.
mod metrics;
pub use metrics::Metrics;

#[derive(Error, Debug)]
pub enum Error {
    #[error("serialization error: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("yaml error: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("kube error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("finalizer error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("network error talking to {service}: {source}")]
    NetworkError {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("grafana API error ({status}): {message}")]
    GrafanaApiError { status: u16, message: String },

    #[error("cluster {0} has no namespace")]
    IllegalCluster(String),

    #[error("grafana organization {0} is invalid: {1}")]
    IllegalGrafanaOrganization(String, String),

    #[error("dashboard configmap {0} is invalid: {1}")]
    IllegalDashboard(String, String),

    #[error("alertmanager config for tenant {0} is invalid: {1}")]
    IllegalAlertmanagerConfig(String, String),

    #[error("mimir query returned an unusable result: {0}")]
    MimirQueryError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization_error",
            Error::YamlError(_) => "yaml_error",
            Error::KubeError(_) => "kube_error",
            Error::FinalizerError(_) => "finalizer_error",
            Error::NetworkError { .. } => "network_error",
            Error::GrafanaApiError { .. } => "grafana_api_error",
            Error::IllegalCluster(_) => "illegal_cluster",
            Error::IllegalGrafanaOrganization(..) => "illegal_grafana_organization",
            Error::IllegalDashboard(..) => "illegal_dashboard",
            Error::IllegalAlertmanagerConfig(..) => "illegal_alertmanager_config",
            Error::MimirQueryError(_) => "mimir_query_error",
        }
        .to_string()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::YamlError(e)
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::KubeError(e)
    }
}
