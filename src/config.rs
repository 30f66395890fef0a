use clap::{Args, Parser};

/// observability-operator: reconciles cluster monitoring, Grafana organizations, Alertmanager
/// configuration and dashboards for the fleet of workload clusters of a management cluster.
#[derive(Debug, Clone, Parser)]
#[command(name = "observability-operator", version)]
pub struct Config {
    #[command(flatten)]
    pub operator: OperatorArgs,

    #[command(flatten)]
    pub grafana: GrafanaArgs,

    #[command(flatten)]
    pub management_cluster: ManagementClusterArgs,

    #[command(flatten)]
    pub monitoring: MonitoringArgs,

    #[command(flatten)]
    pub queue_config: QueueConfigArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Config {
    /// `ENABLE_WEBHOOKS=false` disables webhook setup, for local dev (spec.md §6). This is a
    /// bare env toggle rather than a flag, so it is read directly rather than via `clap(env)`.
    pub fn webhooks_enabled() -> bool {
        std::env::var("ENABLE_WEBHOOKS")
            .map(|v| v != "false")
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Args)]
pub struct OperatorArgs {
    #[arg(long, default_value = ":8080")]
    pub metrics_bind_address: String,

    #[arg(long, default_value = ":8081")]
    pub health_probe_bind_address: String,

    #[arg(long, default_value_t = false)]
    pub leader_elect: bool,

    #[arg(long, default_value_t = false)]
    pub metrics_secure: bool,

    #[arg(long, default_value_t = false)]
    pub enable_http2: bool,

    #[arg(long, default_value = "/tmp/k8s-webhook-server/serving-certs")]
    pub webhook_cert_path: String,

    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "monitoring")]
    pub operator_namespace: String,
}

#[derive(Debug, Clone, Args)]
pub struct GrafanaArgs {
    #[arg(long, default_value = "http://grafana.monitoring.svc.cluster.local")]
    pub grafana_url: String,
}

#[derive(Debug, Clone, Args)]
pub struct ManagementClusterArgs {
    #[arg(long = "management-cluster-base-domain")]
    pub base_domain: String,

    #[arg(long = "management-cluster-customer")]
    pub customer: String,

    #[arg(long = "management-cluster-insecure-ca", default_value_t = false)]
    pub insecure_ca: bool,

    #[arg(long = "management-cluster-name")]
    pub name: String,

    #[arg(long = "management-cluster-pipeline")]
    pub pipeline: String,

    #[arg(long = "management-cluster-region")]
    pub region: String,
}

#[derive(Debug, Clone, Args)]
pub struct MonitoringArgs {
    #[arg(long, default_value_t = true)]
    pub monitoring_enabled: bool,

    #[arg(long, default_value_t = false)]
    pub alertmanager_enabled: bool,

    #[arg(long, default_value = "alertmanager")]
    pub alertmanager_secret_name: String,

    #[arg(long, default_value = "http://mimir-gateway.mimir.svc/alertmanager")]
    pub alertmanager_url: String,

    #[arg(long, default_value = "http://mimir-gateway.mimir.svc/prometheus")]
    pub monitoring_metrics_query_url: String,

    #[arg(long, default_value_t = 1_000_000)]
    pub monitoring_sharding_scale_up_series_count: u64,

    #[arg(long, default_value_t = 0.20)]
    pub monitoring_sharding_scale_down_percentage: f64,

    #[arg(long, default_value = "2h")]
    pub monitoring_wal_truncate_frequency: String,

    #[arg(long, default_value_t = false)]
    pub logging_enabled_default: bool,

    #[arg(long, default_value_t = false)]
    pub tracing_enabled_default: bool,
}

/// All optional; unset means "let the agent default" (spec.md §9 tri-state design note).
#[derive(Debug, Clone, Default, Args)]
pub struct QueueConfigArgs {
    #[arg(long)]
    pub monitoring_queue_config_batch_send_deadline: Option<String>,
    #[arg(long)]
    pub monitoring_queue_config_capacity: Option<u64>,
    #[arg(long)]
    pub monitoring_queue_config_max_backoff: Option<String>,
    #[arg(long)]
    pub monitoring_queue_config_max_samples_per_send: Option<u64>,
    #[arg(long)]
    pub monitoring_queue_config_max_shards: Option<u32>,
    #[arg(long)]
    pub monitoring_queue_config_min_backoff: Option<String>,
    #[arg(long)]
    pub monitoring_queue_config_min_shards: Option<u32>,
    #[arg(long)]
    pub monitoring_queue_config_retry_on_http_429: Option<bool>,
    #[arg(long)]
    pub monitoring_queue_config_sample_age_limit: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct LoggingArgs {
    #[arg(long, default_value_t = false)]
    pub logging_enabled: bool,

    #[arg(long, default_value_t = false)]
    pub tracing_enabled: bool,

    #[arg(long)]
    pub logging_default_namespaces: Option<String>,

    #[arg(long, default_value_t = false)]
    pub logging_enable_node_filtering: bool,

    #[arg(long, default_value_t = false)]
    pub logging_enable_network_monitoring: bool,

    #[arg(long)]
    pub logging_include_events_from_namespaces: Option<String>,

    #[arg(long)]
    pub logging_exclude_events_from_namespaces: Option<String>,

    #[arg(long, default_value_t = false)]
    pub logging_enable_alloy_events_reconciliation: bool,
}
