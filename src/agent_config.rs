//! Alloy agent configuration renderer (spec.md §4.4, L5).
//!
//! Produces a text "Alloy River config" document plus a wrapping Helm-style values YAML
//! document, deterministically, from a concrete set of inputs. Feature flags that gate parts of
//! the template are computed once from the observability-bundle's parsed semantic version
//! (spec.md §9 design note "Text templating with version-gated feature flags"), not inlined as
//! version comparisons in the renderer itself.

use indoc::formatdoc;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::resources::Provider;

/// A queue_config field that distinguishes "not provided" (omit from the template, let the
/// agent default apply) from "provided" (spec.md §9 tri-state design note).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    pub capacity: Option<u64>,
    pub max_samples_per_send: Option<u64>,
    pub max_shards: Option<u32>,
    pub min_shards: Option<u32>,
    pub min_backoff: Option<String>,
    pub max_backoff: Option<String>,
    pub batch_send_deadline: Option<String>,
    pub sample_age_limit: Option<String>,
    pub retry_on_http_429: Option<bool>,
}

impl QueueConfig {
    /// Render as a sequence of `key = value` River lines, one per *present* field, in a stable
    /// order - omitted fields are not mentioned at all.
    fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(v) = self.capacity {
            lines.push(format!("capacity = {v}"));
        }
        if let Some(v) = self.max_samples_per_send {
            lines.push(format!("max_samples_per_send = {v}"));
        }
        if let Some(v) = self.max_shards {
            lines.push(format!("max_shards = {v}"));
        }
        if let Some(v) = self.min_shards {
            lines.push(format!("min_shards = {v}"));
        }
        if let Some(v) = &self.min_backoff {
            lines.push(format!("min_backoff = \"{v}\""));
        }
        if let Some(v) = &self.max_backoff {
            lines.push(format!("max_backoff = \"{v}\""));
        }
        if let Some(v) = &self.batch_send_deadline {
            lines.push(format!("batch_send_deadline = \"{v}\""));
        }
        if let Some(v) = &self.sample_age_limit {
            lines.push(format!("sample_age_limit = \"{v}\""));
        }
        if let Some(v) = self.retry_on_http_429 {
            lines.push(format!("retry_on_http_429 = {v}"));
        }
        lines
    }
}

/// External labels attached to every series shipped by the agent (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExternalLabels {
    pub cluster_id: String,
    pub cluster_type: String,
    pub customer: String,
    pub installation: String,
    pub organization: String,
    pub pipeline: String,
    pub provider: String,
    pub region: String,
    pub service_priority: String,
}

impl ExternalLabels {
    fn render_lines(&self) -> Vec<String> {
        vec![
            format!("cluster_id       = \"{}\"", self.cluster_id),
            format!("cluster_type     = \"{}\"", self.cluster_type),
            format!("customer         = \"{}\"", self.customer),
            format!("installation     = \"{}\"", self.installation),
            format!("organization     = \"{}\"", self.organization),
            format!("pipeline         = \"{}\"", self.pipeline),
            format!("provider         = \"{}\"", self.provider),
            format!("region           = \"{}\"", self.region),
            format!("service_priority = \"{}\"", self.service_priority),
        ]
    }
}

/// Boolean template capabilities derived once from the observability-bundle's version
/// (spec.md §4.4/§9).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BundleCapabilities {
    pub enable_vpa: bool,
    pub enable_query_matchers: bool,
    pub enable_scrape_config_discovery: bool,
}

impl BundleCapabilities {
    pub fn from_bundle_version(version: &Version) -> Self {
        let ge = |major, minor, patch| {
            *version >= Version::new(major, minor, patch)
        };
        BundleCapabilities {
            enable_vpa: ge(1, 7, 0),
            enable_query_matchers: ge(1, 9, 0),
            enable_scrape_config_discovery: ge(2, 2, 0),
        }
    }

    /// The last-known-compatible Alloy image tag, pinned when the bundle predates VPA/
    /// scrape-config support (spec.md §4.4).
    pub fn pinned_alloy_tag(&self) -> Option<&'static str> {
        if !self.enable_vpa {
            Some("v1.1.1")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderInput {
    pub cluster_name: String,
    pub provider: Provider,
    pub organization: String,
    pub tenants: Vec<String>,
    pub default_write_tenant: String,
    pub remote_write_url_env: String,
    pub basic_auth_username_env: String,
    pub mimir_ruler_url: String,
    pub wal_truncate_frequency: String,
    pub insecure_skip_verify: bool,
    pub queue_config: QueueConfig,
    pub external_labels: ExternalLabels,
    pub replicas: u32,
    pub priority_class: String,
    pub capabilities: BundleCapabilities,
}

/// Render one `endpoint { ... }` stanza per tenant, each scoped to its own `X-Scope-OrgID`
/// header, so remote-write actually fans out per tenant rather than writing once under a
/// single, unscoped endpoint (spec.md §4.3/§4.4, testable property 5). Falls back to the
/// default write tenant if the cluster declares no tenants.
fn render_endpoint_blocks(input: &RenderInput, queue_config_block: &str) -> String {
    let tenants: Vec<&str> = if input.tenants.is_empty() {
        vec![input.default_write_tenant.as_str()]
    } else {
        input.tenants.iter().map(String::as_str).collect()
    };

    tenants
        .iter()
        .map(|tenant| {
            formatdoc! {r#"
                endpoint {{
                    url = env("{remote_write_url_env}")

                    basic_auth {{
                        username = env("{basic_auth_username_env}")
                        password = env("BASIC_AUTH_PASSWORD")
                    }}

                    headers = {{
                        "X-Scope-OrgID" = "{tenant}",
                    }}

                    tls_config {{
                        insecure_skip_verify = {insecure_skip_verify}
                    }}

                    queue_config {{
                        {queue_config_block}
                    }}
                }}"#,
                remote_write_url_env = input.remote_write_url_env,
                basic_auth_username_env = input.basic_auth_username_env,
                tenant = tenant,
                insecure_skip_verify = input.insecure_skip_verify,
                queue_config_block = queue_config_block,
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n    ")
}

/// Render the Alloy River config text for `input` (spec.md §4.4).
pub fn render_river_config(input: &RenderInput) -> String {
    let queue_config_block = input.queue_config.render_lines().join("\n        ");
    let external_labels_block = input.external_labels.render_lines().join("\n    ");
    let endpoint_blocks = render_endpoint_blocks(input, &queue_config_block);

    let discovery_block = if input.capabilities.enable_scrape_config_discovery {
        formatdoc! {r#"

            discovery.kubernetes "scrape_configs" {{
                role = "endpoints"
            }}
        "#}
    } else if input.capabilities.enable_query_matchers {
        formatdoc! {r#"

            discovery.kubernetes "pod_monitors" {{
                role = "pod"
            }}

            discovery.kubernetes "service_monitors" {{
                role = "service"
            }}
        "#}
    } else {
        String::new()
    };

    formatdoc! {r#"
        // Rendered by observability-operator for cluster "{cluster}". Do not edit by hand.

        prometheus.remote_write "default" {{
            {endpoint_blocks}

            external_labels = {{
                {external_labels_block}
            }}

            wal {{
                truncate_frequency = "{wal_truncate_frequency}"
            }}
        }}

        mimir.rules.kubernetes "default" {{
            address      = "{mimir_ruler_url}"
            tenant_id    = "{default_write_tenant}"
        }}
        {discovery_block}
    "#,
        cluster = input.cluster_name,
        endpoint_blocks = endpoint_blocks,
        external_labels_block = external_labels_block,
        wal_truncate_frequency = input.wal_truncate_frequency,
        mimir_ruler_url = input.mimir_ruler_url,
        default_write_tenant = input.default_write_tenant,
        discovery_block = discovery_block,
    }
}

/// The Helm-style `values` document wrapping the rendered river config (spec.md §3
/// "AgentConfiguration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentValues {
    pub alloy: AlloyValues,
    #[serde(rename = "priorityClassName")]
    pub priority_class_name: String,
    #[serde(rename = "verticalPodAutoscaler")]
    pub vertical_pod_autoscaler: VpaValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlloyValues {
    #[serde(rename = "configMap")]
    pub config_map: ConfigMapValues,
    pub controller: ControllerValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageValues>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMapValues {
    pub create: bool,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerValues {
    pub replicas: u32,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageValues {
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpaValues {
    pub enabled: bool,
}

/// Render the full values document for `input` (spec.md §4.4).
pub fn render_values(input: &RenderInput) -> Result<String, serde_yaml::Error> {
    let river = render_river_config(input);
    let values = AgentValues {
        alloy: AlloyValues {
            config_map: ConfigMapValues {
                create: true,
                content: river,
            },
            controller: ControllerValues {
                replicas: input.replicas,
                type_: "deployment".into(),
            },
            image: input.capabilities.pinned_alloy_tag().map(|tag| ImageValues { tag: tag.into() }),
        },
        priority_class_name: input.priority_class.clone(),
        vertical_pod_autoscaler: VpaValues {
            enabled: input.capabilities.enable_vpa,
        },
    };
    serde_yaml::to_string(&values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> RenderInput {
        RenderInput {
            cluster_name: "wc1".into(),
            provider: Provider::Aws,
            organization: "alpha".into(),
            tenants: vec!["gs".into(), "alpha".into()],
            default_write_tenant: "alpha".into(),
            remote_write_url_env: "REMOTE_WRITE_URL".into(),
            basic_auth_username_env: "BASIC_AUTH_USERNAME".into(),
            mimir_ruler_url: "http://mimir-gateway.mimir.svc/prometheus".into(),
            wal_truncate_frequency: "2h".into(),
            insecure_skip_verify: false,
            queue_config: QueueConfig {
                capacity: Some(10_000),
                max_samples_per_send: Some(2_000),
                max_shards: Some(10),
                ..Default::default()
            },
            external_labels: ExternalLabels {
                cluster_id: "wc1".into(),
                cluster_type: "workload_cluster".into(),
                customer: "giantswarm".into(),
                installation: "test".into(),
                organization: "alpha".into(),
                pipeline: "stable".into(),
                provider: "aws".into(),
                region: "eu-west-1".into(),
                service_priority: "highest".into(),
            },
            replicas: 1,
            priority_class: "giantswarm-critical".into(),
            capabilities: BundleCapabilities::from_bundle_version(&Version::new(2, 0, 0)),
        }
    }

    #[test]
    fn river_config_omits_unset_queue_config_fields() {
        let river = render_river_config(&sample_input());
        assert!(river.contains("capacity = 10000"));
        assert!(!river.contains("min_shards"));
        assert!(!river.contains("retry_on_http_429"));
    }

    #[test]
    fn river_config_includes_external_labels() {
        let river = render_river_config(&sample_input());
        assert!(river.contains(r#"cluster_id       = "wc1""#));
        assert!(river.contains(r#"organization     = "alpha""#));
    }

    /// spec.md §4.3/testable property 5: every declared tenant gets its own remote-write
    /// endpoint, scoped with its own `X-Scope-OrgID` header.
    #[test]
    fn river_config_renders_one_endpoint_per_tenant() {
        let river = render_river_config(&sample_input());
        assert_eq!(river.matches("endpoint {").count(), 2);
        assert!(river.contains(r#""X-Scope-OrgID" = "gs""#));
        assert!(river.contains(r#""X-Scope-OrgID" = "alpha""#));
    }

    #[test]
    fn river_config_falls_back_to_default_write_tenant_when_no_tenants_declared() {
        let mut input = sample_input();
        input.tenants.clear();
        let river = render_river_config(&input);
        assert_eq!(river.matches("endpoint {").count(), 1);
        assert!(river.contains(r#""X-Scope-OrgID" = "alpha""#));
    }

    #[test]
    fn bundle_capabilities_are_version_gated() {
        let old = BundleCapabilities::from_bundle_version(&Version::new(1, 6, 9));
        assert!(!old.enable_vpa);
        assert!(!old.enable_query_matchers);
        assert_eq!(old.pinned_alloy_tag(), Some("v1.1.1"));

        let mid = BundleCapabilities::from_bundle_version(&Version::new(1, 9, 0));
        assert!(mid.enable_vpa);
        assert!(mid.enable_query_matchers);
        assert!(!mid.enable_scrape_config_discovery);

        let new = BundleCapabilities::from_bundle_version(&Version::new(2, 2, 0));
        assert!(new.enable_scrape_config_discovery);
        assert_eq!(new.pinned_alloy_tag(), None);
    }

    #[test]
    fn values_yaml_embeds_replicas_and_river_config() {
        let yaml = render_values(&sample_input()).unwrap();
        assert!(yaml.contains("replicas: 1"));
        assert!(yaml.contains("content:"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render_values(&sample_input()).unwrap();
        let b = render_values(&sample_input()).unwrap();
        assert_eq!(a, b);
    }

    /// spec.md §8 property 6 (partial): structured fields round-trip through the rendered
    /// values document.
    #[test]
    fn structured_fields_roundtrip_through_values_yaml() {
        let input = sample_input();
        let yaml = render_values(&input).unwrap();
        let parsed: AgentValues = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.alloy.controller.replicas, input.replicas);
        assert_eq!(parsed.priority_class_name, input.priority_class);
    }
}
