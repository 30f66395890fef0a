//! Typed, read-mostly views of resources this operator does not own (spec.md §3 "Ownership").
//!
//! `Cluster` and `App` are genuinely external CRDs (Cluster API and the Giant Swarm App
//! Platform, respectively); this operator only ever reads them, except for one field of `App`
//! (`spec.extraConfigs`), which it patches. They're modeled here with `#[derive(CustomResource)]`
//! purely for typed `Api<T>` access - `crdgen` never emits their CRD YAML, since this operator
//! does not own their schema.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A workload (or management) cluster, as observed from Cluster API.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Cluster",
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub infrastructure_ref: Option<ClusterInfrastructureRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ClusterInfrastructureRef {
    pub kind: String,
    pub name: String,
}

/// Infrastructure provider tags derived from `Cluster.spec.infrastructureRef.kind`
/// (spec.md §3 "Derived attributes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Aws,
    AwsManaged,
    Azure,
    AzureManaged,
    Vcd,
    Vsphere,
    Gcp,
    GcpManaged,
    Unknown,
}

impl Provider {
    pub fn from_infrastructure_kind(kind: &str) -> Provider {
        match kind {
            "AWSCluster" => Provider::Aws,
            "AWSManagedCluster" | "AWSManagedControlPlane" => Provider::AwsManaged,
            "AzureCluster" => Provider::Azure,
            "AzureManagedCluster" | "AzureManagedControlPlane" => Provider::AzureManaged,
            "VCDCluster" => Provider::Vcd,
            "VSphereCluster" => Provider::Vsphere,
            "GCPCluster" => Provider::Gcp,
            "GCPManagedCluster" => Provider::GcpManaged,
            _ => Provider::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::AwsManaged => "eks",
            Provider::Azure => "azure",
            Provider::AzureManaged => "aks",
            Provider::Vcd => "vcd",
            Provider::Vsphere => "vsphere",
            Provider::Gcp => "gcp",
            Provider::GcpManaged => "gke",
            Provider::Unknown => "unknown",
        }
    }
}

/// The observability-bundle `App` resource bundling per-cluster telemetry components. This
/// operator reads `spec.version` (to gate agent-config features) and patches
/// `spec.extraConfigs` (spec.md §3 "BundleConfiguration").
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "App",
    group = "application.giantswarm.io",
    version = "v1alpha1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub extra_configs: Vec<ExtraConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraConfig {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub priority: i32,
}

/// Priority of the extra-config entry this operator maintains on the bundle `App`
/// (spec.md §3 "BundleConfiguration").
pub const BUNDLE_EXTRA_CONFIG_PRIORITY: i32 = 25;

impl ExtraConfig {
    pub fn bundle_configuration(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        ExtraConfig {
            kind: "configMap".into(),
            name: name.into(),
            namespace: namespace.into(),
            priority: BUNDLE_EXTRA_CONFIG_PRIORITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_infrastructure_kinds() {
        assert_eq!(Provider::from_infrastructure_kind("AWSCluster").as_str(), "aws");
        assert_eq!(Provider::from_infrastructure_kind("AzureCluster").as_str(), "azure");
        assert_eq!(Provider::from_infrastructure_kind("VSphereCluster").as_str(), "vsphere");
    }

    #[test]
    fn falls_back_to_unknown() {
        assert_eq!(Provider::from_infrastructure_kind("WhatCluster").as_str(), "unknown");
    }
}
