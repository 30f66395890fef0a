//! The `GrafanaOrganization` CRD (spec.md §3), in its two API versions, plus the lossless (where
//! possible) conversion between them used by the CRD conversion webhook.
//!
//! Each version gets its own Rust module: `kube::CustomResource` names the generated struct after
//! `kind`, and both versions share the kind `GrafanaOrganization`, so the two generated structs
//! can only coexist if they live in distinct modules.

use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A tenant's role within an org, drawn from its `rbac` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RbacRole {
    Admin,
    Editor,
    Viewer,
}

/// RBAC group -> role mapping for an organization, used to rebuild the installation-wide SSO
/// `org_mapping` (spec.md §4.7.c).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OrganizationRBAC {
    pub admins: Vec<String>,
    pub editors: Vec<String>,
    pub viewers: Vec<String>,
}

impl OrganizationRBAC {
    /// Iterate `(group, role)` pairs in the order they should appear in the SSO mapping.
    pub fn entries(&self) -> impl Iterator<Item = (&str, RbacRole)> {
        self.admins
            .iter()
            .map(|g| (g.as_str(), RbacRole::Admin))
            .chain(self.editors.iter().map(|g| (g.as_str(), RbacRole::Editor)))
            .chain(self.viewers.iter().map(|g| (g.as_str(), RbacRole::Viewer)))
    }
}

/// What a tenant is used for: whether an org owns the tenant's query data, its alert routes, or
/// both (spec.md §3 v1alpha2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TenantType {
    Data,
    Alerting,
}

fn default_tenant_types() -> BTreeSet<TenantType> {
    BTreeSet::from([TenantType::Data])
}

/// A declared tenant, as modeled by v1alpha2.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    pub name: String,
    #[serde(default = "default_tenant_types")]
    pub types: BTreeSet<TenantType>,
}

impl TenantSpec {
    pub fn data_tenant(name: impl Into<String>) -> Self {
        TenantSpec {
            name: name.into(),
            types: default_tenant_types(),
        }
    }

    pub fn owns_data(&self) -> bool {
        self.types.contains(&TenantType::Data)
    }

    pub fn owns_alerting(&self) -> bool {
        self.types.contains(&TenantType::Alerting)
    }
}

/// A reference to a datasource created for this organization.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DatasourceRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaOrganizationCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
}

/// Name of the reserved, non-deletable first Grafana organization (spec.md §4.7.2).
pub const RESERVED_ORGANIZATION_NAME: &str = "Shared Org";
pub const RESERVED_ORGANIZATION_ID: i64 = 1;

/// `v1alpha2` is the superset/storage version (spec.md §3). Re-exported at the module root as the
/// default, canonical API.
pub mod v1alpha2 {
    use super::*;

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
    #[kube(
        kind = "GrafanaOrganization",
        group = "observability.giantswarm.io",
        version = "v1alpha2",
        status = "GrafanaOrganizationStatus",
        doc = "A Grafana organization, mirrored 1:1 into a live Grafana instance",
        plural = "grafanaorganizations",
        shortname = "grafanaorg",
        printcolumn = r#"{ "name": "Org ID", "type": "integer", "jsonPath": ".status.orgID" }"#,
        printcolumn = r#"{ "name": "Display name", "type": "string", "jsonPath": ".spec.displayName" }"#
    )]
    #[serde(rename_all = "camelCase")]
    pub struct GrafanaOrganizationSpec {
        /// Human-readable name of the organization, shown in the Grafana UI. Non-empty.
        pub display_name: String,

        /// Tenants owned by this organization.
        #[serde(default)]
        pub tenants: Vec<TenantSpec>,

        /// RBAC group -> role mapping, contributed to the installation-wide SSO mapping.
        #[serde(default)]
        pub rbac: OrganizationRBAC,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct GrafanaOrganizationStatus {
        /// 0 until the organization has been created in Grafana.
        #[serde(default)]
        pub org_id: i64,
        #[serde(default)]
        pub datasources: Vec<DatasourceRef>,
        #[serde(default)]
        pub conditions: Vec<GrafanaOrganizationCondition>,
    }
}

/// `v1alpha1`: tenants were plain IDs; every tenant implicitly owned query data only.
pub mod v1alpha1 {
    use super::*;

    #[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
    #[kube(
        kind = "GrafanaOrganization",
        group = "observability.giantswarm.io",
        version = "v1alpha1",
        status = "GrafanaOrganizationStatus",
        doc = "A Grafana organization, mirrored 1:1 into a live Grafana instance (legacy)",
        plural = "grafanaorganizations",
        shortname = "grafanaorg"
    )]
    #[serde(rename_all = "camelCase")]
    pub struct GrafanaOrganizationSpec {
        pub display_name: String,
        #[serde(default)]
        pub tenants: Vec<String>,
        #[serde(default)]
        pub rbac: OrganizationRBAC,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct GrafanaOrganizationStatus {
        #[serde(default)]
        pub org_id: i64,
        #[serde(default)]
        pub datasources: Vec<DatasourceRef>,
    }
}

pub use v1alpha2::{
    GrafanaOrganization, GrafanaOrganizationSpec, GrafanaOrganizationStatus,
};

/// Conversion between the two API versions (spec.md §3 "Conversion").
///
/// `v1alpha1 -> v1alpha2` is always lossless (every v1alpha1 tenant becomes a `{types: [data]}`
/// tenant). `v1alpha2 -> v1alpha1` is lossless only when every tenant's `types == {data}`;
/// downgrading a tenant that also owns `alerting` silently drops that bit, per spec.md §3.
pub mod convert {
    use super::*;

    pub fn up(spec: v1alpha1::GrafanaOrganizationSpec) -> GrafanaOrganizationSpec {
        GrafanaOrganizationSpec {
            display_name: spec.display_name,
            tenants: spec.tenants.into_iter().map(TenantSpec::data_tenant).collect(),
            rbac: spec.rbac,
        }
    }

    pub fn down(spec: GrafanaOrganizationSpec) -> v1alpha1::GrafanaOrganizationSpec {
        v1alpha1::GrafanaOrganizationSpec {
            display_name: spec.display_name,
            tenants: spec.tenants.into_iter().map(|t| t.name).collect(),
            rbac: spec.rbac,
        }
    }

    /// Whether converting `spec` down to v1alpha1 and back up to v1alpha2 reproduces it exactly.
    pub fn is_lossless_downgrade(spec: &GrafanaOrganizationSpec) -> bool {
        spec.tenants.iter().all(|t| t.types == default_tenant_types())
    }

    pub fn status_down(status: GrafanaOrganizationStatus) -> v1alpha1::GrafanaOrganizationStatus {
        v1alpha1::GrafanaOrganizationStatus {
            org_id: status.org_id,
            datasources: status.datasources,
        }
    }

    pub fn status_up(status: v1alpha1::GrafanaOrganizationStatus) -> GrafanaOrganizationStatus {
        GrafanaOrganizationStatus {
            org_id: status.org_id,
            datasources: status.datasources,
            conditions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_lossless_for_data_only_tenants() {
        let spec = GrafanaOrganizationSpec {
            display_name: "Giant Swarm".into(),
            tenants: vec![TenantSpec::data_tenant("gs")],
            rbac: OrganizationRBAC::default(),
        };
        assert!(convert::is_lossless_downgrade(&spec));
        let down = convert::down(spec.clone());
        let back = convert::up(down);
        assert_eq!(back, spec);
    }

    #[test]
    fn downgrade_drops_alerting_bit() {
        let spec = GrafanaOrganizationSpec {
            display_name: "Giant Swarm".into(),
            tenants: vec![TenantSpec {
                name: "gs".into(),
                types: BTreeSet::from([TenantType::Data, TenantType::Alerting]),
            }],
            rbac: OrganizationRBAC::default(),
        };
        assert!(!convert::is_lossless_downgrade(&spec));
        let down = convert::down(spec);
        assert_eq!(down.tenants, vec!["gs".to_string()]);
    }
}
