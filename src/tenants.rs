//! Tenant repository (spec.md §4.3, L3): the deduplicated set of tenant IDs declared across all
//! non-deleting `GrafanaOrganization` CRs.

use std::collections::BTreeSet;

use kube::{api::ListParams, Api, Client, ResourceExt};

use crate::resources::GrafanaOrganization;
use crate::Result;

pub struct TenantRepository {
    client: Client,
}

impl TenantRepository {
    pub fn new(client: Client) -> Self {
        TenantRepository { client }
    }

    /// All tenant IDs declared by any non-deleting `GrafanaOrganization`, used to populate
    /// per-tenant remote-write stanzas (spec.md §4.4) and to validate Alertmanager-config
    /// Secrets on admission (spec.md §4.10).
    pub async fn list_tenants(&self) -> Result<BTreeSet<String>> {
        let orgs: Api<GrafanaOrganization> = Api::all(self.client.clone());
        let list = orgs.list(&ListParams::default()).await?;

        Ok(list
            .into_iter()
            .filter(|org| org.meta().deletion_timestamp.is_none())
            .flat_map(|org| org.spec.tenants.into_iter().map(|t| t.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{GrafanaOrganizationSpec, OrganizationRBAC, TenantSpec};
    use kube::core::ObjectMeta;

    fn org(name: &str, tenants: &[&str], deleting: bool) -> GrafanaOrganization {
        GrafanaOrganization {
            metadata: ObjectMeta {
                name: Some(name.into()),
                deletion_timestamp: deleting.then(|| kube::core::Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: GrafanaOrganizationSpec {
                display_name: name.into(),
                tenants: tenants.iter().map(|t| TenantSpec::data_tenant(*t)).collect(),
                rbac: OrganizationRBAC::default(),
            },
            status: None,
        }
    }

    #[test]
    fn dedupes_and_skips_deleting() {
        let orgs = vec![
            org("a", &["gs", "shared"], false),
            org("b", &["gs", "other"], false),
            org("c", &["ignored"], true),
        ];
        let tenants: BTreeSet<String> = orgs
            .into_iter()
            .filter(|org| org.meta().deletion_timestamp.is_none())
            .flat_map(|org| org.spec.tenants.into_iter().map(|t| t.name))
            .collect();
        assert_eq!(
            tenants,
            BTreeSet::from(["gs".to_string(), "shared".to_string(), "other".to_string()])
        );
    }
}
