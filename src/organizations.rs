//! Cluster -> organization repository (spec.md §4.4 L4): reads the cluster's namespace label.

use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client, ResourceExt};

use crate::Result;

/// Namespace label carrying the owning organization (spec.md §6 "Watched labels").
pub const ORGANIZATION_LABEL: &str = "giantswarm.io/organization";

pub struct OrganizationRepository {
    client: Client,
}

impl OrganizationRepository {
    pub fn new(client: Client) -> Self {
        OrganizationRepository { client }
    }

    /// The organization that owns `namespace`, or `None` if the namespace isn't labelled.
    pub async fn cluster_organization(&self, namespace: &str) -> Result<Option<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = namespaces.get(namespace).await?;
        Ok(ns.labels().get(ORGANIZATION_LABEL).cloned())
    }
}
