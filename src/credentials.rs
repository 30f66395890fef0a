//! Per-cluster credential management (spec.md §4.2).
//!
//! Credentials for remote-write basic auth and Grafana datasource auth are generated once per
//! cluster and persisted in a shared `Secret`, keyed by cluster name, so that restarts of the
//! operator don't rotate credentials the agents already have.

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{Error, Result};

const SECRET_NAME: &str = "cluster-passwords";
const FIELD_MANAGER: &str = "observability-operator";

pub struct CredentialManager {
    client: Client,
    namespace: String,
}

impl CredentialManager {
    pub fn new(client: Client, operator_namespace: impl Into<String>) -> Self {
        CredentialManager {
            client,
            namespace: operator_namespace.into(),
        }
    }

    /// Read the password for `cluster` from the shared secret; generate and persist one on
    /// miss. Stable across operator restarts and across rerenders (spec.md §3 invariants).
    pub async fn get_or_create_cluster_password(&self, cluster: &str) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        if let Ok(secret) = secrets.get(SECRET_NAME).await {
            if let Some(existing) = secret
                .data
                .as_ref()
                .and_then(|d| d.get(cluster))
                .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            {
                return Ok(existing);
            }
        }

        let mut generated = generate_password();
        let mut data = BTreeMap::new();
        data.insert(cluster.to_string(), generated.clone());

        let patch = Secret {
            string_data: Some(data),
            ..Default::default()
        };

        secrets
            .patch(
                SECRET_NAME,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .map_err(Error::KubeError)?;

        let result = generated.clone();
        generated.zeroize();
        Ok(result)
    }

    /// Produce an Apache `{SHA}` htpasswd entry (`username:{SHA}base64(sha1(password))`) for
    /// ingress basic-auth secrets.
    pub fn htpasswd_entry(username: &str, password: &str) -> String {
        use sha1::{Digest, Sha1};
        let digest = Sha1::digest(password.as_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(digest);
        format!("{username}:{{SHA}}{encoded}")
    }
}

/// 32 bytes of cryptographic randomness, hex-encoded (spec.md §4.2).
fn generate_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    bytes.zeroize();
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_password_is_64_hex_chars() {
        let password = generate_password();
        assert_eq!(password.len(), 64);
        assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn htpasswd_entry_has_expected_shape() {
        let entry = CredentialManager::htpasswd_entry("wc1", "hunter2");
        assert!(entry.starts_with("wc1:{SHA}"));
    }
}
