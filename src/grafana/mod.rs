//! Grafana HTTP client wrapper (spec.md §4.5, L6).
//!
//! A fresh instance is built per-reconcile from admin credentials and TLS material fetched from
//! Secrets in the `monitoring` namespace, never shared or cached across reconciles (spec.md §5,
//! §9 "Many reconcilers sharing clients"). The client carries an immutable `org_id` that
//! overrides server-side "current org" on every request; switching org is done by cloning with
//! `with_org_id` rather than mutating shared state, which would race across concurrently
//! running reconcilers.

pub mod types;

use std::time::Duration;

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client as KubeClient};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{Error, Result};
use types::*;

const NUM_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct GrafanaClient {
    base_url: String,
    http: reqwest::Client,
    org_id: Option<i64>,
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
}

impl GrafanaClient {
    /// Build a fresh client from the `grafana` (admin credentials) and `grafana-tls` (optional
    /// client CA) Secrets in `namespace`. Called once per reconcile (spec.md §4.5).
    pub async fn from_secrets(client: KubeClient, base_url: &str, namespace: &str) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        let admin = secrets.get("grafana").await?;

        let username = secret_string(&admin, "admin-user").unwrap_or_else(|| "admin".into());
        let password = secret_string(&admin, "admin-password").unwrap_or_default();

        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));

        if let Ok(tls) = secrets.get("grafana-tls").await {
            if let Some(ca_pem) = secret_string(&tls, "ca.crt") {
                if let Ok(cert) = reqwest::Certificate::from_pem(ca_pem.as_bytes()) {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }

        let mut headers = HeaderMap::new();
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));
        let mut auth = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| Error::GrafanaApiError {
                status: 0,
                message: format!("invalid credentials: {e}"),
            })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = builder
            .default_headers(headers)
            .build()
            .map_err(|e| Error::NetworkError {
                service: "grafana",
                source: e,
            })?;

        Ok(GrafanaClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            org_id: None,
        })
    }

    /// A non-mutating derive: a clone of this client scoped to `org_id` for all subsequent
    /// requests (spec.md §4.5/§9).
    pub fn with_org_id(&self, org_id: i64) -> Self {
        GrafanaClient {
            base_url: self.base_url.clone(),
            http: self.http.clone(),
            org_id: Some(org_id),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let mut req = req;
        if let Some(org_id) = self.org_id {
            req = req.header("X-Grafana-Org-Id", org_id.to_string());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = req
                .try_clone()
                .expect("request bodies used by this client are always clone-able")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() && attempt < NUM_RETRIES {
                        continue;
                    }
                    if !status.is_success() {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(Error::GrafanaApiError {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    return resp.json::<T>().await.map_err(|e| Error::NetworkError {
                        service: "grafana",
                        source: e,
                    });
                }
                Err(e) if attempt < NUM_RETRIES && e.is_timeout() => continue,
                Err(e) => {
                    return Err(Error::NetworkError {
                        service: "grafana",
                        source: e,
                    })
                }
            }
        }
    }

    async fn send_no_content(&self, req: reqwest::RequestBuilder) -> Result<()> {
        self.send::<serde_json::Value>(req).await.map(|_| ())
    }

    // --- Organizations ------------------------------------------------------------------

    pub async fn get_organization_by_id(&self, id: i64) -> Result<Option<Organization>> {
        assert!(id > 0, "getOrgByID(0) must never reach the wire (spec.md §4.7)");
        let req = self.http.get(self.url(&format!("/orgs/{id}")));
        match self.send(req).await {
            Ok(org) => Ok(Some(org)),
            Err(Error::GrafanaApiError { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_organization_by_name(&self, name: &str) -> Result<Option<Organization>> {
        let req = self.http.get(self.url(&format!("/orgs/name/{name}")));
        match self.send(req).await {
            Ok(org) => Ok(Some(org)),
            Err(Error::GrafanaApiError { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// On "name taken" (Grafana returns 409 on `/orgs` when the name already exists), look the
    /// organization up by name and adopt its id instead of failing the reconcile — this is the
    /// only way two racing reconciles (or a reconcile racing a manual creation) converge
    /// (spec.md §4.7.a / §9 "Adoption-by-name on create races").
    pub async fn create_organization(&self, name: &str) -> Result<i64> {
        let req = self
            .http
            .post(self.url("/orgs"))
            .json(&CreateOrganization { name });
        match self.send::<CreateOrganizationResponse>(req).await {
            Ok(resp) => Ok(resp.org_id),
            Err(Error::GrafanaApiError { status: 409, .. }) => {
                match self.get_organization_by_name(name).await? {
                    Some(existing) => Ok(existing.id),
                    None => Err(Error::GrafanaApiError {
                        status: 409,
                        message: format!("organization {name:?} reported as taken but not found by name"),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_organization(&self, id: i64, name: &str) -> Result<()> {
        assert!(id > 0);
        let req = self
            .http
            .put(self.url(&format!("/orgs/{id}")))
            .json(&UpdateOrganization { name });
        self.send_no_content(req).await
    }

    pub async fn delete_organization(&self, id: i64) -> Result<()> {
        assert!(id > 0);
        let req = self.http.delete(self.url(&format!("/orgs/{id}")));
        match self.send_no_content(req).await {
            Ok(()) => Ok(()),
            // "not found" on delete is swallowed (spec.md §7).
            Err(Error::GrafanaApiError { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- Datasources ---------------------------------------------------------------------

    pub async fn list_datasources(&self) -> Result<Vec<Datasource>> {
        let req = self.http.get(self.url("/datasources"));
        self.send(req).await
    }

    pub async fn create_datasource(&self, ds: &Datasource) -> Result<Datasource> {
        let req = self.http.post(self.url("/datasources")).json(ds);
        self.send(req).await
    }

    pub async fn update_datasource(&self, uid: &str, ds: &Datasource) -> Result<Datasource> {
        let req = self.http.put(self.url(&format!("/datasources/uid/{uid}"))).json(ds);
        self.send(req).await
    }

    pub async fn delete_datasource(&self, uid: &str) -> Result<()> {
        let req = self.http.delete(self.url(&format!("/datasources/uid/{uid}")));
        match self.send_no_content(req).await {
            Ok(()) => Ok(()),
            Err(Error::GrafanaApiError { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- Dashboards ------------------------------------------------------------------------

    pub async fn upsert_dashboard(&self, dashboard: serde_json::Value) -> Result<()> {
        let payload = DashboardPayload {
            dashboard,
            folder_uid: None,
            overwrite: true,
        };
        let req = self.http.post(self.url("/dashboards/db")).json(&payload);
        self.send_no_content(req).await
    }

    pub async fn delete_dashboard(&self, uid: &str) -> Result<()> {
        let req = self.http.delete(self.url(&format!("/dashboards/uid/{uid}")));
        match self.send_no_content(req).await {
            Ok(()) => Ok(()),
            Err(Error::GrafanaApiError { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- SSO settings ------------------------------------------------------------------------

    pub async fn get_sso_settings(&self, provider: &str) -> Result<SsoSettings> {
        let req = self.http.get(self.url(&format!("/v1/sso-settings/{provider}")));
        self.send(req).await
    }

    pub async fn update_sso_settings(&self, provider: &str, settings: &SsoSettings) -> Result<()> {
        let req = self
            .http
            .put(self.url(&format!("/v1/sso-settings/{provider}")))
            .json(&json!({ "settings": settings }));
        self.send_no_content(req).await
    }
}
