//! Typed request/response payloads for the subset of the Grafana HTTP API this operator drives
//! (spec.md §4.5). Hand-written against `reqwest`/`serde_json` rather than generated, since no
//! OpenAPI spec for Grafana ships in this corpus (see DESIGN.md).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrganization<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrganizationResponse {
    #[serde(rename = "orgId")]
    pub org_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOrganization<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Datasource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "id")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub url: String,
    pub access: String,
    #[serde(rename = "basicAuth")]
    pub basic_auth: bool,
    #[serde(rename = "basicAuthUser", skip_serializing_if = "Option::is_none")]
    pub basic_auth_user: Option<String>,
    #[serde(rename = "secureJsonData", skip_serializing_if = "Option::is_none")]
    pub secure_json_data: Option<Value>,
    #[serde(rename = "jsonData", skip_serializing_if = "Option::is_none")]
    pub json_data: Option<Value>,
    #[serde(rename = "isDefault", default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceList(pub Vec<Datasource>);

/// A dashboard object as stored/retrieved through `/api/dashboards/...`. The `dashboard` field
/// is opaque JSON to the operator (spec.md §9 "Dynamic YAML/JSON config").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardPayload {
    pub dashboard: Value,
    #[serde(rename = "folderUid", skip_serializing_if = "Option::is_none")]
    pub folder_uid: Option<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSearchHit {
    pub uid: String,
    pub title: String,
}

/// The installation-wide SSO provider settings document; `org_mapping` is rebuilt wholesale on
/// every organization reconcile (spec.md §4.7.c).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SsoSettings {
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl SsoSettings {
    pub fn org_mapping(&self) -> Vec<String> {
        self.rest
            .get("org_mapping")
            .and_then(|v| v.as_str())
            .map(|s| s.split(' ').map(str::to_string).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn set_org_mapping(&mut self, lines: &[String]) {
        self.rest
            .insert("org_mapping".into(), Value::String(lines.join(" ")));
    }
}
