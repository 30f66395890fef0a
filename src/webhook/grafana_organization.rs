//! Validating webhook for `GrafanaOrganization` (spec.md §4.10): rejects an empty tenant list,
//! duplicate tenant IDs within the CR, the forbidden literal `__mimir_cluster`, and (v1alpha2)
//! tenant IDs that don't match the Alloy identifier pattern. Length/pattern/shape that the CRD's
//! OpenAPI schema already enforces is not re-validated here (spec.md §9).

use std::{collections::HashSet, sync::Arc};

use axum::{extract::State, Json};
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use serde::Deserialize;

use crate::resources::{validate_tenant_id, validate_tenant_id_v1alpha1, FORBIDDEN_TENANT};

use super::WebhookContext;

/// Tenants are plain strings in v1alpha1 and `{name, types}` objects in v1alpha2; this view reads
/// either shape without needing to know which version is being admitted up front.
#[derive(Deserialize)]
#[serde(untagged)]
enum TenantEntry {
    Name(String),
    Spec { name: String },
}

impl TenantEntry {
    fn name(&self) -> &str {
        match self {
            TenantEntry::Name(n) => n,
            TenantEntry::Spec { name } => name,
        }
    }
}

#[derive(Deserialize)]
struct SpecView {
    #[serde(default)]
    tenants: Vec<TenantEntry>,
}

pub async fn validate(
    State(_ctx): State<Arc<WebhookContext>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(err) => return Json(AdmissionResponse::invalid(err).into_review()),
    };

    let mut res = AdmissionResponse::from(&req);
    if let Some(obj) = &req.object {
        if let Err(reason) = validate_spec(obj, req.kind.version == "v1alpha2") {
            res = res.deny(reason);
        }
    }
    Json(res.into_review())
}

fn validate_spec(obj: &DynamicObject, is_v1alpha2: bool) -> Result<(), String> {
    let spec: SpecView = obj
        .data
        .get("spec")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("could not parse spec: {e}"))?
        .unwrap_or(SpecView { tenants: Vec::new() });

    if spec.tenants.is_empty() {
        return Err("at least one tenant is required".to_string());
    }

    let mut seen = HashSet::new();
    for tenant in &spec.tenants {
        let name = tenant.name();
        if name == FORBIDDEN_TENANT {
            return Err(format!("tenant ID \"{FORBIDDEN_TENANT}\" is not allowed"));
        }
        if !seen.insert(name) {
            return Err(format!("tenant ID \"{name}\" is declared more than once"));
        }
        let result = if is_v1alpha2 {
            validate_tenant_id(name)
        } else {
            validate_tenant_id_v1alpha1(name)
        };
        result.map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj_with_tenants(json: serde_json::Value) -> DynamicObject {
        let mut obj = DynamicObject::new(
            "test",
            &kube::core::ApiResource {
                group: "observability.giantswarm.io".into(),
                version: "v1alpha2".into(),
                api_version: "observability.giantswarm.io/v1alpha2".into(),
                kind: "GrafanaOrganization".into(),
                plural: "grafanaorganizations".into(),
            },
        );
        obj.data = serde_json::json!({ "spec": { "tenants": json } });
        obj
    }

    #[test]
    fn rejects_empty_tenant_list() {
        let obj = obj_with_tenants(serde_json::json!([]));
        assert_eq!(
            validate_spec(&obj, true),
            Err("at least one tenant is required".to_string())
        );
    }

    #[test]
    fn rejects_forbidden_literal() {
        let obj = obj_with_tenants(serde_json::json!([{"name": "__mimir_cluster", "types": ["data"]}]));
        assert_eq!(
            validate_spec(&obj, true),
            Err("tenant ID \"__mimir_cluster\" is not allowed".to_string())
        );
    }

    #[test]
    fn rejects_duplicate_tenants() {
        let obj = obj_with_tenants(serde_json::json!([
            {"name": "gs", "types": ["data"]},
            {"name": "gs", "types": ["alerting"]}
        ]));
        assert_eq!(
            validate_spec(&obj, true),
            Err("tenant ID \"gs\" is declared more than once".to_string())
        );
    }

    #[test]
    fn accepts_valid_v1alpha2_spec() {
        let obj = obj_with_tenants(serde_json::json!([{"name": "gs", "types": ["data"]}]));
        assert!(validate_spec(&obj, true).is_ok());
    }

    #[test]
    fn v1alpha1_tolerates_the_looser_pattern() {
        let obj = obj_with_tenants(serde_json::json!(["has-dash"]));
        assert!(validate_spec(&obj, false).is_ok());
        assert!(validate_spec(&obj, true).is_err());
    }
}
