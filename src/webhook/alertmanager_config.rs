//! Validating webhook for Alertmanager-config Secrets (spec.md §4.10): rejects a Secret with the
//! `alertmanager-config` kind label that has no tenant label, a tenant label naming a tenant no
//! `GrafanaOrganization` declares, or a data payload that isn't valid YAML. Mirrors the shape the
//! alertmanager reconciler (spec.md §4.8) actually reads: whichever single data key is present.

use std::{collections::BTreeSet, sync::Arc};

use axum::{extract::State, Json};
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
        DynamicObject,
    },
    ResourceExt,
};

use crate::tenants::TenantRepository;

use super::WebhookContext;

const LABEL_TENANT: &str = "observability.giantswarm.io/tenant";

pub async fn validate(
    State(ctx): State<Arc<WebhookContext>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(err) => return Json(AdmissionResponse::invalid(err).into_review()),
    };

    let mut res = AdmissionResponse::from(&req);
    if let Some(obj) = &req.object {
        let known = match TenantRepository::new(ctx.client.clone()).list_tenants().await {
            Ok(known) => known,
            Err(e) => {
                return Json(res.deny(format!("could not list known tenants: {e}")).into_review())
            }
        };
        if let Err(reason) = validate_secret(obj, &known) {
            res = res.deny(reason);
        }
    }
    Json(res.into_review())
}

fn validate_secret(obj: &DynamicObject, known_tenants: &BTreeSet<String>) -> Result<(), String> {
    let tenant = obj
        .labels()
        .get(LABEL_TENANT)
        .cloned()
        .ok_or_else(|| format!("secret has no `{LABEL_TENANT}` label"))?;
    if !known_tenants.contains(&tenant) {
        return Err(format!("tenant \"{tenant}\" is not declared by any GrafanaOrganization"));
    }

    let data: std::collections::BTreeMap<String, String> = obj
        .data
        .get("stringData")
        .or_else(|| obj.data.get("data"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("could not parse data: {e}"))?
        .unwrap_or_default();

    let (key, value) = data
        .iter()
        .next()
        .ok_or_else(|| "secret has no data keys".to_string())?;
    serde_yaml::from_str::<serde_yaml::Value>(value)
        .map_err(|e| format!("{key}: not valid YAML: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(labels: Vec<(&str, &str)>, data: Vec<(&str, &str)>) -> DynamicObject {
        let mut obj = DynamicObject::new(
            "amconfig",
            &kube::core::ApiResource {
                group: String::new(),
                version: "v1".into(),
                api_version: "v1".into(),
                kind: "Secret".into(),
                plural: "secrets".into(),
            },
        );
        obj.metadata.labels =
            Some(labels.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        obj.data = serde_json::json!({
            "stringData": data.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<std::collections::BTreeMap<_, _>>()
        });
        obj
    }

    #[test]
    fn rejects_missing_tenant_label() {
        let obj = secret(vec![], vec![("alertmanager.yaml", "route: {}")]);
        let known = BTreeSet::from(["gs".to_string()]);
        assert!(validate_secret(&obj, &known).is_err());
    }

    #[test]
    fn rejects_unknown_tenant() {
        let obj = secret(
            vec![(LABEL_TENANT, "ghost")],
            vec![("alertmanager.yaml", "route: {}")],
        );
        let known = BTreeSet::from(["gs".to_string()]);
        assert!(validate_secret(&obj, &known).is_err());
    }

    #[test]
    fn rejects_invalid_yaml() {
        let obj = secret(vec![(LABEL_TENANT, "gs")], vec![("alertmanager.yaml", "::: not yaml")]);
        let known = BTreeSet::from(["gs".to_string()]);
        assert!(validate_secret(&obj, &known).is_err());
    }

    #[test]
    fn accepts_known_tenant_with_valid_yaml() {
        let obj = secret(vec![(LABEL_TENANT, "gs")], vec![("alertmanager.yaml", "route: {}")]);
        let known = BTreeSet::from(["gs".to_string()]);
        assert!(validate_secret(&obj, &known).is_ok());
    }
}
