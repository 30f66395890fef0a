//! Validating webhook for dashboard `ConfigMap`s (spec.md §4.10): rejects any `*.json` value that
//! isn't a JSON object, or that lacks a non-empty `uid`, or whose owning ConfigMap lacks an
//! organization label/annotation. This is the precondition the dashboard reconciler (spec.md
//! §4.9) relies on to never see an un-resolvable or UID-less dashboard.

use std::{collections::BTreeMap, sync::Arc};

use axum::{extract::State, Json};
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
        DynamicObject,
    },
    ResourceExt,
};

use super::WebhookContext;

const ORGANIZATION_KEY: &str = "observability.giantswarm.io/organization";

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
        if let Err(reason) = validate_configmap(obj) {
            res = res.deny(reason);
        }
    }
    Json(res.into_review())
}

fn validate_configmap(obj: &DynamicObject) -> Result<(), String> {
    let has_organization =
        obj.annotations().contains_key(ORGANIZATION_KEY) || obj.labels().contains_key(ORGANIZATION_KEY);
    if !has_organization {
        return Err(format!(
            "configmap has no `{ORGANIZATION_KEY}` label or annotation"
        ));
    }

    let data: BTreeMap<String, String> = obj
        .data
        .get("data")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("could not parse data: {e}"))?
        .unwrap_or_default();

    for (key, value) in data.iter().filter(|(k, _)| k.ends_with(".json")) {
        let parsed: serde_json::Value = serde_json::from_str(value)
            .map_err(|e| format!("{key}: not valid JSON: {e}"))?;
        let object = parsed
            .as_object()
            .ok_or_else(|| format!("{key}: must be a JSON object"))?;
        let uid = object.get("uid").and_then(|v| v.as_str()).unwrap_or("");
        if uid.is_empty() {
            return Err(format!("{key}: missing a non-empty `uid`"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configmap(
        labels: Vec<(&str, &str)>,
        annotations: Vec<(&str, &str)>,
        data: Vec<(&str, &str)>,
    ) -> DynamicObject {
        let mut obj = DynamicObject::new(
            "dash",
            &kube::core::ApiResource {
                group: String::new(),
                version: "v1".into(),
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
                plural: "configmaps".into(),
            },
        );
        obj.metadata.labels =
            Some(labels.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        obj.metadata.annotations =
            Some(annotations.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        obj.data = serde_json::json!({
            "data": data.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()
        });
        obj
    }

    #[test]
    fn rejects_missing_organization() {
        let obj = configmap(vec![], vec![], vec![("dash.json", r#"{"uid": "a"}"#)]);
        assert!(validate_configmap(&obj).is_err());
    }

    #[test]
    fn rejects_non_object_json() {
        let obj = configmap(
            vec![(ORGANIZATION_KEY, "alpha")],
            vec![],
            vec![("dash.json", "[1,2,3]")],
        );
        assert!(validate_configmap(&obj).is_err());
    }

    #[test]
    fn rejects_missing_uid() {
        let obj = configmap(
            vec![(ORGANIZATION_KEY, "alpha")],
            vec![],
            vec![("dash.json", r#"{"title": "t"}"#)],
        );
        assert!(validate_configmap(&obj).is_err());
    }

    #[test]
    fn accepts_valid_dashboard() {
        let obj = configmap(
            vec![(ORGANIZATION_KEY, "alpha")],
            vec![],
            vec![("dash.json", r#"{"uid": "abc", "title": "t"}"#)],
        );
        assert!(validate_configmap(&obj).is_ok());
    }

    #[test]
    fn ignores_non_json_keys() {
        let obj = configmap(
            vec![(ORGANIZATION_KEY, "alpha")],
            vec![],
            vec![("README.md", "not a dashboard")],
        );
        assert!(validate_configmap(&obj).is_ok());
    }
}
