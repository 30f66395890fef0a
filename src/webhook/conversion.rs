//! `GrafanaOrganization` CRD conversion webhook (spec.md §3 "Conversion", §4.10).
//!
//! `apiextensions.k8s.io/v1` `ConversionReview` is not modeled by `kube`'s `admission` module
//! (that module only covers `AdmissionReview`), so the wire format is hand-rolled here, matching
//! the shape the API server actually sends: a list of raw objects to convert to `desiredAPIVersion`,
//! answered with the same list converted, or a non-2xx `status`.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resources::{convert, v1alpha1, v1alpha2};

use super::WebhookContext;

const API_VERSION: &str = "apiextensions.k8s.io/v1";
const KIND: &str = "ConversionReview";

#[derive(Deserialize)]
pub struct ConversionReview {
    pub request: ConversionRequest,
}

#[derive(Deserialize)]
pub struct ConversionRequest {
    pub uid: String,
    #[serde(rename = "desiredAPIVersion")]
    pub desired_api_version: String,
    pub objects: Vec<DynamicObject>,
}

#[derive(Serialize)]
pub struct ConversionReviewResponse {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    response: ConversionResponse,
}

#[derive(Serialize)]
pub struct ConversionResponse {
    uid: String,
    result: Status,
    #[serde(rename = "convertedObjects")]
    converted_objects: Vec<DynamicObject>,
}

#[derive(Serialize)]
pub struct Status {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn convert(
    State(_ctx): State<Arc<WebhookContext>>,
    Json(body): Json<Value>,
) -> Json<ConversionReviewResponse> {
    let review: ConversionReview = match serde_json::from_value(body) {
        Ok(review) => review,
        Err(e) => {
            return Json(failure(String::new(), format!("could not parse ConversionReview: {e}")))
        }
    };
    let req = review.request;

    match convert_objects(&req.objects, &req.desired_api_version) {
        Ok(converted) => Json(ConversionReviewResponse {
            api_version: API_VERSION,
            kind: KIND,
            response: ConversionResponse {
                uid: req.uid,
                result: Status { status: "Success", message: None },
                converted_objects: converted,
            },
        }),
        Err(e) => Json(failure(req.uid, e)),
    }
}

fn failure(uid: String, message: String) -> ConversionReviewResponse {
    ConversionReviewResponse {
        api_version: API_VERSION,
        kind: KIND,
        response: ConversionResponse {
            uid,
            result: Status { status: "Failed", message: Some(message) },
            converted_objects: Vec::new(),
        },
    }
}

fn convert_objects(objects: &[DynamicObject], desired_api_version: &str) -> Result<Vec<DynamicObject>, String> {
    objects
        .iter()
        .map(|obj| convert_one(obj, desired_api_version))
        .collect()
}

fn convert_one(obj: &DynamicObject, desired_api_version: &str) -> Result<DynamicObject, String> {
    let current_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.as_str())
        .unwrap_or_default();

    if current_version == desired_api_version {
        return Ok(obj.clone());
    }

    let mut converted = obj.clone();
    if let Some(types) = &mut converted.types {
        types.api_version = desired_api_version.to_string();
    }

    let spec: Value = obj.data.get("spec").cloned().unwrap_or(Value::Null);
    let status: Option<Value> = obj.data.get("status").cloned();

    let (new_spec, new_status) = match desired_api_version.rsplit_once('/') {
        Some((_, "v1alpha2")) => {
            let spec: v1alpha1::GrafanaOrganizationSpec =
                serde_json::from_value(spec).map_err(|e| format!("could not parse v1alpha1 spec: {e}"))?;
            let status: Option<v1alpha1::GrafanaOrganizationStatus> = status
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| format!("could not parse v1alpha1 status: {e}"))?;
            (
                serde_json::to_value(convert::up(spec)).map_err(|e| e.to_string())?,
                status
                    .map(convert::status_up)
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| e.to_string())?,
            )
        }
        Some((_, "v1alpha1")) => {
            let spec: v1alpha2::GrafanaOrganizationSpec =
                serde_json::from_value(spec).map_err(|e| format!("could not parse v1alpha2 spec: {e}"))?;
            let status: Option<v1alpha2::GrafanaOrganizationStatus> = status
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| format!("could not parse v1alpha2 status: {e}"))?;
            (
                serde_json::to_value(convert::down(spec)).map_err(|e| e.to_string())?,
                status
                    .map(convert::status_down)
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| e.to_string())?,
            )
        }
        _ => return Err(format!("unsupported desiredAPIVersion \"{desired_api_version}\"")),
    };

    if let Some(map) = converted.data.as_object_mut() {
        map.insert("spec".to_string(), new_spec);
        if let Some(status) = new_status {
            map.insert("status".to_string(), status);
        }
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, TypeMeta};

    fn object(api_version: &str, spec: Value) -> DynamicObject {
        let mut obj = DynamicObject::new(
            "default",
            &ApiResource {
                group: "observability.giantswarm.io".into(),
                version: "v1alpha1".into(),
                api_version: api_version.into(),
                kind: "GrafanaOrganization".into(),
                plural: "grafanaorganizations".into(),
            },
        );
        obj.types = Some(TypeMeta {
            api_version: api_version.into(),
            kind: "GrafanaOrganization".into(),
        });
        obj.data = serde_json::json!({ "spec": spec });
        obj
    }

    #[test]
    fn upgrades_v1alpha1_tenants_to_data_only() {
        let obj = object(
            "observability.giantswarm.io/v1alpha1",
            serde_json::json!({ "displayName": "Giant Swarm", "tenants": ["gs"] }),
        );
        let converted =
            convert_one(&obj, "observability.giantswarm.io/v1alpha2").expect("conversion succeeds");
        let spec = converted.data.get("spec").unwrap();
        assert_eq!(spec["tenants"][0]["name"], "gs");
        assert_eq!(spec["tenants"][0]["types"][0], "data");
    }

    #[test]
    fn downgrades_dropping_alerting_bit() {
        let obj = object(
            "observability.giantswarm.io/v1alpha2",
            serde_json::json!({
                "displayName": "Giant Swarm",
                "tenants": [{"name": "gs", "types": ["data", "alerting"]}]
            }),
        );
        let converted =
            convert_one(&obj, "observability.giantswarm.io/v1alpha1").expect("conversion succeeds");
        let spec = converted.data.get("spec").unwrap();
        assert_eq!(spec["tenants"][0], "gs");
    }

    #[test]
    fn same_version_is_a_no_op() {
        let obj = object(
            "observability.giantswarm.io/v1alpha1",
            serde_json::json!({ "displayName": "Giant Swarm", "tenants": ["gs"] }),
        );
        let converted =
            convert_one(&obj, "observability.giantswarm.io/v1alpha1").expect("conversion succeeds");
        assert_eq!(converted.data, obj.data);
    }
}
