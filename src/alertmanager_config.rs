//! Per-tenant Alertmanager config merging (spec.md §4.8).
//!
//! Merge tie-break (decided open question, SPEC_FULL.md §16): tenant values win over base values
//! for any overlapping top-level key, except `route.routes` and `templates` (concatenated, base
//! first) and `receivers` (unioned by name, tenant entries replacing base entries of the same
//! name).

use serde_yaml::{Mapping, Value};

use crate::Error;

/// Merge a tenant's Alertmanager config YAML into the operator's base configuration.
pub fn merge(base: &str, tenant_config: &str, tenant: &str) -> crate::Result<String> {
    let base: Value = serde_yaml::from_str(base)?;
    let overlay: Value = serde_yaml::from_str(tenant_config)
        .map_err(|e| Error::IllegalAlertmanagerConfig(tenant.to_string(), e.to_string()))?;

    let base = base.as_mapping().cloned().ok_or_else(|| {
        Error::IllegalAlertmanagerConfig(tenant.to_string(), "base config is not a mapping".into())
    })?;
    let overlay = overlay.as_mapping().cloned().ok_or_else(|| {
        Error::IllegalAlertmanagerConfig(tenant.to_string(), "tenant config is not a mapping".into())
    })?;

    let merged = merge_top_level(base, overlay);
    serde_yaml::to_string(&Value::Mapping(merged)).map_err(Error::from)
}

fn key(s: &str) -> Value {
    Value::String(s.to_string())
}

fn merge_top_level(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (k, overlay_value) in overlay {
        let Some(name) = k.as_str() else {
            base.insert(k, overlay_value);
            continue;
        };

        match name {
            "route" => {
                let merged_route = merge_route(base.get("route").cloned(), overlay_value);
                base.insert(key("route"), merged_route);
            }
            "templates" => {
                let merged = concat_sequences(base.get("templates").cloned(), overlay_value);
                base.insert(key("templates"), merged);
            }
            "receivers" => {
                let merged = union_by_name(base.get("receivers").cloned(), overlay_value);
                base.insert(key("receivers"), merged);
            }
            _ => {
                base.insert(k, overlay_value);
            }
        }
    }
    base
}

/// `route` itself is a mapping whose `routes` sub-key concatenates; every other key in `route`
/// (receiver, group_by, continue, matchers...) follows the normal tenant-wins rule.
fn merge_route(base: Option<Value>, overlay: Value) -> Value {
    let Some(base_route) = base.and_then(|v| v.as_mapping().cloned()) else {
        return overlay;
    };
    let Some(mut overlay_route) = overlay.as_mapping().cloned() else {
        return Value::Mapping(base_route);
    };

    let base_sub_routes = base_route.get("routes").cloned();
    let overlay_sub_routes = overlay_route.remove(key("routes"));

    let mut merged = base_route;
    for (k, v) in overlay_route {
        merged.insert(k, v);
    }

    if base_sub_routes.is_some() || overlay_sub_routes.is_some() {
        merged.insert(key("routes"), concat_sequences(base_sub_routes, overlay_sub_routes.unwrap_or(Value::Sequence(vec![]))));
    }

    Value::Mapping(merged)
}

fn concat_sequences(base: Option<Value>, overlay: Value) -> Value {
    let mut items = base.and_then(|v| v.as_sequence().cloned()).unwrap_or_default();
    if let Some(overlay_items) = overlay.as_sequence() {
        items.extend(overlay_items.iter().cloned());
    }
    Value::Sequence(items)
}

fn union_by_name(base: Option<Value>, overlay: Value) -> Value {
    let base_items = base.and_then(|v| v.as_sequence().cloned()).unwrap_or_default();
    let overlay_items = overlay.as_sequence().cloned().unwrap_or_default();

    let overlay_names: std::collections::HashSet<&str> = overlay_items
        .iter()
        .filter_map(|v| v.as_mapping())
        .filter_map(|m| m.get("name"))
        .filter_map(|n| n.as_str())
        .collect();

    let mut merged: Vec<Value> = base_items
        .into_iter()
        .filter(|v| {
            v.as_mapping()
                .and_then(|m| m.get("name"))
                .and_then(|n| n.as_str())
                .map(|n| !overlay_names.contains(n))
                .unwrap_or(true)
        })
        .collect();
    merged.extend(overlay_items);
    Value::Sequence(merged)
}

/// Count the top-level routes in a merged config, for the
/// `observability_operator_alertmanager_routes{tenant}` gauge (spec.md §4.8 step 4).
pub fn count_routes(merged_config: &str) -> usize {
    let Ok(doc) = serde_yaml::from_str::<Value>(merged_config) else {
        return 0;
    };
    doc.as_mapping()
        .and_then(|m| m.get("route"))
        .and_then(|r| r.as_mapping())
        .and_then(|r| r.get("routes"))
        .and_then(|r| r.as_sequence())
        .map(|s| s.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
global:
  resolve_timeout: 5m
route:
  receiver: default
  group_by: ["alertname"]
  routes:
    - receiver: heartbeat
      match:
        alertname: Heartbeat
receivers:
  - name: default
    webhook_configs:
      - url: http://base-webhook
  - name: heartbeat
    webhook_configs:
      - url: http://heartbeat
templates:
  - /etc/alertmanager/templates/base.tmpl
"#;

    #[test]
    fn concatenates_routes_and_templates() {
        let tenant = r#"
route:
  routes:
    - receiver: tenant-pager
      match:
        severity: critical
templates:
  - /etc/alertmanager/templates/tenant.tmpl
receivers:
  - name: tenant-pager
    webhook_configs:
      - url: http://tenant-pager
"#;
        let merged = merge(BASE, tenant, "acme").unwrap();
        let routes = count_routes(&merged);
        assert_eq!(routes, 2);
        assert!(merged.contains("base.tmpl"));
        assert!(merged.contains("tenant.tmpl"));
    }

    #[test]
    fn tenant_receiver_overrides_base_receiver_of_same_name() {
        let tenant = r#"
receivers:
  - name: default
    webhook_configs:
      - url: http://tenant-default-override
"#;
        let merged = merge(BASE, tenant, "acme").unwrap();
        let doc: Value = serde_yaml::from_str(&merged).unwrap();
        let receivers = doc["receivers"].as_sequence().unwrap();
        assert_eq!(receivers.len(), 2);
        let default_receiver = receivers
            .iter()
            .find(|r| r["name"] == Value::String("default".into()))
            .unwrap();
        assert_eq!(
            default_receiver["webhook_configs"][0]["url"],
            Value::String("http://tenant-default-override".into())
        );
    }

    #[test]
    fn tenant_wins_on_overlapping_scalar_top_level_keys() {
        let tenant = r#"
global:
  resolve_timeout: 1m
"#;
        let merged = merge(BASE, tenant, "acme").unwrap();
        let doc: Value = serde_yaml::from_str(&merged).unwrap();
        assert_eq!(doc["global"]["resolve_timeout"], Value::String("1m".into()));
    }

    #[test]
    fn malformed_tenant_yaml_is_reported_as_illegal() {
        let err = merge(BASE, "not: [valid", "acme").unwrap_err();
        assert!(matches!(err, Error::IllegalAlertmanagerConfig(t, _) if t == "acme"));
    }

    #[test]
    fn count_routes_counts_top_level_entries_only() {
        let merged = merge(BASE, "route:\n  routes: []\n", "acme").unwrap();
        assert_eq!(count_routes(&merged), 1);
    }
}
