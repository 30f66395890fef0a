//! `TenantID` validation shared between the admission webhook and the reconcilers
//! (spec.md §3 `GrafanaOrganization.TenantID`).

use lazy_static::lazy_static;
use regex::Regex;

/// Literal tenant name that must never be admitted: it's the Mimir-internal pseudo-tenant used
/// for cluster-wide cardinality metrics.
pub const FORBIDDEN_TENANT: &str = "__mimir_cluster";

lazy_static! {
    /// The Alloy-identifier pattern enforced for v1alpha2 tenants. v1alpha1 tolerated a looser
    /// Mimir pattern and is not re-validated against this on read.
    static ref ALLOY_IDENTIFIER: Regex = Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TenantIdError {
    #[error("tenant ID must not be empty")]
    Empty,
    #[error("tenant ID \"{0}\" is longer than 150 characters")]
    TooLong(String),
    #[error("tenant ID \"{0}\" is not allowed")]
    Forbidden(String),
    #[error("tenant ID \"{0}\" does not match the required pattern ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidPattern(String),
}

/// Validate a tenant ID against the v1alpha2 rules (spec.md §3): non-empty, <=150 chars, not the
/// forbidden literal, and matching the Alloy identifier pattern.
pub fn validate_tenant_id(id: &str) -> Result<(), TenantIdError> {
    if id.is_empty() {
        return Err(TenantIdError::Empty);
    }
    if id.len() > 150 {
        return Err(TenantIdError::TooLong(id.to_string()));
    }
    if id == FORBIDDEN_TENANT {
        return Err(TenantIdError::Forbidden(id.to_string()));
    }
    if !ALLOY_IDENTIFIER.is_match(id) {
        return Err(TenantIdError::InvalidPattern(id.to_string()));
    }
    Ok(())
}

/// Validate a tenant ID against the looser v1alpha1 rules: non-empty, <=150 chars, not the
/// forbidden literal. The stricter Alloy pattern is not enforced for backward compatibility.
pub fn validate_tenant_id_v1alpha1(id: &str) -> Result<(), TenantIdError> {
    if id.is_empty() {
        return Err(TenantIdError::Empty);
    }
    if id.len() > 150 {
        return Err(TenantIdError::TooLong(id.to_string()));
    }
    if id == FORBIDDEN_TENANT {
        return Err(TenantIdError::Forbidden(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_forbidden_literal() {
        assert_eq!(
            validate_tenant_id(FORBIDDEN_TENANT),
            Err(TenantIdError::Forbidden(FORBIDDEN_TENANT.into()))
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_tenant_id(""), Err(TenantIdError::Empty));
    }

    #[test]
    fn rejects_bad_pattern() {
        assert!(validate_tenant_id("1abc").is_err());
        assert!(validate_tenant_id("has-dash").is_err());
    }

    #[test]
    fn accepts_valid() {
        assert!(validate_tenant_id("gs").is_ok());
        assert!(validate_tenant_id("_private_1").is_ok());
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(151);
        assert!(matches!(
            validate_tenant_id(&long),
            Err(TenantIdError::TooLong(_))
        ));
    }
}
