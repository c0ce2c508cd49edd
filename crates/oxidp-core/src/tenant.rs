//! Process-wide tenant mapping.
//!
//! Tenants are provisioned out of band and immutable for the lifetime of the
//! process. Each tenant pins a base domain, a default PII partition, and the
//! protocol policies its clients are held to.

use serde::{Deserialize, Serialize};

/// Tenant identifier. Opaque, assigned at provisioning.
pub type TenantId = String;

/// A provisioned tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub tenant_id: TenantId,

    /// Base domain this tenant's issuer lives under.
    pub base_domain: String,

    /// Partition new users land in when the router has nothing better.
    pub default_partition: String,

    /// Protocol policies enforced for every client of this tenant.
    #[serde(default)]
    pub policies: TenantPolicies,
}

/// Protocol policies a tenant enforces on its clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicies {
    /// Require PKCE on every authorization request, not just public clients.
    pub require_pkce: bool,

    /// Redirect URIs must match a registered URI exactly.
    pub strict_redirect: bool,

    /// The `state` parameter is mandatory on authorization requests.
    pub enforce_state: bool,

    /// Public clients may redirect to loopback addresses.
    pub allow_localhost_redirect: bool,
}

impl Default for TenantPolicies {
    fn default() -> Self {
        Self {
            require_pkce: false,
            strict_redirect: true,
            enforce_state: false,
            allow_localhost_redirect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_deserialize_defaults_policies() {
        let json = r#"{
            "tenant_id": "acme",
            "base_domain": "auth.acme.example",
            "default_partition": "default"
        }"#;

        let tenant: Tenant = serde_json::from_str(json).unwrap();
        assert_eq!(tenant.tenant_id, "acme");
        assert!(tenant.policies.strict_redirect);
        assert!(!tenant.policies.require_pkce);
    }
}
