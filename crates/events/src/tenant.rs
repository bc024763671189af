use serde_json::Value as JsonValue;

use hubcast_core::TenantId;

use crate::Event;

/// Payload keys consulted, in order, when looking for a tenant scope.
pub const DEFAULT_TENANT_KEYS: &[&str] = &["project_id", "tenant_id"];

/// Outcome of looking for a tenant scope in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadTenant {
    /// No tenant key carries a value (missing or `null`).
    Absent,
    Scoped(TenantId),
    /// A tenant key is set but its value cannot scope a topic
    /// (delimiters, wildcards, fractions, objects, blank strings).
    Unusable { key: String, raw: String },
}

impl PayloadTenant {
    pub fn scoped(self) -> Option<TenantId> {
        match self {
            PayloadTenant::Scoped(tenant) => Some(tenant),
            PayloadTenant::Absent | PayloadTenant::Unusable { .. } => None,
        }
    }
}

/// Find the tenant a payload belongs to.
///
/// The first key holding a non-null value decides; later keys are not
/// consulted even when that value is unusable. Payloads that are not
/// objects never carry a tenant.
pub fn tenant_from_payload(payload: &JsonValue, keys: &[impl AsRef<str>]) -> PayloadTenant {
    let Some(obj) = payload.as_object() else {
        return PayloadTenant::Absent;
    };
    for key in keys {
        let value = match obj.get(key.as_ref()) {
            None | Some(JsonValue::Null) => continue,
            Some(value) => value,
        };
        return match TenantId::from_json(value) {
            Some(tenant) => PayloadTenant::Scoped(tenant),
            None => PayloadTenant::Unusable {
                key: key.as_ref().to_string(),
                raw: value.to_string(),
            },
        };
    }
    PayloadTenant::Absent
}

/// Helper trait for tenant-scoped messages.
///
/// Infrastructure uses this to decide which tenant a message belongs to
/// without knowing its concrete shape. `None` means the message is not
/// tenant-scoped.
pub trait TenantScoped {
    fn tenant_id(&self) -> Option<TenantId>;
}

impl TenantScoped for Event {
    fn tenant_id(&self) -> Option<TenantId> {
        tenant_from_payload(self.payload(), DEFAULT_TENANT_KEYS).scoped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scoped(tenant: &str) -> PayloadTenant {
        PayloadTenant::Scoped(TenantId::new(tenant).unwrap())
    }

    #[test]
    fn project_id_takes_precedence() {
        let payload = json!({"tenant_id": "b", "project_id": 1});
        assert_eq!(tenant_from_payload(&payload, DEFAULT_TENANT_KEYS), scoped("1"));
    }

    #[test]
    fn null_keys_fall_through_to_later_keys() {
        let payload = json!({"project_id": null, "tenant_id": "acme"});
        assert_eq!(tenant_from_payload(&payload, DEFAULT_TENANT_KEYS), scoped("acme"));
    }

    #[test]
    fn integral_floats_scope_like_integers() {
        let payload = json!({"project_id": 1.0});
        assert_eq!(tenant_from_payload(&payload, DEFAULT_TENANT_KEYS), scoped("1"));
    }

    #[test]
    fn unusable_values_are_not_mistaken_for_absence() {
        for value in [json!("eu.acme"), json!("org:7"), json!(2.5), json!(""), json!({"id": 1})] {
            let payload = json!({"project_id": value, "tenant_id": "fallback"});
            assert!(
                matches!(
                    tenant_from_payload(&payload, DEFAULT_TENANT_KEYS),
                    PayloadTenant::Unusable { ref key, .. } if key == "project_id"
                ),
                "{payload}"
            );
        }
    }

    #[test]
    fn non_objects_have_no_tenant() {
        assert_eq!(tenant_from_payload(&json!([1, 2]), DEFAULT_TENANT_KEYS), PayloadTenant::Absent);
        assert_eq!(tenant_from_payload(&json!({"node_type": "file"}), DEFAULT_TENANT_KEYS), PayloadTenant::Absent);
    }
}
