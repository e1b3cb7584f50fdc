use anyhow::{anyhow, ensure, Result};
use kyverno_admission_core::SchemaValidator;
use serde_json::Value;

/// Checks the structure every Kubernetes object shares, without per-kind
/// schemas.
#[derive(Clone, Debug, Default)]
pub struct StructuralValidator(());

impl SchemaValidator for StructuralValidator {
    fn validate_resource(&self, resource: &Value, api_version: &str, kind: &str) -> Result<()> {
        ensure!(resource.is_object(), "{kind} is not an object");
        ensure!(!api_version.is_empty(), "apiVersion is required");
        ensure!(!kind.is_empty(), "kind is required");

        let metadata = resource
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("metadata is required"))?;
        let named = ["name", "generateName"].iter().any(|k| {
            metadata
                .get(*k)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty())
        });
        ensure!(named, "metadata.name or metadata.generateName is required");

        for field in ["labels", "annotations"] {
            let Some(map) = metadata.get(field).filter(|m| !m.is_null()) else {
                continue;
            };
            let map = map
                .as_object()
                .ok_or_else(|| anyhow!("metadata.{field} must be a map"))?;
            for (key, value) in map {
                ensure!(value.is_string(), "metadata.{field}.{key} must be a string");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(resource: Value) -> Result<()> {
        StructuralValidator::default().validate_resource(&resource, "v1", "ConfigMap")
    }

    #[test]
    fn accepts_well_formed_objects() {
        validate(json!({
            "metadata": { "name": "cm", "labels": { "a": "1" }, "annotations": null },
        }))
        .expect("resource must be valid");
        validate(json!({ "metadata": { "generateName": "cm-" } }))
            .expect("generated name must be valid");
    }

    #[test]
    fn rejects_malformed_objects() {
        assert!(validate(json!({ "metadata": {} })).is_err());
        assert!(validate(json!({ "metadata": { "name": "cm", "labels": ["a"] } })).is_err());
        assert!(validate(json!({ "metadata": { "name": "cm", "labels": { "a": 1 } } })).is_err());
        assert!(StructuralValidator::default()
            .validate_resource(&json!({ "metadata": { "name": "cm" } }), "", "ConfigMap")
            .is_err());
    }
}
