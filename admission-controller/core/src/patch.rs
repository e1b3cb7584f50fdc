use crate::response::{EngineResponse, RuleStatus, RuleType};
use json_patch::{Patch, PatchOperation};
use serde_json::{json, Value};

/// Records which rules changed a resource, and how.
pub const LAST_APPLIED_PATCHES_ANNOTATION: &str = "policies.kyverno.io/last-applied-patches";

/// An ordered sequence of JSON patches.
///
/// Order matters: each patch assumes that every patch before it has already
/// been applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchSet(Vec<Patch>);

// === impl PatchSet ===

impl PatchSet {
    /// Appends a patch; empty patches are dropped.
    pub fn push(&mut self, patch: Patch) {
        if !patch.0.is_empty() {
            self.0.push(patch);
        }
    }

    /// Inserts a patch ahead of every patch already in the set.
    pub fn prepend(&mut self, patch: Patch) {
        if !patch.0.is_empty() {
            self.0.insert(0, patch);
        }
    }

    pub fn extend(&mut self, other: PatchSet) {
        self.0.extend(other.0);
    }

    /// Concatenates every patch, in order, into a single patch. Returns `None`
    /// when there is nothing to apply so that callers never emit an empty
    /// patch.
    pub fn join(self) -> Option<Patch> {
        let ops = self.0.into_iter().flat_map(|p| p.0).collect::<Vec<_>>();
        if ops.is_empty() {
            return None;
        }
        Some(Patch(ops))
    }
}

impl From<Patch> for PatchSet {
    fn from(patch: Patch) -> Self {
        let mut set = Self::default();
        set.push(patch);
        set
    }
}

/// Escapes a single JSON pointer segment.
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Builds a single patch operation.
pub fn operation(op: &str, path: &str, value: Option<Value>) -> serde_json::Result<PatchOperation> {
    let mut operation = json!({ "op": op, "path": path });
    if let Some(value) = value {
        operation["value"] = value;
    }
    serde_json::from_value(operation)
}

/// Builds the operation that sets `key` in the resource's annotations.
///
/// When the resource has no annotations yet the whole map is added, since a
/// JSON pointer cannot address a member of a missing object.
pub fn set_annotation(
    resource: &Value,
    key: &str,
    value: String,
) -> serde_json::Result<PatchOperation> {
    let annotations = resource
        .pointer("/metadata/annotations")
        .and_then(Value::as_object);
    match annotations {
        Some(annotations) if annotations.contains_key(key) => operation(
            "replace",
            &format!("/metadata/annotations/{}", escape(key)),
            Some(Value::String(value)),
        ),
        Some(_) => operation(
            "add",
            &format!("/metadata/annotations/{}", escape(key)),
            Some(Value::String(value)),
        ),
        None => operation("add", "/metadata/annotations", Some(json!({ key: value }))),
    }
}

/// Describes one applied operation as `<rule>.<policy>.kyverno.io: <verb> <path>`.
fn describe(policy: &str, rule: &str, op: &PatchOperation) -> Option<String> {
    let op = serde_json::to_value(op).ok()?;
    let verb = match op.get("op")?.as_str()? {
        "add" => "added",
        "remove" => "removed",
        "replace" => "replaced",
        "move" => "moved",
        "copy" => "copied",
        "test" => "tested",
        other => other,
    }
    .to_string();
    let path = op.get("path")?.as_str()?;
    Some(format!("{rule}.{policy}.kyverno.io: {verb} {path}"))
}

/// Builds the patch recording which mutation rules fired, or `None` when no
/// rule produced a change.
///
/// `resource` is the resource the patch will be applied to, i.e. the result
/// of every functional patch.
pub fn annotation_patches(
    responses: &[EngineResponse],
    resource: &Value,
) -> serde_json::Result<Option<Patch>> {
    let mut applied = Vec::new();
    for er in responses {
        let policy = er.policy.name();
        let rules = er
            .rules
            .iter()
            .filter(|r| r.rule_type == RuleType::Mutation && r.status == RuleStatus::Pass);
        for rule in rules {
            applied.extend(rule.patches.iter().filter_map(|op| describe(&policy, &rule.name, op)));
        }
    }
    if applied.is_empty() {
        return Ok(None);
    }

    let value = serde_yaml::to_string(&applied).map_err(serde::ser::Error::custom)?;
    let op = set_annotation(resource, LAST_APPLIED_PATCHES_ANNOTATION, value)?;
    Ok(Some(Patch(vec![op])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn label(key: &str, value: &str) -> Patch {
        Patch(vec![operation(
            "add",
            &format!("/metadata/labels/{}", escape(key)),
            Some(json!(value)),
        )
        .expect("operation must be valid")])
    }

    #[test]
    fn join_preserves_order_and_drops_empty() {
        let mut set = PatchSet::default();
        set.push(label("a", "1"));
        set.push(Patch(vec![]));
        set.push(label("b", "2"));
        assert_eq!(set.0.len(), 2);

        let joined = set.join().expect("patch must be present");
        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!([
                { "op": "add", "path": "/metadata/labels/a", "value": "1" },
                { "op": "add", "path": "/metadata/labels/b", "value": "2" },
            ])
        );
    }

    #[test]
    fn empty_join_is_absent() {
        let mut set = PatchSet::default();
        set.push(Patch(vec![]));
        assert!(set.0.is_empty());
        assert_eq!(set.join(), None);
    }

    #[test]
    fn prepend_goes_first() {
        let mut set = PatchSet::from(label("a", "1"));
        set.prepend(label("first", "0"));
        let joined = serde_json::to_value(set.join().unwrap()).unwrap();
        assert_eq!(joined[0]["path"], "/metadata/labels/first");
    }

    #[test]
    fn escapes_pointer_segments() {
        assert_eq!(escape("kyverno.io/verify-images"), "kyverno.io~1verify-images");
        assert_eq!(escape("a~b"), "a~0b");
    }

    #[test]
    fn set_annotation_adapts_to_existing_annotations() {
        let bare = json!({ "metadata": { "name": "pod" } });
        let op = serde_json::to_value(set_annotation(&bare, "x/y", "1".into()).unwrap()).unwrap();
        assert_eq!(
            op,
            json!({ "op": "add", "path": "/metadata/annotations", "value": { "x/y": "1" } })
        );

        let annotated = json!({ "metadata": { "annotations": { "other": "v" } } });
        let op =
            serde_json::to_value(set_annotation(&annotated, "x/y", "1".into()).unwrap()).unwrap();
        assert_eq!(
            op,
            json!({ "op": "add", "path": "/metadata/annotations/x~1y", "value": "1" })
        );

        let existing = json!({ "metadata": { "annotations": { "x/y": "0" } } });
        let op =
            serde_json::to_value(set_annotation(&existing, "x/y", "1".into()).unwrap()).unwrap();
        assert_eq!(
            op,
            json!({ "op": "replace", "path": "/metadata/annotations/x~1y", "value": "1" })
        );
    }
}
