use json_patch::Patch;
use kyverno_admission_core::{RuleResponse, RuleStatus, RuleType};
use kyverno_admission_k8s_api::policy::{Mutation, Rule};
use serde_json::Value;

/// Applies a rule's `patchesJson6902` to `resource`.
///
/// `resource` is only updated when every operation applies. A document that
/// cannot be parsed is an error in the policy; operations that cannot be
/// applied to this resource fail the rule.
pub(crate) fn apply(rule: &Rule, mutation: &Mutation, resource: &mut Value) -> RuleResponse {
    let Some(doc) = mutation.patches_json6902.as_deref() else {
        return RuleResponse::new(
            &rule.name,
            RuleType::Mutation,
            RuleStatus::Skip,
            "no patches declared",
        );
    };

    let patch = match parse(doc) {
        Ok(patch) => patch,
        Err(error) => {
            return RuleResponse::new(
                &rule.name,
                RuleType::Mutation,
                RuleStatus::Error,
                format!("failed to parse patchesJson6902: {error}"),
            )
        }
    };

    let mut patched = resource.clone();
    if let Err(error) = json_patch::patch(&mut patched, &patch.0) {
        return RuleResponse::new(
            &rule.name,
            RuleType::Mutation,
            RuleStatus::Fail,
            format!("failed to apply patchesJson6902: {error}"),
        );
    }
    *resource = patched;

    RuleResponse::new(
        &rule.name,
        RuleType::Mutation,
        RuleStatus::Pass,
        format!("mutated resource with {} operation(s)", patch.0.len()),
    )
    .with_patches(patch.0)
}

/// Parses operations written as YAML or JSON.
fn parse(doc: &str) -> anyhow::Result<Patch> {
    let value = serde_yaml::from_str::<Value>(doc)?;
    Ok(serde_json::from_value(value)?)
}
