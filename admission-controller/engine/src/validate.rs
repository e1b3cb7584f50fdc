use kyverno_admission_core::{RuleResponse, RuleStatus, RuleType};
use kyverno_admission_k8s_api::policy::{Rule, Validation};

/// Evaluates a validation rule that already applies to the resource.
///
/// A `deny` block rejects every resource the rule selects.
pub(crate) fn evaluate(rule: &Rule, validation: &Validation) -> RuleResponse {
    if validation.deny.is_none() {
        return RuleResponse::new(
            &rule.name,
            RuleType::Validation,
            RuleStatus::Pass,
            format!("validation rule '{}' passed.", rule.name),
        );
    }

    let message = validation
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("validation error: rule {} failed", rule.name));
    RuleResponse::new(&rule.name, RuleType::Validation, RuleStatus::Fail, message)
}
