use crate::policy::Policy;
use json_patch::{Patch, PatchOperation};
use kyverno_admission_k8s_api::policy::ValidationFailureAction;
use serde_json::Value;
use std::{collections::BTreeMap, fmt, time::Duration};

/// The outcome of applying one policy to one resource.
#[derive(Clone, Debug)]
pub struct EngineResponse {
    pub policy: Policy,
    pub resource: ResourceKey,
    /// The resource after every successful rule of this policy was applied.
    pub patched_resource: Value,
    pub rules: Vec<RuleResponse>,
    pub processing_time: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuleResponse {
    pub name: String,
    pub rule_type: RuleType,
    pub status: RuleStatus,
    pub message: String,
    pub patches: Vec<PatchOperation>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuleType {
    Mutation,
    Validation,
    Generation,
    ImageVerify,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuleStatus {
    /// The resource satisfied the rule.
    Pass,
    /// The resource violated the rule: an authored denial.
    Fail,
    Warn,
    /// The rule could not be evaluated: an infrastructure failure.
    Error,
    Skip,
}

/// Identifies the resource an engine response is about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

// === impl EngineResponse ===

impl EngineResponse {
    pub fn new(policy: Policy, patched_resource: Value) -> Self {
        Self {
            policy,
            resource: ResourceKey::from_value(&patched_resource),
            patched_resource,
            rules: Vec::new(),
            processing_time: Duration::ZERO,
        }
    }

    pub fn with_rule(mut self, rule: RuleResponse) -> Self {
        self.rules.push(rule);
        self
    }

    /// No rule failed or errored.
    pub fn is_successful(&self) -> bool {
        !self
            .rules
            .iter()
            .any(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
    }

    pub fn is_failed(&self) -> bool {
        self.rules.iter().any(|r| r.status == RuleStatus::Fail)
    }

    pub fn is_error(&self) -> bool {
        self.rules.iter().any(|r| r.status == RuleStatus::Error)
    }

    /// Names of rules that failed or errored.
    pub fn failed_rules(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn success_rules(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Pass)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// All rule patches of this response, in rule order.
    pub fn patches(&self) -> Patch {
        Patch(
            self.rules
                .iter()
                .flat_map(|r| r.patches.iter().cloned())
                .collect(),
        )
    }

    pub fn validation_failure_action(&self) -> ValidationFailureAction {
        self.policy.validation_failure_action()
    }
}

// === impl RuleResponse ===

impl RuleResponse {
    pub fn new(
        name: impl ToString,
        rule_type: RuleType,
        status: RuleStatus,
        message: impl ToString,
    ) -> Self {
        Self {
            name: name.to_string(),
            rule_type,
            status,
            message: message.to_string(),
            patches: Vec::new(),
        }
    }

    pub fn with_patches(mut self, patches: Vec<PatchOperation>) -> Self {
        self.patches = patches;
        self
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutation => "Mutation".fmt(f),
            Self::Validation => "Validation".fmt(f),
            Self::Generation => "Generation".fmt(f),
            Self::ImageVerify => "ImageVerify".fmt(f),
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => "pass".fmt(f),
            Self::Fail => "fail".fmt(f),
            Self::Warn => "warn".fmt(f),
            Self::Error => "error".fmt(f),
            Self::Skip => "skip".fmt(f),
        }
    }
}

// === impl ResourceKey ===

impl ResourceKey {
    pub fn from_value(resource: &Value) -> Self {
        let field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let metadata = resource.get("metadata").cloned().unwrap_or(Value::Null);
        Self {
            api_version: field(resource, "apiVersion").unwrap_or_default(),
            kind: field(resource, "kind").unwrap_or_default(),
            namespace: field(&metadata, "namespace").filter(|ns| !ns.is_empty()),
            name: field(&metadata, "name")
                .or_else(|| field(&metadata, "generateName"))
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One warning per rule that neither passed nor was skipped.
pub fn warnings(responses: &[EngineResponse]) -> Vec<String> {
    responses
        .iter()
        .flat_map(|er| {
            er.rules
                .iter()
                .filter(|r| !matches!(r.status, RuleStatus::Pass | RuleStatus::Skip))
                .map(move |r| format!("policy {}.{}: {}", er.policy.name(), r.name, r.message))
        })
        .collect()
}

/// Describes every non-passing rule of every given response.
///
/// The resulting message names the resource, whether any rule reported a
/// violation (as opposed to only errors), and lists the reason of each rule
/// grouped by policy.
pub fn blocked_message(responses: &[EngineResponse]) -> String {
    let Some(first) = responses.first() else {
        return String::new();
    };

    let mut failures = BTreeMap::<String, BTreeMap<String, String>>::new();
    let mut has_violations = false;
    for er in responses {
        for rule in er.rules.iter().filter(|r| r.status != RuleStatus::Pass) {
            has_violations |= rule.status == RuleStatus::Fail;
            failures
                .entry(er.policy.name())
                .or_default()
                .insert(rule.name.clone(), rule.message.clone());
        }
    }

    let reason = if has_violations { "violation" } else { "error" };
    let details = serde_yaml::to_string(&failures).unwrap_or_else(|error| error.to_string());
    format!(
        "\n\npolicy {} for resource {}: \n\n{}",
        first.resource, reason, details
    )
}
