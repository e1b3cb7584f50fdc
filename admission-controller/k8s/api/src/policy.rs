use super::labels::Selector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A set of rules applied to matching resources in every namespace.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "ClusterPolicy",
    shortname = "cpol"
)]
pub struct ClusterPolicySpec {
    #[serde(flatten)]
    pub inner: PolicySpec,
}

/// A set of rules applied to matching resources in the policy's namespace.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "Policy",
    namespaced,
    shortname = "pol"
)]
pub struct NamespacedPolicySpec {
    #[serde(flatten)]
    pub inner: PolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub failure_policy: Option<FailurePolicy>,
    pub validation_failure_action: Option<ValidationFailureAction>,
    pub background: Option<bool>,
    pub webhook_timeout_seconds: Option<i32>,
}

/// Controls how evaluation errors (as opposed to policy violations) affect
/// the admission decision.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum FailurePolicy {
    #[default]
    Ignore,
    Fail,
}

/// Controls whether a validation failure blocks the request or is only
/// reported.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ValidationFailureAction {
    #[default]
    #[serde(alias = "audit")]
    Audit,
    #[serde(alias = "enforce")]
    Enforce,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,
    pub exclude: Option<MatchResources>,
    pub mutate: Option<Mutation>,
    pub validate: Option<Validation>,
    pub generate: Option<Generation>,
    pub verify_images: Option<Vec<ImageVerification>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct MatchResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ResourceFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ResourceFilter>,
    #[serde(flatten)]
    pub filter: ResourceFilter,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    pub resources: Option<ResourceDescription>,
    pub roles: Option<Vec<String>>,
    pub cluster_roles: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ResourceDescription {
    pub kinds: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
    pub namespaces: Option<Vec<String>>,
    pub operations: Option<Vec<String>>,
    pub selector: Option<Selector>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Mutation {
    /// RFC 6902 operations, as a YAML or JSON document.
    #[serde(rename = "patchesJson6902")]
    pub patches_json6902: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Validation {
    pub message: Option<String>,
    pub deny: Option<Deny>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Deny {
    pub conditions: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub synchronize: Option<bool>,
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageVerification {
    #[serde(default)]
    pub image_references: Vec<String>,
    pub attestors: Option<Vec<serde_json::Value>>,
    #[serde(default = "default_true")]
    pub verify_digest: bool,
    #[serde(default = "default_true")]
    pub mutate_digest: bool,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

// === impl PolicySpec ===

impl PolicySpec {
    pub fn has_mutate(&self) -> bool {
        self.rules.iter().any(|r| r.mutate.is_some())
    }

    pub fn has_validate(&self) -> bool {
        self.rules.iter().any(|r| r.validate.is_some())
    }

    pub fn has_generate(&self) -> bool {
        self.rules.iter().any(|r| r.generate.is_some())
    }

    pub fn has_verify_images(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.verify_images.as_ref().is_some_and(|v| !v.is_empty()))
    }

    /// True when an image rule performs checks that can reject a request, as
    /// opposed to only rewriting image references.
    pub fn has_verify_image_checks(&self) -> bool {
        self.rules
            .iter()
            .flat_map(|r| r.verify_images.iter().flatten())
            .any(|iv| iv.verify_digest || iv.required)
    }

    /// True when any rule matches or excludes on the requester's roles.
    pub fn matches_on_roles(&self) -> bool {
        self.rules.iter().any(|r| {
            r.match_resources.uses_roles()
                || r.exclude.as_ref().is_some_and(MatchResources::uses_roles)
        })
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }

    pub fn validation_failure_action(&self) -> ValidationFailureAction {
        self.validation_failure_action.unwrap_or_default()
    }
}

// === impl MatchResources ===

impl MatchResources {
    /// Every filter declared by this block, legacy top-level form included.
    pub fn filters(&self) -> impl Iterator<Item = &ResourceFilter> {
        std::iter::once(&self.filter)
            .chain(self.any.iter())
            .chain(self.all.iter())
    }

    /// Kinds named by this block, reduced from `group/version/Kind` to `Kind`.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds = Vec::new();
        for filter in self.filters() {
            let named = filter
                .resources
                .iter()
                .flat_map(|r| r.kinds.iter().flatten());
            for kind in named {
                let kind = kind.rsplit('/').next().unwrap_or(kind);
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }

    fn uses_roles(&self) -> bool {
        self.filters().any(|f| {
            f.roles.as_ref().is_some_and(|r| !r.is_empty())
                || f.cluster_roles.as_ref().is_some_and(|r| !r.is_empty())
        })
    }
}

// === impl ValidationFailureAction ===

impl ValidationFailureAction {
    pub fn is_enforce(&self) -> bool {
        matches!(self, Self::Enforce)
    }
}

impl std::fmt::Display for ValidationFailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audit => "Audit".fmt(f),
            Self::Enforce => "Enforce".fmt(f),
        }
    }
}
