use kyverno_admission_k8s_api::{
    self as k8s,
    policy::{FailurePolicy, PolicySpec, ValidationFailureAction},
    ResourceExt,
};
use std::{fmt, sync::Arc};

/// A policy of either scope, exposing the capabilities the admission pipeline
/// relies on regardless of where the policy is defined.
#[derive(Clone, Debug)]
pub enum Policy {
    ClusterScoped(Arc<k8s::ClusterPolicy>),
    NamespaceScoped(Arc<k8s::Policy>),
}

/// Index categories a policy may be filed under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyType {
    ValidateEnforce,
    ValidateAudit,
    Mutate,
    Generate,
    VerifyImagesMutate,
    VerifyImagesValidate,
}

// === impl Policy ===

impl Policy {
    pub fn name(&self) -> String {
        match self {
            Self::ClusterScoped(p) => p.name_any(),
            Self::NamespaceScoped(p) => p.name_any(),
        }
    }

    /// The policy's namespace; `None` for cluster-scoped policies.
    pub fn namespace(&self) -> Option<String> {
        match self {
            Self::ClusterScoped(_) => None,
            Self::NamespaceScoped(p) => p.namespace(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClusterScoped(_) => "ClusterPolicy",
            Self::NamespaceScoped(_) => "Policy",
        }
    }

    pub fn spec(&self) -> &PolicySpec {
        match self {
            Self::ClusterScoped(p) => &p.spec.inner,
            Self::NamespaceScoped(p) => &p.spec.inner,
        }
    }

    pub fn has_mutate(&self) -> bool {
        self.spec().has_mutate()
    }

    pub fn has_validate(&self) -> bool {
        self.spec().has_validate()
    }

    pub fn has_verify_image_checks(&self) -> bool {
        self.spec().has_verify_image_checks()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.spec().failure_policy()
    }

    pub fn validation_failure_action(&self) -> ValidationFailureAction {
        self.spec().validation_failure_action()
    }

    /// The categories this policy is indexed under.
    pub fn types(&self) -> Vec<PolicyType> {
        let spec = self.spec();
        let mut types = Vec::new();
        if spec.has_mutate() {
            types.push(PolicyType::Mutate);
        }
        if spec.has_validate() {
            types.push(if spec.validation_failure_action().is_enforce() {
                PolicyType::ValidateEnforce
            } else {
                PolicyType::ValidateAudit
            });
        }
        if spec.has_generate() {
            types.push(PolicyType::Generate);
        }
        if spec.has_verify_images() {
            types.push(PolicyType::VerifyImagesMutate);
        }
        if spec.has_verify_image_checks() {
            types.push(PolicyType::VerifyImagesValidate);
        }
        types
    }
}

impl From<k8s::ClusterPolicy> for Policy {
    fn from(policy: k8s::ClusterPolicy) -> Self {
        Self::ClusterScoped(Arc::new(policy))
    }
}

impl From<k8s::Policy> for Policy {
    fn from(policy: k8s::Policy) -> Self {
        Self::NamespaceScoped(Arc::new(policy))
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}/{}", ns, self.name()),
            None => self.name().fmt(f),
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidateEnforce => "ValidateEnforce".fmt(f),
            Self::ValidateAudit => "ValidateAudit".fmt(f),
            Self::Mutate => "Mutate".fmt(f),
            Self::Generate => "Generate".fmt(f),
            Self::VerifyImagesMutate => "VerifyImagesMutate".fmt(f),
            Self::VerifyImagesValidate => "VerifyImagesValidate".fmt(f),
        }
    }
}
