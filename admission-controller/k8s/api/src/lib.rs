#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cleanup;
pub mod labels;
pub mod policy;
pub mod update_request;

pub use self::{
    labels::Labels,
    policy::{ClusterPolicy, Policy},
    update_request::UpdateRequest,
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Namespace, ObjectReference, Pod},
        rbac::v1::{ClusterRoleBinding, RoleBinding, Subject},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams, Resource, ResourceExt},
    Client, Error,
};

/// API group of every Kyverno custom resource.
pub const KYVERNO_GROUP: &str = "kyverno.io";

/// Kinds owned by Kyverno itself. Admission requests for these kinds are never
/// evaluated against policies.
pub const RESERVED_KINDS: &[&str] = &[
    "ClusterPolicyReport",
    "PolicyReport",
    "ReportChangeRequest",
    "ClusterReportChangeRequest",
    "GenerateRequest",
    "UpdateRequest",
    "AdmissionReport",
    "ClusterAdmissionReport",
    "BackgroundScanReport",
    "ClusterBackgroundScanReport",
];

/// Kinds of policy objects whose sub-resources (i.e. status) are written by
/// controllers and must be admitted without evaluation.
pub const POLICY_KINDS: &[&str] = &[
    "ClusterPolicy",
    "Policy",
    "ClusterCleanupPolicy",
    "CleanupPolicy",
];

pub fn is_reserved_kind(kind: &str) -> bool {
    RESERVED_KINDS.contains(&kind)
}

pub fn is_policy_kind(kind: &str) -> bool {
    POLICY_KINDS.contains(&kind)
}
