#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod context;
pub mod engine;
pub mod gate;
pub mod image;
pub mod lookup;
pub mod patch;
pub mod policy;
pub mod response;
pub mod verdict;

pub use self::{
    context::{AdmissionInfo, BuildError, ContainerImage, PolicyContext, PolicyContextBuilder},
    engine::{Engine, SchemaValidator},
    image::{ImageVerificationMetadata, ImageVerificationStatus},
    lookup::{NamespaceLabels, PolicyCache, RoleBindings},
    patch::PatchSet,
    policy::{Policy, PolicyType},
    response::{EngineResponse, ResourceKey, RuleResponse, RuleStatus, RuleType},
    verdict::Verdict,
};
pub use kyverno_admission_k8s_api::policy::{FailurePolicy, ValidationFailureAction};

/// Kind used by the engine for resources whose kind is not yet known.
pub const WILDCARD_KIND: &str = "*";
