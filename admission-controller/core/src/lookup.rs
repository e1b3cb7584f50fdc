//! Read-only views of cluster state consumed by the admission pipeline.
//!
//! Implementations are expected to be backed by warm caches; lookups never
//! block on the network.

use crate::policy::{Policy, PolicyType};
use kyverno_admission_k8s_api::Labels;

/// Returns the policies of a category that apply to a kind in a namespace.
///
/// Implementations must return policies in a stable order: image verification
/// metadata is merged in this order.
pub trait PolicyCache: Send + Sync {
    fn get_policies(&self, policy_type: PolicyType, kind: &str, namespace: Option<&str>)
        -> Vec<Policy>;
}

pub trait NamespaceLabels: Send + Sync {
    /// The labels of `namespace`, or `None` if it is not known.
    fn labels(&self, namespace: &str) -> Option<Labels>;
}

pub trait RoleBindings: Send + Sync {
    /// Resolves the roles and cluster roles bound to a user or any of its
    /// groups. Role bindings are only considered in `namespace`.
    fn roles(
        &self,
        username: &str,
        groups: &[String],
        namespace: Option<&str>,
    ) -> (Vec<String>, Vec<String>);
}
