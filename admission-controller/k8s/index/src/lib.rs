//! Cluster state consumed by the admission webhook, kept current by watches.
//!
//! - `ClusterPolicy` and `Policy` resources are indexed by the categories and
//!   kinds their rules apply to, so that each admission request only
//!   evaluates the policies that can affect it.
//! - `Namespace` labels are indexed so that rules may select on the labels of
//!   a resource's namespace.
//! - `RoleBinding` and `ClusterRoleBinding` subjects are indexed so that rules
//!   may match on the roles of the requesting user.
//!
//! Every index is wrapped in a [`SharedIndex`], which is updated by
//! `kubert::index` and read by the admission handlers.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod namespace;
mod policy;
mod role_binding;

#[cfg(test)]
mod tests;

pub use self::{namespace::NamespaceIndex, policy::PolicyIndex, role_binding::RoleBindingIndex};
use kyverno_admission_core::{
    lookup::{NamespaceLabels, PolicyCache, RoleBindings},
    Policy, PolicyType,
};
use kyverno_admission_k8s_api::Labels;
use parking_lot::RwLock;
use std::sync::Arc;

/// An index shared between the watches that update it and the admission
/// handlers that read it.
#[derive(Debug, Default)]
pub struct SharedIndex<I>(Arc<RwLock<I>>);

// === impl SharedIndex ===

impl<I> SharedIndex<I> {
    pub fn new(index: I) -> Self {
        Self(Arc::new(RwLock::new(index)))
    }

    /// The lock updated by `kubert::index`.
    pub fn inner(&self) -> Arc<RwLock<I>> {
        self.0.clone()
    }
}

impl<I> Clone for SharedIndex<I> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<I: PolicyCache> PolicyCache for SharedIndex<I> {
    fn get_policies(
        &self,
        policy_type: PolicyType,
        kind: &str,
        namespace: Option<&str>,
    ) -> Vec<Policy> {
        self.0.read().get_policies(policy_type, kind, namespace)
    }
}

impl<I: NamespaceLabels> NamespaceLabels for SharedIndex<I> {
    fn labels(&self, namespace: &str) -> Option<Labels> {
        self.0.read().labels(namespace)
    }
}

impl<I: RoleBindings> RoleBindings for SharedIndex<I> {
    fn roles(
        &self,
        username: &str,
        groups: &[String],
        namespace: Option<&str>,
    ) -> (Vec<String>, Vec<String>) {
        self.0.read().roles(username, groups, namespace)
    }
}
