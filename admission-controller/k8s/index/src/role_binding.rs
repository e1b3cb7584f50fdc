use ahash::AHashMap as HashMap;
use kyverno_admission_core::lookup::RoleBindings;
use kyverno_admission_k8s_api::{self as k8s, ResourceExt};
use std::collections::BTreeSet;

/// Indexes role bindings so that the roles of a requesting user can be
/// resolved without an API call.
#[derive(Debug, Default)]
pub struct RoleBindingIndex {
    /// Role bindings by namespace, then by name.
    namespaced: HashMap<String, HashMap<String, Binding>>,
    cluster: HashMap<String, Binding>,
}

#[derive(Debug)]
struct Binding {
    role_kind: String,
    role_name: String,
    subjects: Vec<k8s::Subject>,
}

impl kubert::index::IndexNamespacedResource<k8s::RoleBinding> for RoleBindingIndex {
    fn apply(&mut self, rb: k8s::RoleBinding) {
        let name = rb.name_unchecked();
        let Some(namespace) = rb.namespace() else {
            return;
        };
        let binding = Binding {
            role_kind: rb.role_ref.kind,
            role_name: rb.role_ref.name,
            subjects: rb.subjects.unwrap_or_default(),
        };
        self.namespaced
            .entry(namespace)
            .or_default()
            .insert(name, binding);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(bindings) = self.namespaced.get_mut(&namespace) {
            bindings.remove(&name);
            if bindings.is_empty() {
                self.namespaced.remove(&namespace);
            }
        }
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterRoleBinding> for RoleBindingIndex {
    fn apply(&mut self, crb: k8s::ClusterRoleBinding) {
        let binding = Binding {
            role_kind: crb.role_ref.kind,
            role_name: crb.role_ref.name,
            subjects: crb.subjects.unwrap_or_default(),
        };
        self.cluster.insert(crb.metadata.name.unwrap_or_default(), binding);
    }

    fn delete(&mut self, name: String) {
        self.cluster.remove(&name);
    }
}

impl RoleBindings for RoleBindingIndex {
    /// Roles are reported as `<namespace>:<name>`; cluster roles by name.
    fn roles(
        &self,
        username: &str,
        groups: &[String],
        namespace: Option<&str>,
    ) -> (Vec<String>, Vec<String>) {
        let mut roles = BTreeSet::new();
        let mut cluster_roles = BTreeSet::new();

        if let Some(ns) = namespace {
            let bindings = self.namespaced.get(ns).into_iter().flat_map(|b| b.values());
            for binding in bindings.filter(|b| b.binds(username, groups, Some(ns))) {
                if binding.role_kind == "ClusterRole" {
                    cluster_roles.insert(binding.role_name.clone());
                } else {
                    roles.insert(format!("{ns}:{}", binding.role_name));
                }
            }
        }

        for binding in self.cluster.values() {
            if binding.binds(username, groups, None) {
                cluster_roles.insert(binding.role_name.clone());
            }
        }

        (roles.into_iter().collect(), cluster_roles.into_iter().collect())
    }
}

// === impl Binding ===

impl Binding {
    fn binds(&self, username: &str, groups: &[String], binding_ns: Option<&str>) -> bool {
        self.subjects.iter().any(|s| match s.kind.as_str() {
            "User" => s.name == username,
            "Group" => groups.contains(&s.name),
            "ServiceAccount" => {
                let Some(ns) = s.namespace.as_deref().or(binding_ns) else {
                    return false;
                };
                username == format!("system:serviceaccount:{ns}:{}", s.name)
            }
            _ => false,
        })
    }
}
