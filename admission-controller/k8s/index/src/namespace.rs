use ahash::AHashMap as HashMap;
use kyverno_admission_core::lookup::NamespaceLabels;
use kyverno_admission_k8s_api::{self as k8s, Labels, ResourceExt};

/// Holds the labels of every namespace.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    by_name: HashMap<String, Labels>,
}

impl kubert::index::IndexClusterResource<k8s::Namespace> for NamespaceIndex {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        let labels = Labels::from(ns.metadata.labels);
        tracing::trace!(%name, ?labels, "Indexing namespace");
        self.by_name.insert(name, labels);
    }

    fn delete(&mut self, name: String) {
        self.by_name.remove(&name);
    }
}

impl NamespaceLabels for NamespaceIndex {
    fn labels(&self, namespace: &str) -> Option<Labels> {
        self.by_name.get(namespace).cloned()
    }
}
