use kyverno_admission_core::{lookup::PolicyCache, Policy, PolicyType};
use kyverno_admission_k8s_api::{self as k8s, policy::Rule, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Indexes policies by the categories and kinds their rules apply to.
///
/// Lookups return cluster policies ordered by name followed by the policies of
/// the request's namespace ordered by name, so that evaluation order is
/// stable across requests.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    cluster: BTreeMap<String, IndexedPolicy>,
    namespaced: BTreeMap<String, BTreeMap<String, IndexedPolicy>>,
}

#[derive(Debug)]
struct IndexedPolicy {
    policy: Policy,
    kinds: BTreeMap<PolicyType, BTreeSet<String>>,
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn len(&self) -> usize {
        self.cluster.len() + self.namespaced.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl kubert::index::IndexClusterResource<k8s::ClusterPolicy> for PolicyIndex {
    fn apply(&mut self, policy: k8s::ClusterPolicy) {
        let name = policy.name_unchecked();
        let indexed = IndexedPolicy::new(policy.into());
        debug!(%name, kinds = ?indexed.kinds, "Indexing cluster policy");
        self.cluster.insert(name, indexed);
    }

    fn delete(&mut self, name: String) {
        debug!(%name, "Removing cluster policy");
        self.cluster.remove(&name);
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Policy> for PolicyIndex {
    fn apply(&mut self, policy: k8s::Policy) {
        let name = policy.name_unchecked();
        let Some(namespace) = policy.namespace() else {
            debug!(%name, "Ignoring policy without a namespace");
            return;
        };
        let indexed = IndexedPolicy::new(policy.into());
        debug!(%namespace, %name, kinds = ?indexed.kinds, "Indexing policy");
        self.namespaced
            .entry(namespace)
            .or_default()
            .insert(name, indexed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        debug!(%namespace, %name, "Removing policy");
        if let Some(policies) = self.namespaced.get_mut(&namespace) {
            policies.remove(&name);
            if policies.is_empty() {
                self.namespaced.remove(&namespace);
            }
        }
    }
}

impl PolicyCache for PolicyIndex {
    fn get_policies(
        &self,
        policy_type: PolicyType,
        kind: &str,
        namespace: Option<&str>,
    ) -> Vec<Policy> {
        let namespaced = namespace
            .and_then(|ns| self.namespaced.get(ns))
            .into_iter()
            .flat_map(BTreeMap::values);
        self.cluster
            .values()
            .chain(namespaced)
            .filter(|p| p.applies(policy_type, kind))
            .map(|p| p.policy.clone())
            .collect()
    }
}

// === impl IndexedPolicy ===

impl IndexedPolicy {
    fn new(policy: Policy) -> Self {
        let spec = policy.spec();
        let enforce = spec.validation_failure_action().is_enforce();
        let mut kinds = BTreeMap::<PolicyType, BTreeSet<String>>::new();
        for rule in &spec.rules {
            for policy_type in rule_types(rule, enforce) {
                kinds
                    .entry(policy_type)
                    .or_default()
                    .extend(rule.match_resources.kinds().into_iter().map(str::to_string));
            }
        }
        Self { policy, kinds }
    }

    fn applies(&self, policy_type: PolicyType, kind: &str) -> bool {
        self.kinds
            .get(&policy_type)
            .is_some_and(|kinds| kinds.contains(kind) || kinds.contains("*"))
    }
}

/// The categories a single rule contributes its kinds to.
fn rule_types(rule: &Rule, enforce: bool) -> Vec<PolicyType> {
    let mut types = Vec::new();
    if rule.mutate.is_some() {
        types.push(PolicyType::Mutate);
    }
    if rule.validate.is_some() {
        types.push(if enforce {
            PolicyType::ValidateEnforce
        } else {
            PolicyType::ValidateAudit
        });
    }
    if rule.generate.is_some() {
        types.push(PolicyType::Generate);
    }
    if let Some(ivs) = rule.verify_images.as_ref().filter(|ivs| !ivs.is_empty()) {
        types.push(PolicyType::VerifyImagesMutate);
        if ivs.iter().any(|iv| iv.verify_digest || iv.required) {
            types.push(PolicyType::VerifyImagesValidate);
        }
    }
    types
}
