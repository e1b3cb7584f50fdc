use super::*;
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use kyverno_admission_k8s_api::{self as k8s, ObjectMeta};
use maplit::btreemap;

fn mk_cluster_policy(name: &str, spec: serde_json::Value) -> k8s::ClusterPolicy {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "kyverno.io/v1",
        "kind": "ClusterPolicy",
        "metadata": { "name": name },
        "spec": spec,
    }))
    .expect("cluster policy must parse")
}

fn mk_policy(ns: &str, name: &str, spec: serde_json::Value) -> k8s::Policy {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "kyverno.io/v1",
        "kind": "Policy",
        "metadata": { "name": name, "namespace": ns },
        "spec": spec,
    }))
    .expect("policy must parse")
}

fn mutate_pods() -> serde_json::Value {
    serde_json::json!({
        "rules": [{
            "name": "m",
            "match": { "any": [{ "resources": { "kinds": ["Pod"] } }] },
            "mutate": { "patchesJson6902": "[]" },
        }],
    })
}

fn names(policies: Vec<Policy>) -> Vec<String> {
    policies.iter().map(ToString::to_string).collect()
}

#[test]
fn policies_are_ordered_cluster_then_namespace() {
    let mut index = PolicyIndex::default();
    IndexClusterResource::apply(&mut index, mk_cluster_policy("zeta", mutate_pods()));
    IndexClusterResource::apply(&mut index, mk_cluster_policy("alpha", mutate_pods()));
    IndexNamespacedResource::apply(&mut index, mk_policy("apps", "local", mutate_pods()));
    IndexNamespacedResource::apply(&mut index, mk_policy("other", "elsewhere", mutate_pods()));
    assert_eq!(index.len(), 4);

    assert_eq!(
        names(index.get_policies(PolicyType::Mutate, "Pod", Some("apps"))),
        vec!["alpha", "zeta", "apps/local"],
    );
    assert_eq!(
        names(index.get_policies(PolicyType::Mutate, "Pod", None)),
        vec!["alpha", "zeta"],
    );
    assert!(index
        .get_policies(PolicyType::Mutate, "Deployment", Some("apps"))
        .is_empty());
    assert!(index
        .get_policies(PolicyType::ValidateEnforce, "Pod", Some("apps"))
        .is_empty());

    IndexClusterResource::<k8s::ClusterPolicy>::delete(&mut index, "alpha".to_string());
    IndexNamespacedResource::<k8s::Policy>::delete(
        &mut index,
        "apps".to_string(),
        "local".to_string(),
    );
    assert_eq!(
        names(index.get_policies(PolicyType::Mutate, "Pod", Some("apps"))),
        vec!["zeta"],
    );
}

#[test]
fn policies_are_categorized_per_rule() {
    let mut index = PolicyIndex::default();
    IndexClusterResource::apply(&mut index, mk_cluster_policy(
        "mixed",
        serde_json::json!({
            "validationFailureAction": "Enforce",
            "rules": [
                {
                    "name": "validate-deployments",
                    "match": { "resources": { "kinds": ["apps/v1/Deployment"] } },
                    "validate": { "message": "m", "deny": {} },
                },
                {
                    "name": "generate-everywhere",
                    "match": { "resources": { "kinds": ["*"] } },
                    "generate": { "kind": "ConfigMap", "name": "cm" },
                },
                {
                    "name": "images",
                    "match": { "resources": { "kinds": ["Pod"] } },
                    "verifyImages": [{ "imageReferences": ["*"] }],
                },
            ],
        }),
    ));

    let has = |ty, kind| !index.get_policies(ty, kind, None).is_empty();
    assert!(has(PolicyType::ValidateEnforce, "Deployment"));
    assert!(!has(PolicyType::ValidateEnforce, "Pod"));
    assert!(!has(PolicyType::ValidateAudit, "Deployment"));
    assert!(has(PolicyType::Generate, "Secret"));
    assert!(has(PolicyType::VerifyImagesMutate, "Pod"));
    assert!(has(PolicyType::VerifyImagesValidate, "Pod"));
    assert!(!has(PolicyType::Mutate, "Pod"));
}

#[test]
fn shared_index_reads_through() {
    let shared = SharedIndex::new(PolicyIndex::default());
    IndexClusterResource::apply(&mut *shared.inner().write(), mk_cluster_policy("p", mutate_pods()));
    assert_eq!(
        names(shared.get_policies(PolicyType::Mutate, "Pod", None)),
        vec!["p"]
    );
}

#[test]
fn namespace_labels() {
    let mut index = NamespaceIndex::default();
    index.apply(k8s::Namespace {
        metadata: ObjectMeta {
            name: Some("apps".to_string()),
            labels: Some(btreemap! { "env".to_string() => "prod".to_string() }),
            ..Default::default()
        },
        ..Default::default()
    });
    assert_eq!(index.labels("apps").unwrap().get("env"), Some("prod"));
    assert!(index.labels("missing").is_none());

    IndexClusterResource::<k8s::Namespace>::delete(&mut index, "apps".to_string());
    assert!(index.labels("apps").is_none());
}

fn subject(kind: &str, name: &str, namespace: Option<&str>) -> k8s::Subject {
    k8s::Subject {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn role_ref(kind: &str, name: &str) -> k8s::api::rbac::v1::RoleRef {
    k8s::api::rbac::v1::RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[test]
fn resolves_roles() {
    let mut index = RoleBindingIndex::default();
    IndexNamespacedResource::apply(&mut index, k8s::RoleBinding {
        metadata: ObjectMeta {
            name: Some("devs".to_string()),
            namespace: Some("apps".to_string()),
            ..Default::default()
        },
        role_ref: role_ref("Role", "editor"),
        subjects: Some(vec![subject("Group", "dev", None)]),
    });
    IndexNamespacedResource::apply(&mut index, k8s::RoleBinding {
        metadata: ObjectMeta {
            name: Some("ci".to_string()),
            namespace: Some("apps".to_string()),
            ..Default::default()
        },
        role_ref: role_ref("ClusterRole", "deployer"),
        subjects: Some(vec![subject("ServiceAccount", "ci", None)]),
    });
    IndexClusterResource::apply(&mut index, k8s::ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some("admins".to_string()),
            ..Default::default()
        },
        role_ref: role_ref("ClusterRole", "cluster-admin"),
        subjects: Some(vec![subject("User", "alice", None)]),
    });

    let (roles, cluster_roles) = index.roles("alice", &["dev".to_string()], Some("apps"));
    assert_eq!(roles, vec!["apps:editor".to_string()]);
    assert_eq!(cluster_roles, vec!["cluster-admin".to_string()]);

    let (roles, cluster_roles) = index.roles("system:serviceaccount:apps:ci", &[], Some("apps"));
    assert!(roles.is_empty());
    assert_eq!(cluster_roles, vec!["deployer".to_string()]);

    let (roles, cluster_roles) = index.roles("bob", &[], None);
    assert!(roles.is_empty());
    assert!(cluster_roles.is_empty());
}
