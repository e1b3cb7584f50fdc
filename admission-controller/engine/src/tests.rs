use super::*;
use kube::core::{
    admission::{AdmissionRequest, AdmissionReview},
    DynamicObject,
};
use kyverno_admission_core::{
    ImageVerificationStatus, NamespaceLabels, PolicyContextBuilder, RoleBindings, RuleStatus,
};
use kyverno_admission_k8s_api::{ClusterPolicy, Labels};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

struct NoLookups;

impl NamespaceLabels for NoLookups {
    fn labels(&self, _: &str) -> Option<Labels> {
        None
    }
}

impl RoleBindings for NoLookups {
    fn roles(&self, _: &str, _: &[String], _: Option<&str>) -> (Vec<String>, Vec<String>) {
        (vec![], vec![])
    }
}

fn policy(yaml: &str) -> Policy {
    let policy: ClusterPolicy = serde_yaml::from_str(yaml).expect("policy must parse");
    policy.into()
}

fn context(operation: &str, object: Value) -> PolicyContext {
    let kind = object["kind"].clone();
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "1",
            "kind": { "group": "", "version": "v1", "kind": kind },
            "resource": { "group": "", "version": "v1", "resource": "pods" },
            "name": object["metadata"]["name"],
            "namespace": object["metadata"]["namespace"],
            "operation": operation,
            "userInfo": { "username": "alice" },
            "object": object,
        },
    }))
    .expect("review must parse");
    let req: AdmissionRequest<DynamicObject> = review.try_into().expect("request must be set");
    PolicyContextBuilder::new(Arc::new(NoLookups), Arc::new(NoLookups))
        .build(&req, &[])
        .expect("context must build")
}

fn pod(image: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "web-1", "namespace": "apps", "labels": { "app": "web" } },
        "spec": { "containers": [{ "name": "app", "image": image }] },
    })
}

const MUTATE: &str = r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: labels
spec:
  rules:
    - name: add-team
      match:
        any:
          - resources:
              kinds: [Pod]
              names: ["web-*"]
      mutate:
        patchesJson6902: |-
          - op: add
            path: /metadata/labels/team
            value: platform
    - name: add-tier
      match:
        resources:
          kinds: [Pod]
          selector:
            matchLabels:
              team: platform
      mutate:
        patchesJson6902: '[{"op": "add", "path": "/metadata/labels/tier", "value": "web"}]'
    - name: deployments-only
      match:
        resources:
          kinds: [apps/v1/Deployment]
      mutate:
        patchesJson6902: |-
          - op: remove
            path: /spec
"#;

#[tokio::test(flavor = "current_thread")]
async fn mutate_applies_matching_rules_in_order() {
    let engine = PolicyEngine::default();
    let ctx = context("CREATE", pod("nginx"));
    let rsp = engine
        .mutate(&policy(MUTATE), &ctx)
        .await
        .expect("mutation must evaluate");

    // The selector of the second rule only matches the request's resource,
    // which does not carry the label added by the first rule.
    let rules = rsp.rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
    assert_eq!(rules, vec!["add-team"]);
    assert!(rsp.is_successful());
    assert_eq!(rsp.patched_resource["metadata"]["labels"]["team"], "platform");
    assert_eq!(rsp.patches().0.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn mutate_reports_unappliable_patches() {
    let policy = policy(
        r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: broken
spec:
  rules:
    - name: remove-missing
      match:
        resources:
          kinds: [Pod]
      mutate:
        patchesJson6902: |-
          - op: remove
            path: /metadata/annotations/missing
    - name: garbage
      match:
        resources:
          kinds: [Pod]
      mutate:
        patchesJson6902: "- op: [unterminated"
"#,
    );
    let ctx = context("CREATE", pod("nginx"));
    let rsp = PolicyEngine::default()
        .mutate(&policy, &ctx)
        .await
        .expect("mutation must evaluate");

    assert_eq!(rsp.rules[0].status, RuleStatus::Fail);
    assert_eq!(rsp.rules[1].status, RuleStatus::Error);
    assert_eq!(rsp.failed_rules(), vec!["remove-missing", "garbage"]);
    assert_eq!(rsp.patched_resource, ctx.new_resource);
    assert!(rsp.patches().0.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn mutate_requires_an_object() {
    let mut ctx = context("CREATE", pod("nginx"));
    ctx.new_resource = Value::Null;
    let err = PolicyEngine::default()
        .mutate(&policy(MUTATE), &ctx)
        .await
        .expect_err("mutation must fail");
    assert!(err.to_string().contains("no resource"));
}

#[tokio::test(flavor = "current_thread")]
async fn validate_denies_and_honors_exclude() {
    let policy = policy(
        r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: no-pods
spec:
  validationFailureAction: Enforce
  rules:
    - name: deny-pods
      match:
        resources:
          kinds: [Pod]
          operations: [CREATE]
      exclude:
        resources:
          namespaces: ["kube-*"]
      validate:
        message: pods are not allowed
        deny: {}
    - name: allow-all
      match:
        resources:
          kinds: ["*"]
      validate:
        message: unused
"#,
    );

    let engine = PolicyEngine::default();
    let rsp = engine
        .validate(&policy, &context("CREATE", pod("nginx")))
        .await
        .expect("validation must evaluate");
    assert_eq!(rsp.rules.len(), 2);
    assert_eq!(rsp.rules[0].status, RuleStatus::Fail);
    assert_eq!(rsp.rules[0].message, "pods are not allowed");
    assert_eq!(rsp.rules[1].status, RuleStatus::Pass);
    assert!(rsp.is_failed());

    let mut system = pod("nginx");
    system["metadata"]["namespace"] = json!("kube-system");
    let rsp = engine
        .validate(&policy, &context("CREATE", system))
        .await
        .expect("validation must evaluate");
    assert_eq!(rsp.rules.len(), 1);
    assert!(rsp.is_successful());

    let rsp = engine
        .validate(&policy, &context("UPDATE", pod("nginx")))
        .await
        .expect("validation must evaluate");
    assert!(!rsp.is_failed());
}

const VERIFY: &str = r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: images
spec:
  rules:
    - name: pinned
      match:
        resources:
          kinds: [Pod]
      verifyImages:
        - imageReferences: ["ghcr.io/*"]
"#;

#[tokio::test(flavor = "current_thread")]
async fn verify_images_requires_digests() {
    let engine = PolicyEngine::default();

    let (rsp, ivm) = engine
        .verify_images(&policy(VERIFY), &context("CREATE", pod("ghcr.io/org/app:v1")))
        .await;
    assert_eq!(rsp.rules[0].status, RuleStatus::Fail);
    assert_eq!(ivm.get("ghcr.io/org/app:v1"), Some(ImageVerificationStatus::Fail));

    let pinned = "ghcr.io/org/app@sha256:0123";
    let (rsp, ivm) = engine
        .verify_images(&policy(VERIFY), &context("CREATE", pod(pinned)))
        .await;
    assert_eq!(rsp.rules[0].status, RuleStatus::Pass);
    assert_eq!(ivm.get(pinned), Some(ImageVerificationStatus::Pass));

    let (rsp, ivm) = engine
        .verify_images(&policy(VERIFY), &context("CREATE", pod("docker.io/nginx")))
        .await;
    assert_eq!(rsp.rules[0].status, RuleStatus::Skip);
    assert!(ivm.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn verify_images_with_attestors_errors() {
    let policy = policy(
        r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: signed
spec:
  rules:
    - name: signed
      match:
        resources:
          kinds: [Pod]
      verifyImages:
        - imageReferences: ["*"]
          verifyDigest: false
          attestors:
            - entries:
                - keys:
                    publicKeys: "-----BEGIN PUBLIC KEY-----"
"#,
    );
    let (rsp, ivm) = PolicyEngine::default()
        .verify_images(&policy, &context("CREATE", pod("nginx")))
        .await;
    assert_eq!(rsp.rules[0].status, RuleStatus::Error);
    assert!(rsp.is_error());
    assert!(!rsp.is_failed());
    assert_eq!(ivm.get("nginx"), Some(ImageVerificationStatus::Fail));
}
