use crate::{
    core::{
        Engine, EngineResponse, ImageVerificationMetadata, NamespaceLabels, Policy, PolicyCache,
        PolicyContext, PolicyType, RoleBindings,
    },
    dispatch::{Dispatcher, Effect},
    engine::{PolicyEngine, StructuralValidator},
    handlers::Handlers,
    k8s::{self, DynamicObject, Labels},
};
use anyhow::{ensure, Result};
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;


/// Policies whose name starts with this prefix cannot be evaluated.
const UNAVAILABLE: &str = "unavailable-";

/// Image policies whose name starts with this prefix rewrite the first
/// container's image to [`PINNED`].
const PIN: &str = "pin-";

const PINNED: &str =
    "nginx@sha256:0d17b565c37bcbd895e9d92315a05c1c3c9a29f762b011a10c54a66cd53c9b31";

/// Serves policies of every scope in the order they were given.
struct Cache(Vec<Policy>);

struct NoLookups;

/// The built-in engine, with failures injected by policy name.
#[derive(Default)]
struct TestEngine(PolicyEngine);

impl PolicyCache for Cache {
    fn get_policies(&self, policy_type: PolicyType, _: &str, _: Option<&str>) -> Vec<Policy> {
        self.0
            .iter()
            .filter(|p| p.types().contains(&policy_type))
            .cloned()
            .collect()
    }
}

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

#[async_trait::async_trait]
impl Engine for TestEngine {
    async fn mutate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse> {
        ensure!(!policy.name().starts_with(UNAVAILABLE), "engine unavailable");
        self.0.mutate(policy, ctx).await
    }

    async fn validate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse> {
        ensure!(!policy.name().starts_with(UNAVAILABLE), "engine unavailable");
        self.0.validate(policy, ctx).await
    }

    async fn verify_images(
        &self,
        policy: &Policy,
        ctx: &PolicyContext,
    ) -> (EngineResponse, ImageVerificationMetadata) {
        let (mut er, ivm) = self.0.verify_images(policy, ctx).await;
        if policy.name().starts_with(PIN) {
            if let Some(rule) = er.rules.first_mut() {
                let op = crate::core::patch::operation(
                    "replace",
                    "/spec/containers/0/image",
                    Some(json!(PINNED)),
                )
                .expect("operation must be valid");
                rule.patches.push(op);
            }
        }
        (er, ivm)
    }
}

fn mk_handlers(policies: Vec<Policy>) -> (Handlers, mpsc::Receiver<Effect>) {
    handlers_with(Arc::new(TestEngine::default()), policies)
}

fn handlers_with(
    engine: Arc<dyn Engine>,
    policies: Vec<Policy>,
) -> (Handlers, mpsc::Receiver<Effect>) {
    let (dispatcher, effects) = Dispatcher::capture(100);
    let handlers = Handlers::new(
        Arc::new(Cache(policies)),
        Arc::new(NoLookups),
        Arc::new(NoLookups),
        engine,
        Arc::new(StructuralValidator::default()),
        dispatcher,
    );
    (handlers, effects)
}

/// Everything submitted so far.
fn submitted(effects: &mut mpsc::Receiver<Effect>) -> Vec<Effect> {
    let mut submitted = Vec::new();
    while let Ok(effect) = effects.try_recv() {
        submitted.push(effect);
    }
    submitted
}

fn mk_policy(name: &str, spec: Value) -> Policy {
    let policy: k8s::ClusterPolicy = serde_json::from_value(json!({
        "apiVersion": "kyverno.io/v1",
        "kind": "ClusterPolicy",
        "metadata": { "name": name },
        "spec": spec,
    }))
    .expect("cluster policy must parse");
    policy.into()
}

/// A policy with a single rule applying a JSON patch to pods.
fn mk_mutate(name: &str, failure_policy: &str, patch: Value) -> Policy {
    mk_policy(
        name,
        json!({
            "failurePolicy": failure_policy,
            "rules": [{
                "name": name,
                "match": { "any": [{ "resources": { "kinds": ["Pod"] } }] },
                "mutate": { "patchesJson6902": patch.to_string() },
            }],
        }),
    )
}

/// A policy with a single rule denying pods.
fn mk_deny(name: &str, action: &str, failure_policy: &str) -> Policy {
    mk_policy(
        name,
        json!({
            "failurePolicy": failure_policy,
            "validationFailureAction": action,
            "rules": [{
                "name": "deny-pods",
                "match": { "any": [{ "resources": { "kinds": ["Pod"] } }] },
                "validate": { "message": "pods are not allowed", "deny": {} },
            }],
        }),
    )
}

/// A policy with a single image verification rule for every image.
fn mk_verify(name: &str, failure_policy: &str, verification: Value) -> Policy {
    let mut verification = verification;
    verification["imageReferences"] = json!(["*"]);
    mk_policy(
        name,
        json!({
            "failurePolicy": failure_policy,
            "rules": [{
                "name": "images",
                "match": { "any": [{ "resources": { "kinds": ["Pod"] } }] },
                "verifyImages": [verification],
            }],
        }),
    )
}

fn pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "web-1", "namespace": "apps", "labels": { "app": "web" } },
        "spec": { "containers": [{ "name": "app", "image": "nginx" }] },
    })
}

fn create(object: Value) -> AdmissionRequest<DynamicObject> {
    request("CREATE", object, Value::Null, None)
}

fn request(
    operation: &str,
    object: Value,
    old_object: Value,
    sub_resource: Option<&str>,
) -> AdmissionRequest<DynamicObject> {
    let resource = if object.is_null() { &old_object } else { &object };
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "1",
            "kind": { "group": "", "version": "v1", "kind": resource["kind"] },
            "resource": { "group": "", "version": "v1", "resource": "pods" },
            "subResource": sub_resource,
            "name": resource["metadata"]["name"],
            "namespace": resource["metadata"]["namespace"],
            "operation": operation,
            "userInfo": { "username": "alice", "groups": ["devs"] },
            "object": object,
            "oldObject": old_object,
        },
    }))
    .expect("review must parse");
    review.try_into().expect("request must be set")
}

/// The admitted resource: `object` with the verdict's patch applied.
fn admitted(object: &Value, patch: Option<&json_patch::Patch>) -> Value {
    let mut object = object.clone();
    if let Some(patch) = patch {
        json_patch::patch(&mut object, &patch.0).expect("patch must apply");
    }
    object
}

fn paths(patch: Option<&json_patch::Patch>) -> Vec<String> {
    patch
        .map(|p| {
            p.0.iter()
                .map(|op| {
                    serde_json::to_value(op).expect("operation must encode")["path"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}
