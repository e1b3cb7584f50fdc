use crate::{
    lookup::{NamespaceLabels, RoleBindings},
    policy::Policy,
};
use kube::core::{
    admission::{AdmissionRequest, Operation},
    DynamicObject,
};
use kyverno_admission_k8s_api::Labels;
use serde::Serialize;
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::debug;

/// Per-request evaluation state.
///
/// Exactly one context exists per admission request. Stages take it by value
/// and hand it back with `new_resource` advanced to the latest patched state.
/// The policy being applied is passed to the engine alongside the context.
#[derive(Clone, Debug)]
pub struct PolicyContext {
    pub operation: Operation,
    pub kind: String,
    pub namespace: Option<String>,
    pub sub_resource: Option<String>,
    pub new_resource: Value,
    pub old_resource: Value,
    pub admission_info: AdmissionInfo,
    pub namespace_labels: Labels,
    pub images: Vec<ContainerImage>,
    json_context: Value,
}

/// Describes who issued the request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionInfo {
    pub username: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
    pub cluster_roles: Vec<String>,
}

/// A container image referenced by the resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerImage {
    /// `containers`, `initContainers` or `ephemeralContainers`.
    #[serde(skip)]
    pub field: &'static str,
    #[serde(skip)]
    pub container: String,
    pub reference: String,
    pub registry: String,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0:?} request has no object")]
    MissingObject(Operation),

    #[error("Delete request has no old object")]
    MissingOldObject,

    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("{0} is not a JSON object")]
    NotAnObject(&'static str),
}

/// Assembles a [`PolicyContext`] from a raw admission request.
#[derive(Clone)]
pub struct PolicyContextBuilder {
    namespaces: Arc<dyn NamespaceLabels>,
    role_bindings: Arc<dyn RoleBindings>,
}

const CONTAINER_FIELDS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

// === impl PolicyContextBuilder ===

impl PolicyContextBuilder {
    pub fn new(namespaces: Arc<dyn NamespaceLabels>, role_bindings: Arc<dyn RoleBindings>) -> Self {
        Self {
            namespaces,
            role_bindings,
        }
    }

    /// Builds the context for `req`.
    ///
    /// Roles are only resolved when one of `policies` matches on roles.
    pub fn build(
        &self,
        req: &AdmissionRequest<DynamicObject>,
        policies: &[Policy],
    ) -> Result<PolicyContext, BuildError> {
        let new_resource = encode("object", req.object.as_ref())?;
        let old_resource = encode("oldObject", req.old_object.as_ref())?;
        match &req.operation {
            Operation::Delete if old_resource.is_null() => return Err(BuildError::MissingOldObject),
            Operation::Delete => {}
            op if new_resource.is_null() => return Err(BuildError::MissingObject(op.clone())),
            _ => {}
        }

        let username = req.user_info.username.clone().unwrap_or_default();
        let groups = req.user_info.groups.clone().unwrap_or_default();
        let mut admission_info = AdmissionInfo {
            username,
            groups,
            ..Default::default()
        };
        if policies.iter().any(|p| p.spec().matches_on_roles()) {
            let (roles, cluster_roles) = self.role_bindings.roles(
                &admission_info.username,
                &admission_info.groups,
                req.namespace.as_deref(),
            );
            admission_info.roles = roles;
            admission_info.cluster_roles = cluster_roles;
        }

        let mut ctx = PolicyContext {
            operation: req.operation.clone(),
            kind: req.kind.kind.clone(),
            namespace: req.namespace.clone().filter(|ns| !ns.is_empty()),
            sub_resource: req.sub_resource.clone(),
            new_resource: Value::Null,
            old_resource,
            admission_info,
            namespace_labels: Labels::default(),
            images: Vec::new(),
            json_context: json!({}),
        };
        ctx.advance(new_resource);
        ctx.refresh_namespace_labels(&*self.namespaces);
        Ok(ctx)
    }
}

fn encode(field: &'static str, obj: Option<&DynamicObject>) -> Result<Value, BuildError> {
    let Some(obj) = obj else {
        return Ok(Value::Null);
    };
    let value = serde_json::to_value(obj).map_err(|source| BuildError::Encode { field, source })?;
    if !value.is_object() {
        return Err(BuildError::NotAnObject(field));
    }
    Ok(value)
}

// === impl PolicyContext ===

impl PolicyContext {
    /// Replaces the resource under evaluation, e.g. with the output of a
    /// mutation, and recomputes everything derived from it.
    pub fn advance(&mut self, resource: Value) {
        self.new_resource = resource;
        self.images = extract_images(&self.new_resource);
        self.json_context = json!({
            "request": {
                "operation": operation_name(&self.operation),
                "kind": self.kind,
                "namespace": self.namespace,
                "userInfo": {
                    "username": self.admission_info.username,
                    "groups": self.admission_info.groups,
                },
                "roles": self.admission_info.roles,
                "clusterRoles": self.admission_info.cluster_roles,
                "object": self.new_resource,
                "oldObject": self.old_resource,
            },
            "images": images_context(&self.images),
        });
    }

    /// Reloads the labels of the request's namespace. Cluster-scoped requests
    /// and namespaces themselves have no namespace labels.
    pub fn refresh_namespace_labels(&mut self, namespaces: &dyn NamespaceLabels) {
        if self.kind == "Namespace" {
            return;
        }
        let Some(ns) = self.namespace.as_deref() else {
            return;
        };
        self.namespace_labels = namespaces.labels(ns).unwrap_or_else(|| {
            debug!(%ns, "Namespace labels not found");
            Labels::default()
        });
    }

    /// The resource the request is about: the new object, or the old one for
    /// deletions.
    pub fn resource(&self) -> &Value {
        if self.new_resource.is_null() {
            &self.old_resource
        } else {
            &self.new_resource
        }
    }

    /// True when the resource is already being deleted, i.e. carries a
    /// deletion timestamp in either snapshot.
    pub fn is_resource_deleted(&self) -> bool {
        let deleting =
            |v: &Value| v.pointer("/metadata/deletionTimestamp").is_some_and(|ts| !ts.is_null());
        deleting(&self.new_resource) || deleting(&self.old_resource)
    }

    pub fn json_context(&self) -> &Value {
        &self.json_context
    }
}

/// The wire name of an admission operation.
pub fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

fn images_context(images: &[ContainerImage]) -> Value {
    let mut fields = BTreeMap::<&str, BTreeMap<&str, &ContainerImage>>::new();
    for image in images {
        fields
            .entry(image.field)
            .or_default()
            .insert(&image.container, image);
    }
    serde_json::to_value(fields).unwrap_or_default()
}

/// Collects the images of a Pod or of any workload embedding a pod template.
fn extract_images(resource: &Value) -> Vec<ContainerImage> {
    let pod_spec = match resource.get("kind").and_then(Value::as_str) {
        Some("Pod") => resource.pointer("/spec"),
        Some("CronJob") => resource.pointer("/spec/jobTemplate/spec/template/spec"),
        _ => resource.pointer("/spec/template/spec"),
    };
    let Some(pod_spec) = pod_spec else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for field in CONTAINER_FIELDS {
        let containers = pod_spec.get(field).and_then(Value::as_array);
        for container in containers.into_iter().flatten() {
            let name = container.get("name").and_then(Value::as_str);
            let image = container.get("image").and_then(Value::as_str);
            if let (Some(name), Some(image)) = (name, image) {
                images.push(ContainerImage::parse(field, name, image));
            }
        }
    }
    images
}

// === impl ContainerImage ===

impl ContainerImage {
    /// Splits an image reference into its parts, applying Docker Hub
    /// defaults to unqualified references.
    pub fn parse(field: &'static str, container: &str, reference: &str) -> Self {
        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (reference, None),
        };
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (
                &name[..last_slash + i],
                Some(name[last_slash + i + 1..].to_string()),
            ),
            None => (name, None),
        };
        let tag = tag.or_else(|| digest.is_none().then(|| "latest".to_string()));

        let (registry, path) = match name.split_once('/') {
            Some((host, path))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), path.to_string())
            }
            Some(_) => ("docker.io".to_string(), name.to_string()),
            None => ("docker.io".to_string(), format!("library/{name}")),
        };

        Self {
            field,
            container: container.to_string(),
            reference: reference.to_string(),
            registry,
            path,
            tag,
            digest,
        }
    }
}
