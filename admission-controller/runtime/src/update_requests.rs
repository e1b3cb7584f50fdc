use crate::{
    core::{context::operation_name, AdmissionInfo, ResourceKey},
    k8s::{
        self,
        update_request::{RequestType, ResourceSpec, UpdateRequestContext, UpdateRequestSpec},
        Api, ObjectMeta, Patch, PatchParams, PostParams, UpdateRequest,
    },
};
use anyhow::Result;
use kube::core::admission::Operation;
use serde_json::json;

const FIELD_MANAGER: &str = "kyverno-admission";

/// Reads and writes the UpdateRequests of the Kyverno namespace.
#[async_trait::async_trait]
pub trait UpdateRequests: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<UpdateRequest>>;

    async fn annotate(&self, name: &str, key: &str, value: &str) -> Result<()>;

    async fn create(&self, spec: UpdateRequestSpec) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeUpdateRequests {
    api: Api<UpdateRequest>,
    namespace: String,
}

// === impl KubeUpdateRequests ===

impl KubeUpdateRequests {
    pub fn new(client: k8s::Client, namespace: String) -> Self {
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
        }
    }
}

#[async_trait::async_trait]
impl UpdateRequests for KubeUpdateRequests {
    async fn get(&self, name: &str) -> Result<Option<UpdateRequest>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn annotate(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let patch = json!({
            "metadata": {
                "annotations": { key: value },
            },
        });
        self.api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn create(&self, spec: UpdateRequestSpec) -> Result<()> {
        let ur = UpdateRequest {
            metadata: ObjectMeta {
                generate_name: Some("ur-".to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec,
            status: None,
        };
        let ur = self.api.create(&PostParams::default(), &ur).await?;
        tracing::debug!(name = ?ur.metadata.name, "Created update request");
        Ok(())
    }
}

/// Describes a generate request for `resource` on behalf of `policy`.
pub(crate) fn generate(
    policy: String,
    resource: &ResourceKey,
    info: &AdmissionInfo,
    operation: Operation,
) -> UpdateRequestSpec {
    UpdateRequestSpec {
        request_type: RequestType::Generate,
        policy,
        resource: ResourceSpec {
            api_version: Some(resource.api_version.clone()).filter(|v| !v.is_empty()),
            kind: resource.kind.clone(),
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
        },
        context: UpdateRequestContext {
            username: Some(info.username.clone()),
            groups: Some(info.groups.clone()),
            operation: Some(operation_name(&operation).to_string()),
        },
    }
}
