use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation bumped on an UpdateRequest when its trigger resource changes,
/// so the background controller reprocesses it.
pub const UPDATION_TIME_ANNOTATION: &str = "generate.kyverno.io/updation-time";

/// Records that a generate or mutate-existing rule must be (re)applied for a
/// trigger resource by the background controller.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1beta1",
    kind = "UpdateRequest",
    namespaced,
    status = "UpdateRequestStatus",
    shortname = "ur"
)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestSpec {
    pub request_type: RequestType,
    pub policy: String,
    pub resource: ResourceSpec,
    #[serde(default)]
    pub context: UpdateRequestContext,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Mutate,
    Generate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub api_version: Option<String>,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestContext {
    pub username: Option<String>,
    pub groups: Option<Vec<String>>,
    pub operation: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct UpdateRequestStatus {
    pub state: Option<UpdateRequestState>,
    pub message: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum UpdateRequestState {
    Pending,
    Failed,
    Completed,
    Skip,
}
