use super::policy::MatchResources;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec shared by `CleanupPolicy` and `ClusterCleanupPolicy`.
///
/// The cleanup controller that schedules deletions lives outside of the
/// admission webhook; only admission-time validation of these objects is
/// handled here.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CleanupPolicySpec {
    /// Selects the resources to delete. At least one kind is required.
    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,

    pub exclude: Option<MatchResources>,

    /// The schedule in Cron format.
    #[serde(default)]
    pub schedule: String,

    pub conditions: Option<serde_json::Value>,
}
