use crate::{
    context::PolicyContext, image::ImageVerificationMetadata, policy::Policy,
    response::EngineResponse,
};
use anyhow::Result;
use serde_json::Value;

/// Applies a policy to the resource of a [`PolicyContext`].
///
/// An `Err` means the policy could not be evaluated at all. Rule-level
/// outcomes, including authored denials, are reported in the response.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    async fn mutate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse>;

    async fn validate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse>;

    /// Verifies and, where configured, rewrites the images of the resource.
    /// Verification failures are reported as rule outcomes.
    async fn verify_images(
        &self,
        policy: &Policy,
        ctx: &PolicyContext,
    ) -> (EngineResponse, ImageVerificationMetadata);
}

/// Checks that a resource is well formed for its kind.
pub trait SchemaValidator: Send + Sync {
    fn validate_resource(&self, resource: &Value, api_version: &str, kind: &str) -> Result<()>;
}
