use crate::{
    k8s::{
        labels::{MANAGED_BY, MANAGED_BY_KYVERNO, UPDATE_REQUEST_NAME},
        update_request::{RequestType, UPDATION_TIME_ANNOTATION},
    },
    update_requests::UpdateRequests,
};
use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// Refreshes the update request that generated a deleted resource, so that
/// the background controller recreates it.
///
/// Only resources managed by Kyverno are considered. Requests for mutations
/// of existing resources are left untouched.
pub(crate) async fn handle(
    update_requests: &dyn UpdateRequests,
    old_object: &Value,
    now: impl ToString,
) -> Result<()> {
    let label = |key: &str| {
        old_object
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
    };
    if label(MANAGED_BY) != Some(MANAGED_BY_KYVERNO) {
        return Ok(());
    }
    let Some(name) = label(UPDATE_REQUEST_NAME) else {
        debug!("Managed resource does not name an update request");
        return Ok(());
    };

    let ur = update_requests
        .get(name)
        .await
        .with_context(|| format!("failed to get update request {name}"))?;
    let Some(ur) = ur else {
        debug!(%name, "Update request not found");
        return Ok(());
    };
    if ur.spec.request_type == RequestType::Mutate {
        return Ok(());
    }

    update_requests
        .annotate(name, UPDATION_TIME_ANNOTATION, &now.to_string())
        .await
        .with_context(|| format!("failed to annotate update request {name}"))
}
