//! Maps a policy's failure policy and an engine outcome to a block decision.
//!
//! Under `Fail`, any hard failure blocks: an authored denial (a rule reported
//! `Fail`) or an evaluation error (a rule reported `Error`). Under `Ignore`,
//! evaluation errors never block, and authored denials block only when the
//! policy enforces.

use crate::response::EngineResponse;
use kyverno_admission_k8s_api::policy::{FailurePolicy, ValidationFailureAction};

/// Decides whether a single engine response blocks the request.
pub fn blocks(
    failure_policy: FailurePolicy,
    action: ValidationFailureAction,
    denied: bool,
    errored: bool,
) -> bool {
    match failure_policy {
        FailurePolicy::Fail => denied || errored,
        FailurePolicy::Ignore => denied && action.is_enforce(),
    }
}

/// Decides whether a response blocks, given the failure policy in effect.
pub fn response_blocks(er: &EngineResponse, failure_policy: FailurePolicy) -> bool {
    blocks(
        failure_policy,
        er.validation_failure_action(),
        er.is_failed(),
        er.is_error(),
    )
}

/// True if any of the responses blocks under `failure_policy`.
pub fn any_blocks(responses: &[EngineResponse], failure_policy: FailurePolicy) -> bool {
    responses
        .iter()
        .any(|er| response_blocks(er, failure_policy))
}
