use crate::{
    core::{
        gate, response, Engine, ImageVerificationMetadata, PatchSet, Policy, PolicyContext,
    },
    dispatch::{Dispatcher, Effect, MetricsUpdate, Report},
};
use anyhow::{bail, Result};
use tracing::{debug, warn};

/// Verifies the images of a mutated resource.
pub(crate) struct ImageVerification<'a> {
    pub engine: &'a dyn Engine,
    pub dispatcher: &'a Dispatcher,
}

#[derive(Debug, Default)]
pub(crate) struct Verified {
    pub patches: PatchSet,
    pub warnings: Vec<String>,
}

// === impl ImageVerification ===

impl ImageVerification<'_> {
    /// Fails with a message describing every rule that did not pass when the
    /// request must be blocked.
    pub(crate) async fn run(&self, ctx: &PolicyContext, policies: &[Policy]) -> Result<Verified> {
        let Some(last) = policies.last() else {
            return Ok(Verified::default());
        };

        let mut responses = Vec::with_capacity(policies.len());
        let mut patches = PatchSet::default();
        let mut verified = ImageVerificationMetadata::default();
        for policy in policies {
            let (er, ivm) = self.engine.verify_images(policy, ctx).await;
            patches.push(er.patches());
            verified.merge(ivm);
            responses.push(er);
        }

        // Policies are evaluated together, under the failure policy of the
        // last one.
        let blocked = gate::any_blocks(&responses, last.failure_policy());
        if !ctx.is_resource_deleted() {
            self.dispatcher.submit(Effect::Events {
                responses: responses.clone(),
                blocked,
            });
        }
        self.dispatcher
            .submit(Effect::Metrics(MetricsUpdate::Policies {
                operation: ctx.operation.clone(),
                responses: responses.clone(),
            }));

        if blocked {
            debug!("Image verification blocked the request");
            bail!("{}", response::blocked_message(&responses));
        }

        let warnings = response::warnings(&responses);
        self.dispatcher
            .submit(Effect::Reports(Report::Results(responses)));

        if !verified.is_empty() {
            match verified.patches(&ctx.new_resource) {
                Ok(patch) => patches.prepend(patch),
                Err(error) => warn!(%error, "Failed to build image verification annotation"),
            }
        }

        Ok(Verified { patches, warnings })
    }
}
