use crate::{
    core::{
        patch::annotation_patches, response, Engine, EngineResponse, FailurePolicy,
        NamespaceLabels, PatchSet, Policy, PolicyContext, SchemaValidator, WILDCARD_KIND,
    },
    dispatch::{Dispatcher, Effect, MetricsUpdate},
};
use anyhow::{bail, Result};
use kube::core::admission::Operation;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Applies mutate policies in order, each to the output of the previous one.
pub(crate) struct Mutation<'a> {
    pub engine: &'a dyn Engine,
    pub schema: &'a dyn SchemaValidator,
    pub namespaces: &'a dyn NamespaceLabels,
    pub dispatcher: &'a Dispatcher,
}

#[derive(Debug, Default)]
pub(crate) struct Mutated {
    pub patches: PatchSet,
    pub warnings: Vec<String>,
}

// === impl Mutation ===

impl Mutation<'_> {
    /// Runs every policy against the context and returns the context with its
    /// resource advanced past every emitted patch.
    ///
    /// The first policy that fails to apply aborts the stage: no partial
    /// mutation is ever admitted.
    pub(crate) async fn run(
        &self,
        mut ctx: PolicyContext,
        policies: &[Policy],
    ) -> Result<(PolicyContext, Mutated)> {
        if policies.is_empty() {
            return Ok((ctx, Mutated::default()));
        }
        if ctx.operation == Operation::Update && ctx.is_resource_deleted() {
            debug!("Resource is being deleted; skipping mutation");
            return Ok((ctx, Mutated::default()));
        }
        let deleting = ctx.is_resource_deleted();

        let mut patches = PatchSet::default();
        let mut responses = Vec::<EngineResponse>::new();
        for policy in policies {
            if !policy.has_mutate() {
                continue;
            }
            ctx.refresh_namespace_labels(self.namespaces);

            let er = match self.engine.mutate(policy, &ctx).await {
                Ok(er) => er,
                Err(error) if policy.failure_policy() == FailurePolicy::Fail => {
                    bail!("failed to apply policy {}: {error:#}", policy.name());
                }
                Err(error) => {
                    warn!(%policy, %error, "Failed to evaluate policy; ignoring");
                    continue;
                }
            };

            if !deleting && !er.is_successful() {
                bail!(
                    "failed to apply policy {} rules [{}]",
                    policy.name(),
                    er.failed_rules().join(" ")
                );
            }

            let patch = er.patches();
            if !patch.0.is_empty() {
                info!(%policy, rules = ?er.success_rules(), "Applied mutation rules");
                patches.push(patch);
            }
            ctx.advance(er.patched_resource.clone());

            let kind = str_field(&ctx.new_resource, "kind");
            if kind != WILDCARD_KIND {
                let api_version = str_field(&ctx.new_resource, "apiVersion");
                if let Err(error) =
                    self.schema
                        .validate_resource(&ctx.new_resource, api_version, kind)
                {
                    bail!(
                        "failed to validate resource mutated by policy {}: {error:#}",
                        policy.name()
                    );
                }
            }
            responses.push(er);
        }

        // Rules that changed the resource are recorded on it, after every
        // functional patch.
        match annotation_patches(&responses, &ctx.new_resource) {
            Ok(None) => {}
            Ok(Some(patch)) => {
                let mut resource = ctx.new_resource.clone();
                match json_patch::patch(&mut resource, &patch.0) {
                    Ok(()) => {
                        patches.push(patch);
                        ctx.advance(resource);
                    }
                    Err(error) => warn!(%error, "Failed to annotate mutated resource"),
                }
            }
            Err(error) => warn!(%error, "Failed to build annotation patches"),
        }

        if !deleting {
            self.dispatcher.submit(Effect::Events {
                responses: responses.clone(),
                blocked: false,
            });
        }
        let warnings = response::warnings(&responses);
        self.dispatcher
            .submit(Effect::Metrics(MetricsUpdate::Policies {
                operation: ctx.operation.clone(),
                responses,
            }));

        Ok((ctx, Mutated { patches, warnings }))
    }
}

fn str_field<'v>(resource: &'v Value, field: &str) -> &'v str {
    resource.get(field).and_then(Value::as_str).unwrap_or_default()
}
