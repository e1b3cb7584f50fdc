use crate::{
    core::{
        gate, response, Engine, EngineResponse, FailurePolicy, NamespaceLabels, Policy,
        PolicyContext, RuleResponse, RuleStatus, RuleType,
    },
    dispatch::{Dispatcher, Effect, MetricsUpdate, Report},
};
use tracing::{debug, warn};

/// Evaluates enforcing validate policies and image checks.
pub(crate) struct Validation<'a> {
    pub engine: &'a dyn Engine,
    pub namespaces: &'a dyn NamespaceLabels,
    pub dispatcher: &'a Dispatcher,
}

#[derive(Debug)]
pub(crate) struct Validated {
    pub allowed: bool,
    pub message: String,
    pub warnings: Vec<String>,
}

// === impl Validation ===

impl Validation<'_> {
    /// Each response blocks under its own policy's failure policy; the
    /// request is allowed when none does.
    pub(crate) async fn run(
        &self,
        mut ctx: PolicyContext,
        policies: &[Policy],
        image_checks: &[Policy],
    ) -> (PolicyContext, Validated) {
        let mut responses = Vec::with_capacity(policies.len() + image_checks.len());
        for policy in policies {
            if !policy.has_validate() {
                continue;
            }
            ctx.refresh_namespace_labels(self.namespaces);
            match self.engine.validate(policy, &ctx).await {
                Ok(er) => responses.push(er),
                Err(error) if policy.failure_policy() == FailurePolicy::Fail => {
                    warn!(%policy, %error, "Failed to evaluate policy");
                    responses.push(
                        EngineResponse::new(policy.clone(), ctx.resource().clone()).with_rule(
                            RuleResponse::new(
                                policy.name(),
                                RuleType::Validation,
                                RuleStatus::Error,
                                format!("failed to evaluate policy: {error:#}"),
                            ),
                        ),
                    );
                }
                Err(error) => warn!(%policy, %error, "Failed to evaluate policy; ignoring"),
            }
        }
        for policy in image_checks {
            ctx.refresh_namespace_labels(self.namespaces);
            let (er, _) = self.engine.verify_images(policy, &ctx).await;
            responses.push(er);
        }

        let blocking = responses
            .iter()
            .filter(|er| gate::response_blocks(er, er.policy.failure_policy()))
            // Audit-mode denials are only reported.
            .filter(|er| er.is_error() || er.validation_failure_action().is_enforce())
            .cloned()
            .collect::<Vec<_>>();
        let allowed = blocking.is_empty();

        if !ctx.is_resource_deleted() {
            self.dispatcher.submit(Effect::Events {
                responses: responses.clone(),
                blocked: !allowed,
            });
        }
        self.dispatcher
            .submit(Effect::Metrics(MetricsUpdate::Policies {
                operation: ctx.operation.clone(),
                responses: responses.clone(),
            }));

        if !allowed {
            debug!(policies = blocking.len(), "Validation blocked the request");
            let validated = Validated {
                allowed,
                message: response::blocked_message(&blocking),
                warnings: Vec::new(),
            };
            return (ctx, validated);
        }

        let warnings = response::warnings(&responses);
        if !responses.is_empty() {
            self.dispatcher
                .submit(Effect::Reports(Report::Results(responses)));
        }
        let validated = Validated {
            allowed,
            message: String::new(),
            warnings,
        };
        (ctx, validated)
    }
}
