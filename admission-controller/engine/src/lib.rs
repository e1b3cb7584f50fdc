//! A built-in policy engine covering the rule forms the admission webhook
//! evaluates without external services.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod matcher;
mod mutate;
mod schema;
mod validate;
mod verify;

#[cfg(test)]
mod tests;

pub use self::{
    matcher::{glob_matches, rule_applies},
    schema::StructuralValidator,
};
use anyhow::{ensure, Result};
use kyverno_admission_core::{
    context::operation_name, Engine, EngineResponse, ImageVerificationMetadata, Policy, PolicyContext,
};
use std::time::Instant;
use tracing::trace;

#[derive(Clone, Debug, Default)]
pub struct PolicyEngine(());

#[async_trait::async_trait]
impl Engine for PolicyEngine {
    async fn mutate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse> {
        let start = Instant::now();
        ensure!(
            ctx.new_resource.is_object(),
            "{} request has no resource to mutate",
            operation_name(&ctx.operation)
        );

        let mut resource = ctx.new_resource.clone();
        let mut rules = Vec::new();
        for rule in &policy.spec().rules {
            let Some(mutation) = rule.mutate.as_ref() else {
                continue;
            };
            if !rule_applies(rule, ctx) {
                trace!(policy = %policy, rule = %rule.name, "Rule does not apply");
                continue;
            }
            rules.push(mutate::apply(rule, mutation, &mut resource));
        }

        let mut rsp = EngineResponse::new(policy.clone(), resource);
        rsp.rules = rules;
        rsp.processing_time = start.elapsed();
        Ok(rsp)
    }

    async fn validate(&self, policy: &Policy, ctx: &PolicyContext) -> Result<EngineResponse> {
        let start = Instant::now();
        let mut rules = Vec::new();
        for rule in &policy.spec().rules {
            let Some(validation) = rule.validate.as_ref() else {
                continue;
            };
            if !rule_applies(rule, ctx) {
                trace!(policy = %policy, rule = %rule.name, "Rule does not apply");
                continue;
            }
            rules.push(validate::evaluate(rule, validation));
        }

        let mut rsp = EngineResponse::new(policy.clone(), ctx.resource().clone());
        rsp.rules = rules;
        rsp.processing_time = start.elapsed();
        Ok(rsp)
    }

    async fn verify_images(
        &self,
        policy: &Policy,
        ctx: &PolicyContext,
    ) -> (EngineResponse, ImageVerificationMetadata) {
        let start = Instant::now();
        let mut ivm = ImageVerificationMetadata::default();
        let mut rules = Vec::new();
        for rule in &policy.spec().rules {
            let Some(verifications) = rule.verify_images.as_ref().filter(|v| !v.is_empty()) else {
                continue;
            };
            if !rule_applies(rule, ctx) {
                trace!(policy = %policy, rule = %rule.name, "Rule does not apply");
                continue;
            }
            rules.push(verify::verify(rule, verifications, &ctx.images, &mut ivm));
        }

        let mut rsp = EngineResponse::new(policy.clone(), ctx.resource().clone());
        rsp.rules = rules;
        rsp.processing_time = start.elapsed();
        (rsp, ivm)
    }
}
