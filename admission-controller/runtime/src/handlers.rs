use crate::{
    core::{
        AdmissionInfo, Engine, NamespaceLabels, PatchSet, PolicyCache, PolicyContextBuilder, PolicyType,
        ResourceKey, RoleBindings, SchemaValidator, Verdict,
    },
    dispatch::{Dispatcher, Effect, MetricsUpdate, Report, Webhook},
    k8s::{self, labels::GENERATE_POLICY_NAME, DynamicObject},
    mutation::Mutation,
    update_requests,
    validation::Validation,
    verify_images::ImageVerification,
};
use kube::core::admission::{AdmissionRequest, Operation};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

type Request = AdmissionRequest<DynamicObject>;

/// Computes the verdicts of the mutating and validating webhooks.
#[derive(Clone)]
pub struct Handlers {
    policies: Arc<dyn PolicyCache>,
    contexts: PolicyContextBuilder,
    namespaces: Arc<dyn NamespaceLabels>,
    engine: Arc<dyn Engine>,
    schema: Arc<dyn SchemaValidator>,
    dispatcher: Dispatcher,
}

// === impl Handlers ===

impl Handlers {
    pub fn new(
        policies: Arc<dyn PolicyCache>,
        namespaces: Arc<dyn NamespaceLabels>,
        role_bindings: Arc<dyn RoleBindings>,
        engine: Arc<dyn Engine>,
        schema: Arc<dyn SchemaValidator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            policies,
            contexts: PolicyContextBuilder::new(namespaces.clone(), role_bindings),
            namespaces,
            engine,
            schema,
            dispatcher,
        }
    }

    pub async fn mutate(&self, req: &Request) -> Verdict {
        let start = Instant::now();
        let verdict = self.mutate_verdict(req).await;
        self.record(Webhook::Mutate, req, &verdict, start);
        verdict
    }

    pub async fn validate(&self, req: &Request) -> Verdict {
        let start = Instant::now();
        let verdict = self.validate_verdict(req).await;
        self.record(Webhook::Validate, req, &verdict, start);
        verdict
    }

    async fn mutate_verdict(&self, req: &Request) -> Verdict {
        if passes_through(req) {
            return Verdict::allow();
        }
        if req.operation == Operation::Delete {
            match req.old_object.as_ref().map(serde_json::to_value) {
                Some(Ok(old)) => self
                    .dispatcher
                    .submit(Effect::Reports(Report::Deleted(ResourceKey::from_value(&old)))),
                Some(Err(error)) => warn!(%error, "Failed to encode deleted object"),
                None => debug!("Delete request has no old object"),
            }
            return Verdict::allow();
        }

        let kind = req.kind.kind.as_str();
        let namespace = req.namespace.as_deref();
        let mutate = self
            .policies
            .get_policies(PolicyType::Mutate, kind, namespace);
        let verify_images = self
            .policies
            .get_policies(PolicyType::VerifyImagesMutate, kind, namespace);
        if mutate.is_empty() && verify_images.is_empty() {
            debug!("No policies match");
            return Verdict::allow();
        }
        debug!(
            mutate = mutate.len(),
            verify_images = verify_images.len(),
            "Mutating"
        );

        let ctx = match self.contexts.build(req, &mutate) {
            Ok(ctx) => ctx,
            Err(error) => {
                warn!(%error, "Failed to build policy context");
                return Verdict::deny(error);
            }
        };

        let mutation = Mutation {
            engine: &*self.engine,
            schema: &*self.schema,
            namespaces: &*self.namespaces,
            dispatcher: &self.dispatcher,
        };
        let (ctx, mutated) = match mutation.run(ctx, &mutate).await {
            Ok(output) => output,
            Err(error) => {
                info!(%error, "Mutation failed");
                return Verdict::deny(format!("{error:#}"));
            }
        };

        let verification = ImageVerification {
            engine: &*self.engine,
            dispatcher: &self.dispatcher,
        };
        let verified = match verification.run(&ctx, &verify_images).await {
            Ok(verified) => verified,
            Err(error) => {
                info!("Image verification failed");
                return Verdict::deny(format!("{error:#}"));
            }
        };

        let mut patches = PatchSet::default();
        patches.extend(mutated.patches);
        patches.extend(verified.patches);
        let mut warnings = mutated.warnings;
        warnings.extend(verified.warnings);
        Verdict::allow()
            .with_patch(patches.join())
            .with_warnings(warnings)
    }

    async fn validate_verdict(&self, req: &Request) -> Verdict {
        if req.operation == Operation::Delete {
            match req.old_object.as_ref().map(serde_json::to_value) {
                Some(Ok(old_object)) => self.dispatcher.submit(Effect::Deletion { old_object }),
                Some(Err(error)) => warn!(%error, "Failed to encode deleted object"),
                None => debug!("Delete request has no old object"),
            }
        }
        if passes_through(req) {
            return Verdict::allow();
        }

        let kind = req.kind.kind.as_str();
        let namespace = req.namespace.as_deref();
        let enforce = self
            .policies
            .get_policies(PolicyType::ValidateEnforce, kind, namespace);
        let image_checks = self
            .policies
            .get_policies(PolicyType::VerifyImagesValidate, kind, namespace);
        let generate = self
            .policies
            .get_policies(PolicyType::Generate, kind, namespace);
        debug!(
            validate = enforce.len(),
            verify_images = image_checks.len(),
            generate = generate.len(),
            "Validating"
        );

        if generate.is_empty() && req.operation == Operation::Update {
            self.generated_resource_updated(req);
        }

        let ctx = match self.contexts.build(req, &generate) {
            Ok(ctx) => ctx,
            Err(error) => {
                warn!(%error, "Failed to build policy context");
                return Verdict::deny(error);
            }
        };

        let validation = Validation {
            engine: &*self.engine,
            namespaces: &*self.namespaces,
            dispatcher: &self.dispatcher,
        };
        let (ctx, validated) = validation.run(ctx, &enforce, &image_checks).await;
        if !validated.allowed {
            info!("Validation failed");
            return Verdict::deny(validated.message);
        }

        let audit = self
            .policies
            .get_policies(PolicyType::ValidateAudit, kind, namespace);
        let resource = ResourceKey::from_value(ctx.resource());
        let requests = generate
            .iter()
            .map(|policy| {
                update_requests::generate(
                    policy.name(),
                    &resource,
                    &ctx.admission_info,
                    ctx.operation.clone(),
                )
            })
            .collect::<Vec<_>>();
        if !requests.is_empty() {
            self.dispatcher.submit(Effect::UpdateRequests(requests));
        }
        if !audit.is_empty() {
            self.dispatcher.submit(Effect::Audit {
                ctx,
                policies: audit,
            });
        }

        Verdict::allow().with_warnings(validated.warnings)
    }

    /// Asks the policy that generated a resource to reconcile it after it was
    /// changed.
    fn generated_resource_updated(&self, req: &Request) {
        let Some(object) = req.object.as_ref() else {
            return;
        };
        let Some(policy) = object.metadata.labels.as_ref().and_then(|l| l.get(GENERATE_POLICY_NAME))
        else {
            return;
        };
        let resource = match serde_json::to_value(object) {
            Ok(resource) => ResourceKey::from_value(&resource),
            Err(error) => {
                warn!(%error, "Failed to encode generated resource");
                return;
            }
        };
        debug!(%policy, %resource, "Generated resource updated");

        let info = AdmissionInfo {
            username: req.user_info.username.clone().unwrap_or_default(),
            groups: req.user_info.groups.clone().unwrap_or_default(),
            ..Default::default()
        };
        let spec = update_requests::generate(policy.clone(), &resource, &info, req.operation.clone());
        self.dispatcher.submit(Effect::UpdateRequests(vec![spec]));
    }

    fn record(&self, webhook: Webhook, req: &Request, verdict: &Verdict, start: Instant) {
        self.dispatcher
            .submit(Effect::Metrics(MetricsUpdate::Review {
                webhook,
                operation: req.operation.clone(),
                kind: req.kind.kind.clone(),
                allowed: verdict.is_allowed(),
                duration: start.elapsed(),
            }));
    }
}

/// Kyverno's own reports and requests, and status updates of policies, are
/// admitted without evaluation.
fn passes_through(req: &Request) -> bool {
    let kind = req.kind.kind.as_str();
    if k8s::is_reserved_kind(kind) {
        return true;
    }
    req.sub_resource.as_deref().is_some_and(|s| !s.is_empty()) && k8s::is_policy_kind(kind)
}
