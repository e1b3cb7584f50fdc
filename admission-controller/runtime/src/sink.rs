use crate::{
    core::{Engine, EngineResponse, Policy, PolicyContext, RuleStatus, RuleType},
    deletion,
    dispatch::{Effect, MetricsUpdate, Report, Sink},
    k8s::{self, ObjectReference},
    metrics::AdmissionMetrics,
    update_requests::UpdateRequests,
};
use anyhow::{bail, Result};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Publishes side effects to the cluster.
pub struct KubeSink {
    recorder: Recorder,
    update_requests: Arc<dyn UpdateRequests>,
    engine: Arc<dyn Engine>,
    metrics: AdmissionMetrics,
}

// === impl KubeSink ===

impl KubeSink {
    pub fn new(
        client: k8s::Client,
        update_requests: Arc<dyn UpdateRequests>,
        engine: Arc<dyn Engine>,
        metrics: AdmissionMetrics,
    ) -> Self {
        let reporter = Reporter {
            controller: "kyverno-admission".to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
            update_requests,
            engine,
            metrics,
        }
    }

    async fn publish(&self, events: Vec<(Event, ObjectReference)>) -> Result<()> {
        let mut failed = 0;
        for (event, reference) in &events {
            if let Err(error) = self.recorder.publish(event, reference).await {
                debug!(%error, reason = %event.reason, "Failed to publish event");
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("failed to publish {failed} of {} events", events.len());
        }
        Ok(())
    }

    async fn audit(&self, ctx: PolicyContext, policies: Vec<Policy>) -> Result<()> {
        let mut responses = Vec::with_capacity(policies.len());
        for policy in &policies {
            match self.engine.validate(policy, &ctx).await {
                Ok(er) => responses.push(er),
                Err(error) => warn!(%policy, %error, "Failed to audit resource"),
            }
        }
        self.metrics.record_policies(&ctx.operation, &responses);
        let events = events(&responses, false);
        report(Report::Results(responses));
        self.publish(events).await
    }
}

#[async_trait::async_trait]
impl Sink for KubeSink {
    async fn process(&self, effect: Effect) -> Result<()> {
        match effect {
            Effect::Metrics(MetricsUpdate::Review {
                webhook,
                operation,
                kind,
                allowed,
                duration,
            }) => {
                self.metrics
                    .record_review(webhook, operation, kind, allowed, duration);
                Ok(())
            }

            Effect::Metrics(MetricsUpdate::Policies {
                operation,
                responses,
            }) => {
                self.metrics.record_policies(&operation, &responses);
                Ok(())
            }

            Effect::Events { responses, blocked } => {
                self.publish(events(&responses, blocked)).await
            }

            Effect::Reports(r) => {
                report(r);
                Ok(())
            }

            Effect::UpdateRequests(specs) => {
                let mut failed = 0;
                for spec in specs {
                    let policy = spec.policy.clone();
                    if let Err(error) = self.update_requests.create(spec).await {
                        warn!(%policy, %error, "Failed to create update request");
                        failed += 1;
                    }
                }
                if failed > 0 {
                    bail!("failed to create {failed} update requests");
                }
                Ok(())
            }

            Effect::Deletion { old_object } => {
                deletion::handle(&*self.update_requests, &old_object, chrono::Utc::now().to_rfc3339())
                    .await
            }

            Effect::Audit { ctx, policies } => self.audit(ctx, policies).await,
        }
    }
}

/// Records policy results. Report aggregation happens outside of the webhook,
/// which only emits the entries.
fn report(report: Report) {
    match report {
        Report::Results(responses) => {
            for er in &responses {
                for rule in &er.rules {
                    info!(
                        policy = %er.policy,
                        rule = %rule.name,
                        resource = %er.resource,
                        result = %rule.status,
                        message = %rule.message,
                        "Policy result",
                    );
                }
            }
        }
        Report::Deleted(resource) => info!(%resource, "Resource deleted"),
    }
}

/// Builds one event per rule that changed or failed to admit a resource.
///
/// Violations of blocked requests are reported on the policy, since the
/// resource will not exist.
pub(crate) fn events(responses: &[EngineResponse], blocked: bool) -> Vec<(Event, ObjectReference)> {
    let mut events = Vec::new();
    for er in responses {
        let policy_ref = ObjectReference {
            api_version: Some(format!("{}/v1", k8s::KYVERNO_GROUP)),
            kind: Some(er.policy.kind().to_string()),
            namespace: er.policy.namespace(),
            name: Some(er.policy.name()),
            ..Default::default()
        };
        let resource_ref = ObjectReference {
            api_version: Some(er.resource.api_version.clone()),
            kind: Some(er.resource.kind.clone()),
            namespace: er.resource.namespace.clone(),
            name: Some(er.resource.name.clone()),
            ..Default::default()
        };

        for rule in &er.rules {
            let note = format!(
                "policy {}/{} {}: {}",
                er.policy.name(),
                rule.name,
                rule.status,
                rule.message
            );
            match rule.status {
                RuleStatus::Fail | RuleStatus::Error => {
                    let (action, reference) = if blocked {
                        ("Blocked", policy_ref.clone())
                    } else {
                        ("Admitted", resource_ref.clone())
                    };
                    events.push((
                        Event {
                            type_: EventType::Warning,
                            reason: "PolicyViolation".to_string(),
                            note: Some(note),
                            action: action.to_string(),
                            secondary: None,
                        },
                        reference,
                    ));
                }
                RuleStatus::Pass if rule.rule_type == RuleType::Mutation => {
                    events.push((
                        Event {
                            type_: EventType::Normal,
                            reason: "PolicyApplied".to_string(),
                            note: Some(note),
                            action: "Mutated".to_string(),
                            secondary: None,
                        },
                        resource_ref.clone(),
                    ));
                }
                _ => {}
            }
        }
    }
    events
}
