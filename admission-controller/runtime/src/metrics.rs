use crate::{
    core::{context::operation_name, EngineResponse},
    dispatch::Webhook,
};
use kube::core::admission::Operation;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::time::Duration;

/// Admission and policy evaluation metrics, updated by the side-effect
/// workers.
#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    requests: Family<RequestLabels, Counter>,
    review_duration: Family<RequestLabels, Histogram>,
    policy_results: Family<RuleLabels, Counter>,
    policy_duration: Family<PolicyLabels, Histogram>,
}

#[derive(Clone, Debug)]
pub struct DispatchMetrics {
    dropped: Family<EffectLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RequestLabels {
    webhook: &'static str,
    operation: &'static str,
    resource_kind: String,
    allowed: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PolicyLabels {
    policy_name: String,
    policy_namespace: String,
    operation: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RuleLabels {
    policy_name: String,
    policy_namespace: String,
    rule_name: String,
    rule_type: String,
    rule_result: String,
    operation: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct EffectLabels {
    effect: &'static str,
}

// === AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        reg.register(
            "admission_requests",
            "Total number of admission requests handled by a webhook",
            requests.clone(),
        );

        let review_duration = Family::<RequestLabels, Histogram>::new_with_constructor(|| {
            // Requests are bounded by the webhook timeout, which is at most 30s.
            Histogram::new([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0])
        });
        reg.register_with_unit(
            "admission_review_duration",
            "Histogram of the time taken to compute an admission verdict",
            Unit::Seconds,
            review_duration.clone(),
        );

        let policy_results = Family::<RuleLabels, Counter>::default();
        reg.register(
            "policy_results",
            "Total number of rule results, by policy, rule and result",
            policy_results.clone(),
        );

        let policy_duration = Family::<PolicyLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
        });
        reg.register_with_unit(
            "policy_execution_duration",
            "Histogram of the time taken to evaluate a policy against a resource",
            Unit::Seconds,
            policy_duration.clone(),
        );

        Self {
            requests,
            review_duration,
            policy_results,
            policy_duration,
        }
    }

    pub(crate) fn record_review(
        &self,
        webhook: Webhook,
        operation: Operation,
        kind: String,
        allowed: bool,
        duration: Duration,
    ) {
        let labels = RequestLabels {
            webhook: webhook.as_str(),
            operation: operation_name(&operation),
            resource_kind: kind,
            allowed: if allowed { "true" } else { "false" },
        };
        self.requests.get_or_create(&labels).inc();
        self.review_duration
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());
    }

    pub(crate) fn record_policies(&self, operation: &Operation, responses: &[EngineResponse]) {
        let operation = operation_name(operation);
        for er in responses {
            let policy_name = er.policy.name();
            let policy_namespace = er.policy.namespace().unwrap_or_default();
            self.policy_duration
                .get_or_create(&PolicyLabels {
                    policy_name: policy_name.clone(),
                    policy_namespace: policy_namespace.clone(),
                    operation,
                })
                .observe(er.processing_time.as_secs_f64());

            for rule in &er.rules {
                self.policy_results
                    .get_or_create(&RuleLabels {
                        policy_name: policy_name.clone(),
                        policy_namespace: policy_namespace.clone(),
                        rule_name: rule.name.clone(),
                        rule_type: rule.rule_type.to_string(),
                        rule_result: rule.status.to_string(),
                        operation,
                    })
                    .inc();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn requests(&self, webhook: Webhook, operation: Operation, kind: &str, allowed: bool) -> u64 {
        self.requests
            .get_or_create(&RequestLabels {
                webhook: webhook.as_str(),
                operation: operation_name(&operation),
                resource_kind: kind.to_string(),
                allowed: if allowed { "true" } else { "false" },
            })
            .get()
    }
}

// === DispatchMetrics ===

impl DispatchMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let dropped = Family::<EffectLabels, Counter>::default();
        reg.register(
            "dispatch_dropped",
            "Total number of side effects dropped because the dispatch queue was full or closed",
            dropped.clone(),
        );
        Self { dropped }
    }

    pub(crate) fn drop_effect(&self, effect: &'static str) {
        self.dropped.get_or_create(&EffectLabels { effect }).inc();
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self, effect: &'static str) -> u64 {
        self.dropped.get_or_create(&EffectLabels { effect }).get()
    }
}
