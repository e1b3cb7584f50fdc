//! Side effects of admission decisions.
//!
//! Handlers never wait on metrics, events, reports or update requests. They
//! submit an [`Effect`] to the [`Dispatcher`], which queues it on a bounded
//! channel consumed by a fixed number of workers. When the queue is full the
//! effect is dropped, so a slow API server can never hold up admission.

use crate::{
    core::{EngineResponse, Policy, PolicyContext, ResourceKey},
    k8s::update_request::UpdateRequestSpec,
    metrics::DispatchMetrics,
};
use anyhow::Result;
use kube::core::admission::Operation;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

/// Submits side effects to a pool of workers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::Sender<Effect>,
    metrics: DispatchMetrics,
}

/// Processes side effects on behalf of the dispatcher's workers.
#[async_trait::async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn process(&self, effect: Effect) -> Result<()>;
}

#[derive(Clone, Debug)]
pub enum Effect {
    Metrics(MetricsUpdate),

    /// Policy outcomes to publish as Kubernetes events. `blocked` is set when
    /// the request was denied and the resource will not exist.
    Events {
        responses: Vec<EngineResponse>,
        blocked: bool,
    },

    Reports(Report),

    UpdateRequests(Vec<UpdateRequestSpec>),

    /// A resource was deleted; its old object is inspected for a generating
    /// update request to refresh.
    Deletion { old_object: Value },

    /// Evaluates audit-mode policies in the background.
    Audit {
        ctx: PolicyContext,
        policies: Vec<Policy>,
    },
}

#[derive(Clone, Debug)]
pub enum MetricsUpdate {
    Review {
        webhook: Webhook,
        operation: Operation,
        kind: String,
        allowed: bool,
        duration: Duration,
    },
    Policies {
        operation: Operation,
        responses: Vec<EngineResponse>,
    },
}

#[derive(Clone, Debug)]
pub enum Report {
    Results(Vec<EngineResponse>),
    Deleted(ResourceKey),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Webhook {
    Mutate,
    Validate,
}

// === impl Dispatcher ===

impl Dispatcher {
    /// Spawns `workers` concurrent consumers of a queue holding at most
    /// `capacity` effects.
    ///
    /// Once `drain` is signaled, no more effects are accepted. Shutdown is
    /// held until every effect already queued has been processed.
    pub fn spawn(
        sink: Arc<dyn Sink>,
        workers: u32,
        capacity: usize,
        metrics: DispatchMetrics,
        drain: drain::Watch,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(rx, sink, workers.max(1), drain).instrument(info_span!("dispatch")));
        Self { tx, metrics }
    }

    /// Queues an effect without waiting.
    pub fn submit(&self, effect: Effect) {
        let name = effect.name();
        match self.tx.try_send(effect) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(effect = name, "Side effect queue is full; dropping");
                self.metrics.drop_effect(name);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(effect = name, "Side effect queue is closed; dropping");
                self.metrics.drop_effect(name);
            }
        }
    }

    /// A dispatcher whose effects are only queued, for inspection.
    #[cfg(test)]
    pub(crate) fn capture(capacity: usize) -> (Self, mpsc::Receiver<Effect>) {
        let metrics = DispatchMetrics::register(&mut Default::default());
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }
}

async fn run(
    mut rx: mpsc::Receiver<Effect>,
    sink: Arc<dyn Sink>,
    workers: u32,
    drain: drain::Watch,
) {
    let permits = Arc::new(Semaphore::new(workers as usize));
    tokio::select! {
        _ = dispatch(&mut rx, &sink, &permits) => {
            debug!("Side effect queue closed");
        }

        handle = drain.signaled() => {
            rx.close();
            handle
                .release_after(async {
                    dispatch(&mut rx, &sink, &permits).await;
                    // Wait for in-flight effects.
                    drop(permits.acquire_many(workers).await);
                })
                .await;
            debug!("Side effects flushed");
        }
    }
}

async fn dispatch(rx: &mut mpsc::Receiver<Effect>, sink: &Arc<dyn Sink>, permits: &Arc<Semaphore>) {
    loop {
        // A worker must be available before an effect is dequeued so that
        // cancellation never loses an effect.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            return;
        };
        let Some(effect) = rx.recv().await else {
            return;
        };
        let sink = sink.clone();
        tokio::spawn(
            async move {
                let name = effect.name();
                if let Err(error) = sink.process(effect).await {
                    warn!(effect = name, %error, "Failed to process side effect");
                }
                drop(permit);
            }
            .in_current_span(),
        );
    }
}

// === impl Effect ===

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Metrics(_) => "metrics",
            Self::Events { .. } => "events",
            Self::Reports(_) => "reports",
            Self::UpdateRequests(_) => "update_requests",
            Self::Deletion { .. } => "deletion",
            Self::Audit { .. } => "audit",
        }
    }
}

// === impl Webhook ===

impl Webhook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mutate => "mutate",
            Self::Validate => "validate",
        }
    }
}
