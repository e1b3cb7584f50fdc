use crate::{
    admission::Admission,
    dispatch::Dispatcher,
    engine::{PolicyEngine, StructuralValidator},
    handlers::Handlers,
    index::{NamespaceIndex, PolicyIndex, RoleBindingIndex, SharedIndex},
    k8s,
    metrics::{AdmissionMetrics, DispatchMetrics},
    sink::KubeSink,
    update_requests::KubeUpdateRequests,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "kyverno-admission", about = "A Kubernetes policy admission controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "kyverno=info,warn",
        env = "KYVERNO_ADMISSION_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// The namespace in which update requests are created.
    #[clap(long, default_value = "kyverno")]
    kyverno_namespace: String,

    /// Requests that cannot be decided within this time are denied.
    #[clap(long, default_value = "10000")]
    admission_timeout_ms: u64,

    #[clap(long, default_value = "3")]
    dispatch_workers: u32,

    /// The maximum number of side effects to buffer. Effects submitted while
    /// the queue is full are dropped.
    #[clap(long, default_value = "1000")]
    dispatch_queue_size: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            kyverno_namespace,
            admission_timeout_ms,
            dispatch_workers,
            dispatch_queue_size,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let kyverno = prom.sub_registry_with_prefix("kyverno");
        let admission_metrics = AdmissionMetrics::register(kyverno);
        let dispatch_metrics = DispatchMetrics::register(kyverno);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Build the indexes that admission requests are evaluated against.
        let policies = SharedIndex::new(PolicyIndex::default());
        let namespaces = SharedIndex::new(NamespaceIndex::default());
        let role_bindings = SharedIndex::new(RoleBindingIndex::default());

        // Spawn resource watches.

        let cluster_policies = runtime.watch_all::<k8s::ClusterPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(policies.inner(), cluster_policies)
                .instrument(info_span!("clusterpolicies")),
        );

        let namespaced_policies = runtime.watch_all::<k8s::Policy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(policies.inner(), namespaced_policies)
                .instrument(info_span!("policies")),
        );

        let ns = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(namespaces.inner(), ns).instrument(info_span!("namespaces")),
        );

        let rbs = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(role_bindings.inner(), rbs)
                .instrument(info_span!("rolebindings")),
        );

        let crbs = runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(role_bindings.inner(), crbs)
                .instrument(info_span!("clusterrolebindings")),
        );

        // Side effects are processed in the background and flushed on
        // shutdown.
        let engine = Arc::new(PolicyEngine::default());
        let update_requests = Arc::new(KubeUpdateRequests::new(
            runtime.client(),
            kyverno_namespace,
        ));
        let sink = Arc::new(KubeSink::new(
            runtime.client(),
            update_requests,
            engine.clone(),
            admission_metrics,
        ));
        let dispatcher = Dispatcher::spawn(
            sink,
            dispatch_workers,
            dispatch_queue_size,
            dispatch_metrics,
            runtime.shutdown_handle(),
        );

        let handlers = Handlers::new(
            Arc::new(policies),
            Arc::new(namespaces),
            Arc::new(role_bindings),
            engine,
            Arc::new(StructuralValidator::default()),
            dispatcher,
        );
        let admission = Admission::new(handlers, Duration::from_millis(admission_timeout_ms));
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
