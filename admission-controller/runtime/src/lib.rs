#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kyverno_admission_core as core;
pub use kyverno_admission_engine as engine;
pub use kyverno_admission_k8s_api as k8s;
pub use kyverno_admission_k8s_index as index;

mod admission;
mod args;
mod cleanup;
mod deletion;
pub mod dispatch;
mod handlers;
mod metrics;
mod mutation;
mod sink;
mod update_requests;
mod validation;
mod verify_images;

#[cfg(test)]
mod tests;

pub use self::{
    admission::Admission,
    args::Args,
    dispatch::{Dispatcher, Effect, Sink},
    handlers::Handlers,
    metrics::{AdmissionMetrics, DispatchMetrics},
    sink::KubeSink,
    update_requests::{KubeUpdateRequests, UpdateRequests},
};
