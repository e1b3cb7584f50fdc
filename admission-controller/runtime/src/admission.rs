use crate::{cleanup, core::Verdict, handlers::Handlers};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, trace, warn};

/// Serves the admission webhooks.
#[derive(Clone)]
pub struct Admission {
    handlers: Handlers,
    timeout: Duration,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Mutate,
    Validate,
    CleanupPolicy,
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let route = match Route::from_request(req.method(), req.uri().path()) {
            Some(route) => route,
            None => {
                return Box::pin(future::ok(
                    Response::builder()
                        .status(http::StatusCode::NOT_FOUND)
                        .body(Body::default())
                        .expect("not found response must be valid"),
                ))
            }
        };

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(route, req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(handlers: Handlers, timeout: Duration) -> Self {
        Self { handlers, timeout }
    }

    /// Computes the verdict of a webhook, denying the request when it cannot
    /// be reached in time. Side effects that were already submitted still run.
    pub(crate) async fn admit(self, route: Route, req: AdmissionRequest) -> AdmissionResponse {
        let verdict = match route {
            Route::CleanupPolicy => cleanup::validate(&req),
            Route::Mutate => self.within_timeout(self.handlers.mutate(&req)).await,
            Route::Validate => self.within_timeout(self.handlers.validate(&req)).await,
        };
        verdict.into_response(&req)
    }

    async fn within_timeout(&self, verdict: impl std::future::Future<Output = Verdict>) -> Verdict {
        match time::timeout(self.timeout, verdict).await {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Admission request timed out");
                Verdict::deny(format!(
                    "admission request timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }
}

// === impl Route ===

impl Route {
    fn from_request(method: &http::Method, path: &str) -> Option<Self> {
        if method != http::Method::POST {
            return None;
        }
        match path {
            "/mutate" => Some(Self::Mutate),
            "/validate" => Some(Self::Validate),
            "/cleanuppolicy/validate" => Some(Self::CleanupPolicy),
            _ => None,
        }
    }
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
