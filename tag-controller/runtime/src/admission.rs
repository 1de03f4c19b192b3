//! Admission webhook that records resource tags as objects are admitted.
//!
//! Admission is never denied on behalf of a resource: parse errors, disabled
//! kinds and store failures all produce an allowed response. Only a review
//! that cannot be decoded at all is answered with an invalid response.

use crate::metrics::{operation_str, AdmissionMetrics, Metrics};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource,
};
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc};
use tag_controller_core::{Reconciler, ResourceType, Settings, UpsertError, Written};
use tag_controller_k8s::{
    normalize, CronJob, DaemonSet, Deployment, Job, Namespace, Node, Pod, StatefulSet, UpsertMetrics,
    Workload,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};


#[derive(Clone)]
pub struct Admission {
    ctx: Arc<Context>,
    handlers: Arc<[Handler]>,
}

/// State shared by every handler.
pub struct Context {
    reconciler: Reconciler,
    settings: Arc<Settings>,
    errors: ErrorSink,
    upserts: UpsertMetrics,
    admission: AdmissionMetrics,
}

/// Routes the operations of one kind of resource.
///
/// Operations without a function are acknowledged without being processed.
pub struct Handler {
    resource_type: ResourceType,
    is_kind: fn(&AdmissionRequest) -> bool,
    create: Option<AdmitFn>,
    update: Option<AdmitFn>,
    delete: Option<AdmitFn>,
    connect: Option<AdmitFn>,
}

pub type AdmitFn = fn(Arc<Context>, AdmissionRequest) -> future::BoxFuture<'static, Outcome>;

/// What became of an admitted object. The admission itself is allowed in
/// every case.
#[derive(Debug)]
pub enum Outcome {
    Recorded(Written),
    Skipped(SkipReason),
    Failed(Arc<UpsertError>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither labels nor annotations are collected for the kind.
    Disabled(ResourceType),
    /// The object could not be decoded as the kind it claims to be.
    Parse(String),
    MissingName,
    NotRegistered(Operation),
    /// The controller does not catalog this kind.
    Unhandled(String),
}

/// Forwards upsert failures to a bounded queue. Failures are dropped when
/// the queue is full.
#[derive(Clone, Debug)]
pub struct ErrorSink(mpsc::Sender<Arc<UpsertError>>);

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

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
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            json_response(admission.review(&bytes).await)
        })
    }
}

impl Admission {
    pub fn new(ctx: Context) -> Self {
        let handlers = vec![
            Handler::workload::<Pod>(),
            Handler::workload::<Namespace>(),
            Handler::workload::<Node>(),
            Handler::workload::<Deployment>(),
            Handler::workload::<StatefulSet>(),
            Handler::workload::<DaemonSet>(),
            Handler::workload::<Job>(),
            Handler::workload::<CronJob>(),
        ];
        Self {
            ctx: Arc::new(ctx),
            handlers: handlers.into(),
        }
    }

    async fn review(self, body: &[u8]) -> AdmissionReview {
        let review: AdmissionReview = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                self.ctx.admission.observe(None, None, "invalid");
                return AdmissionResponse::invalid(error).into_review();
            }
        };
        trace!(?review);

        let rsp = match review.try_into() {
            Ok(req) => {
                debug!(?req);
                self.admit(req).await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                self.ctx.admission.observe(None, None, "invalid");
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        rsp.into_review()
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let op = req.operation.clone();
        let (kind, outcome) = self.dispatch(req).await;
        self.ctx.admission.observe(kind, Some(&op), outcome.as_str());
        rsp
    }

    /// Finds the handler for the request's kind and executes it.
    async fn dispatch(&self, req: AdmissionRequest) -> (Option<ResourceType>, Outcome) {
        let Some(handler) = self.handlers.iter().find(|h| (h.is_kind)(&req)) else {
            let reason = SkipReason::Unhandled(format!(
                "{}.{}.{}",
                req.kind.group, req.kind.version, req.kind.kind
            ));
            debug!(%reason, "Allowing");
            return (None, Outcome::Skipped(reason));
        };

        let kind = handler.resource_type;
        let ns = req.namespace.clone().unwrap_or_default();
        let name = req.name.clone();
        let op = operation_str(&req.operation);
        let outcome = handler.execute(self.ctx.clone(), req).await;
        match &outcome {
            Outcome::Recorded(written) => {
                debug!(%kind, %ns, %name, %op, id = %written.id(), "Recorded")
            }
            Outcome::Skipped(reason) => info!(%kind, %ns, %name, %op, %reason, "Skipped"),
            Outcome::Failed(error) => {
                warn!(%kind, %ns, %name, %op, %error, "Failed to record; allowing")
            }
        }
        (Some(kind), outcome)
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

// === impl Context ===

impl Context {
    pub fn new(
        reconciler: Reconciler,
        settings: Arc<Settings>,
        errors: ErrorSink,
        metrics: &Metrics,
    ) -> Self {
        Self {
            reconciler,
            settings,
            errors,
            upserts: metrics.upserts.clone(),
            admission: metrics.admission.clone(),
        }
    }
}

// === impl Handler ===

impl Handler {
    /// Records creates and updates of `K`.
    pub fn workload<K: Workload>() -> Self {
        Self {
            resource_type: K::DESCRIPTOR.resource_type,
            is_kind: is_kind::<K>,
            create: Some(admit_workload::<K>),
            update: Some(admit_workload::<K>),
            delete: None,
            connect: None,
        }
    }

    pub async fn execute(&self, ctx: Arc<Context>, req: AdmissionRequest) -> Outcome {
        let admit = match req.operation {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            Operation::Connect => self.connect,
        };
        match admit {
            Some(admit) => admit(ctx, req).await,
            None => Outcome::Skipped(SkipReason::NotRegistered(req.operation)),
        }
    }
}

fn admit_workload<K: Workload>(
    ctx: Arc<Context>,
    req: AdmissionRequest,
) -> future::BoxFuture<'static, Outcome> {
    Box::pin(record::<K>(ctx, req))
}

async fn record<K: Workload>(ctx: Arc<Context>, req: AdmissionRequest) -> Outcome {
    let kind = K::DESCRIPTOR.resource_type;
    if !ctx.settings.collects(kind) {
        return Outcome::Skipped(SkipReason::Disabled(kind));
    }

    let mut obj = match parse_object::<K>(req.object) {
        Ok(obj) => obj,
        Err(error) => return Outcome::Skipped(SkipReason::Parse(error.to_string())),
    };

    // Objects created with `generateName`, or submitted without a namespace,
    // carry these only on the request.
    let meta = obj.meta_mut();
    if meta.name.as_deref().unwrap_or_default().is_empty() && !req.name.is_empty() {
        meta.name = Some(req.name);
    }
    if K::DESCRIPTOR.namespaced && meta.namespace.is_none() {
        meta.namespace = req.namespace;
    }
    if meta.name.as_deref().unwrap_or_default().is_empty() {
        return Outcome::Skipped(SkipReason::MissingName);
    }

    let res = ctx.reconciler.upsert(normalize(&obj, &ctx.settings)).await;
    ctx.upserts.observe(kind, &res);
    match res {
        Ok(written) => Outcome::Recorded(written),
        Err(error) => {
            let error = Arc::new(error);
            ctx.errors.report(error.clone());
            Outcome::Failed(error)
        }
    }
}

fn parse_object<T: DeserializeOwned>(obj: Option<DynamicObject>) -> Result<T> {
    let obj = obj.ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded(_) => "recorded",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

// === impl SkipReason ===

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled(kind) => write!(f, "tag collection is disabled for {kind}s"),
            Self::Parse(error) => write!(f, "failed to parse object: {error}"),
            Self::MissingName => write!(f, "object has no name"),
            Self::NotRegistered(op) => write!(f, "no handler registered for {op:?} operations"),
            Self::Unhandled(kind) => write!(f, "unsupported resource type: {kind}"),
        }
    }
}

// === impl ErrorSink ===

impl ErrorSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<UpsertError>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self(tx), rx)
    }

    fn report(&self, error: Arc<UpsertError>) {
        if let Err(error) = self.0.try_send(error) {
            debug!(%error, "Dropped upsert error");
        }
    }
}

/// Logs errors from an [`ErrorSink`] until every sender is dropped.
pub async fn log_errors(mut rx: mpsc::Receiver<Arc<UpsertError>>) {
    while let Some(error) = rx.recv().await {
        warn!(%error, "Admitted an object whose tags were not recorded");
    }
}
