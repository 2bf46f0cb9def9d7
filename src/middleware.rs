//! Admission middleware.
//!
//! [`AdmissionLayer`] wraps a tower service over `http` request/response
//! types. Per request it matches the path against its route bindings,
//! resolves the bound policy, derives the caller's partition key, and asks
//! the limiter for one token. A denial short-circuits with a 429; an allowed
//! request reaches the inner service unchanged apart from the body wrapper.
//!
//! Credential sniffing needs the payload before the downstream handler runs,
//! so the middleware buffers the body into [`AdmissionBody::Buffered`] —
//! the handler then reads the identical bytes from the buffer. Requests that
//! are not sniffed keep their original stream untouched.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::{BodyExt, Full};
use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{error, warn};

use crate::identity::{PeerAddr, Principal};
use crate::limiter::{Decision, PartitionedLimiter};
use crate::policy::PolicyKind;
use crate::registry::RegistryError;
use crate::rejection;
use crate::resolver::{is_body_bearing, KeyResolver, RequestFacts};
use crate::store::{BucketStore, InMemoryBucketStore};

/// Ordered path-prefix → policy-name bindings. First match wins, so list
/// more specific prefixes first. Paths with no binding are not rate limited.
#[derive(Debug, Clone, Default)]
pub struct RouteBindings {
    bindings: Vec<(String, String)>,
}

impl RouteBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every path starting with `prefix` to the named policy.
    #[must_use]
    pub fn bind(mut self, prefix: impl Into<String>, policy: impl Into<String>) -> Self {
        self.bindings.push((prefix.into(), policy.into()));
        self
    }

    /// Policy name governing `path`, if any.
    pub fn policy_for(&self, path: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, policy)| policy.as_str())
    }

    fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(_, policy)| policy.as_str())
    }
}

/// Request body as seen by the service downstream of the admission layer:
/// either the untouched original stream, or the replayable buffered copy
/// made for credential sniffing.
#[pin_project(project = AdmissionBodyProj)]
#[derive(Debug)]
pub enum AdmissionBody<B> {
    Passthrough(#[pin] B),
    Buffered(#[pin] Full<Bytes>),
}

impl<B> AdmissionBody<B> {
    fn buffered(bytes: Bytes) -> Self {
        Self::Buffered(Full::new(bytes))
    }
}

impl<B> HttpBody for AdmissionBody<B>
where
    B: HttpBody<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            AdmissionBodyProj::Passthrough(body) => body.poll_frame(cx),
            AdmissionBodyProj::Buffered(body) => body
                .poll_frame(cx)
                .map(|frame| frame.map(|result| result.map_err(|never| match never {}))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Passthrough(body) => body.is_end_stream(),
            Self::Buffered(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Passthrough(body) => body.size_hint(),
            Self::Buffered(body) => body.size_hint(),
        }
    }
}

/// A layer that enforces per-identity admission using a
/// [`PartitionedLimiter`].
#[derive(Debug)]
pub struct AdmissionLayer<St = InMemoryBucketStore> {
    limiter: Arc<PartitionedLimiter<St>>,
    resolver: Arc<KeyResolver>,
    routes: Arc<RouteBindings>,
}

impl<St> Clone for AdmissionLayer<St> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<St> AdmissionLayer<St>
where
    St: BucketStore,
{
    /// Create an admission layer, validating every bound policy name against
    /// the limiter's registry so configuration mistakes surface at startup
    /// rather than on the request path.
    pub fn new(
        limiter: PartitionedLimiter<St>,
        routes: RouteBindings,
    ) -> Result<Self, RegistryError> {
        for name in routes.policy_names() {
            limiter.registry().resolve(name)?;
        }
        Ok(Self {
            limiter: Arc::new(limiter),
            resolver: Arc::new(KeyResolver::new()),
            routes: Arc::new(routes),
        })
    }

    /// Shared limiter handle, e.g. for scheduling idle-bucket eviction.
    pub fn limiter(&self) -> &Arc<PartitionedLimiter<St>> {
        &self.limiter
    }
}

impl<S, St> Layer<S> for AdmissionLayer<St> {
    type Service = AdmissionService<S, St>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            routes: self.routes.clone(),
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Debug)]
pub struct AdmissionService<S, St = InMemoryBucketStore> {
    inner: S,
    limiter: Arc<PartitionedLimiter<St>>,
    resolver: Arc<KeyResolver>,
    routes: Arc<RouteBindings>,
}

impl<S: Clone, St> Clone for AdmissionService<S, St> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<S, St, B, RB> Service<Request<B>> for AdmissionService<S, St>
where
    S: Service<Request<AdmissionBody<B>>, Response = Response<RB>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    St: BucketStore + 'static,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: std::fmt::Display,
    RB: From<Bytes> + Send + 'static,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = self.limiter.clone();
        let resolver = self.resolver.clone();
        let routes = self.routes.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();

            let Some(policy_name) = routes.policy_for(&path) else {
                return inner.call(req.map(AdmissionBody::Passthrough)).await;
            };
            let policy = match limiter.registry().resolve(policy_name) {
                Ok(policy) => policy,
                Err(err) => {
                    // Bindings are validated at construction, so this is a
                    // defensive path; an internal failure must not take the
                    // request down with it.
                    error!(
                        target: "turnstile::middleware",
                        %err,
                        path = %path,
                        "policy unresolvable at request time, failing open"
                    );
                    return inner.call(req.map(AdmissionBody::Passthrough)).await;
                }
            };

            let principal = req.extensions().get::<Principal>().cloned();
            let peer = req.extensions().get::<PeerAddr>().copied();
            let needs_sniff = principal.is_none()
                && policy.kind() == PolicyKind::Credential
                && is_body_bearing(req.method());

            let (req, sniffed) = if needs_sniff {
                let (parts, body) = req.into_parts();
                match body.collect().await {
                    Ok(collected) => {
                        let bytes = collected.to_bytes();
                        let replay = Request::from_parts(parts, AdmissionBody::buffered(bytes.clone()));
                        (replay, Some(bytes))
                    }
                    Err(err) => {
                        warn!(
                            target: "turnstile::middleware",
                            error = %err,
                            path = %path,
                            "body read failed during credential sniffing"
                        );
                        (Request::from_parts(parts, AdmissionBody::buffered(Bytes::new())), None)
                    }
                }
            } else {
                (req.map(AdmissionBody::Passthrough), None)
            };

            let key = {
                let facts = RequestFacts {
                    principal: principal.as_ref(),
                    policy_kind: policy.kind(),
                    method: req.method(),
                    path: &path,
                    headers: req.headers(),
                    peer,
                    body: sniffed.as_deref(),
                };
                resolver.resolve(&facts)
            };

            match limiter.check_policy(&policy, &key).await {
                Ok(Decision::Allowed { .. }) => inner.call(req).await,
                Ok(Decision::Denied { retry_after }) => {
                    warn!(
                        target: "turnstile::middleware",
                        partition = %key,
                        policy = policy.name(),
                        path = %path,
                        method = %req.method(),
                        "rate limit exceeded"
                    );
                    Ok(rejection::too_many_requests(&policy, &key, &path, retry_after))
                }
                Err(err) => {
                    error!(
                        target: "turnstile::middleware",
                        %err,
                        path = %path,
                        "admission check failed, failing open"
                    );
                    inner.call(req).await
                }
            }
        })
    }
}
