use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::{CacheBackend, CacheEntry};
use crate::fingerprint::{self, Fingerprint};
use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};
use crate::network::{self, Fetched};
use crate::policy::{RequestClass, RoutePolicy};
use crate::request_id::RequestId;
use crate::revalidate::{RevalidateFuture, Revalidator};
use crate::store::Store;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Body of every response the layer returns.
pub type OfflineBody = UnsyncBoxBody<Bytes, BoxError>;

/// Request-interception layer for an outbound HTTP client service.
///
/// Each request is classified by the [`RoutePolicy`] and answered with the
/// matching strategy:
/// - bypass: forwarded to the inner service, store untouched;
/// - media: cache-first, with a background refresh for hero images;
/// - external / default: stale-while-revalidate.
///
/// A layer is obtained from [`OfflineCache::activate`](crate::OfflineCache::activate),
/// which removes superseded store generations first. Cloning is cheap and
/// shares the store and the revalidation pool.
pub struct OfflineLayer<B> {
    dispatcher: Arc<Dispatcher<B>>,
}

impl<B> Clone for OfflineLayer<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

struct Dispatcher<B> {
    store: Store<B>,
    policy: RoutePolicy,
    origin: Option<Uri>,
    revalidator: Revalidator,
    network_timeout: Option<Duration>,
    events: LoggingConfig,
}

impl<B> OfflineLayer<B>
where
    B: CacheBackend,
{
    pub(crate) fn new(
        store: Store<B>,
        policy: RoutePolicy,
        origin: Option<Uri>,
        revalidator: Revalidator,
        network_timeout: Option<Duration>,
        events: LoggingConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                store,
                policy,
                origin,
                revalidator,
                network_timeout,
                events,
            }),
        }
    }

    /// The current store generation.
    pub fn store(&self) -> &Store<B> {
        &self.dispatcher.store
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.dispatcher.policy
    }

    /// Pool running background revalidations.
    pub fn revalidator(&self) -> &Revalidator {
        &self.dispatcher.revalidator
    }
}

impl<S, B> Layer<S> for OfflineLayer<B> {
    type Service = OfflineService<S, B>;

    fn layer(&self, inner: S) -> Self::Service {
        OfflineService {
            inner,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Service produced by [`OfflineLayer`].
pub struct OfflineService<S, B> {
    inner: S,
    dispatcher: Arc<Dispatcher<B>>,
}

impl<S: Clone, B> Clone for OfflineService<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S, B, ReqBody, ResBody> Service<Request<ReqBody>> for OfflineService<S, B>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    B: CacheBackend,
{
    type Response = Response<OfflineBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let inner = self.inner.clone();
        Box::pin(async move { dispatcher.dispatch(inner, req).await })
    }
}

/// Per-request context for structured events.
struct Trace {
    request_id: Option<RequestId>,
    class: RequestClass,
    method: Method,
}

impl<B> Dispatcher<B>
where
    B: CacheBackend,
{
    async fn dispatch<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
    ) -> Result<Response<OfflineBody>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError> + Send,
        ReqBody: Send + 'static,
        ResBody: Body<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError> + Send,
    {
        // Without an absolute target there is nothing to key or classify on.
        let Some(target) = fingerprint::resolve(req.uri(), self.origin.as_ref()) else {
            return passthrough(inner, req).await;
        };
        let class = self.policy.classify(&target);

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %req.method(), uri = %target, class = %class, "offline_call");

        let trace = Trace {
            request_id: self.events.enabled.then(|| RequestId::from_request(&req)),
            class,
            method: req.method().clone(),
        };

        let fingerprint = match class {
            RequestClass::Bypass => None,
            _ => Fingerprint::for_request(req.method(), &target),
        };
        let Some(fingerprint) = fingerprint else {
            #[cfg(feature = "metrics")]
            counter!("tower_offline_cache.bypass").increment(1);
            self.emit(&trace, CacheEventType::Bypass, &target, None);
            return passthrough(inner, req).await;
        };

        match class {
            RequestClass::Media => {
                self.cache_first(inner, req, &target, fingerprint, &trace)
                    .await
            }
            _ => {
                self.stale_while_revalidate(inner, req, fingerprint, &trace)
                    .await
            }
        }
    }

    /// Stored entry if present; otherwise fetch, store, return. Hero-image
    /// hits also start a background refresh.
    async fn cache_first<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        target: &Uri,
        fingerprint: Fingerprint,
        trace: &Trace,
    ) -> Result<Response<OfflineBody>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError> + Send,
        ReqBody: Send + 'static,
        ResBody: Body<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError> + Send,
    {
        if let Some(entry) = self.lookup(&fingerprint).await {
            self.record_hit(&fingerprint, &entry, trace);
            if self.policy.is_hero(target) {
                let task = self.refresh(inner, req, fingerprint.clone());
                self.revalidator.spawn(&fingerprint, task);
            }
            return Ok(cached_response(entry));
        }

        self.fetch_and_store(inner, req, &fingerprint, trace).await
    }

    /// Stored entry if present, refreshing it in the background; otherwise
    /// wait for the network.
    async fn stale_while_revalidate<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        fingerprint: Fingerprint,
        trace: &Trace,
    ) -> Result<Response<OfflineBody>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError> + Send,
        ReqBody: Send + 'static,
        ResBody: Body<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError> + Send,
    {
        match self.lookup(&fingerprint).await {
            Some(entry) => {
                self.record_hit(&fingerprint, &entry, trace);
                let task = self.refresh(inner, req, fingerprint.clone());
                self.revalidator.spawn(&fingerprint, task);
                Ok(cached_response(entry))
            }
            None => self.fetch_and_store(inner, req, &fingerprint, trace).await,
        }
    }

    async fn fetch_and_store<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        fingerprint: &Fingerprint,
        trace: &Trace,
    ) -> Result<Response<OfflineBody>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
    {
        #[cfg(feature = "metrics")]
        counter!("tower_offline_cache.miss").increment(1);
        self.emit(trace, CacheEventType::Miss, fingerprint, None);

        // No cached value exists to stand in for a network failure.
        let fetched = network::fetch(inner, req, self.network_timeout).await?;
        self.store_fetched(fingerprint, &fetched, trace).await;
        Ok(fresh_response(fetched))
    }

    /// Background refresh of one entry, handed to the [`Revalidator`].
    fn refresh<S, ReqBody, ResBody>(
        &self,
        inner: S,
        req: Request<ReqBody>,
        fingerprint: Fingerprint,
    ) -> RevalidateFuture
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError> + Send,
        ReqBody: Send + 'static,
        ResBody: Body<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError> + Send,
    {
        let store = self.store.clone();
        let timeout = self.network_timeout;

        Box::pin(async move {
            let fetched = network::fetch(inner, req, timeout).await?;
            if fetched.status() != StatusCode::OK {
                return Err(format!("refresh answered {}", fetched.status()).into());
            }
            store.put(&fingerprint, fetched.to_entry()).await?;
            Ok(())
        })
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.store.get(fingerprint).await {
            Ok(entry) => entry,
            Err(_err) => {
                #[cfg(feature = "metrics")]
                counter!("tower_offline_cache.lookup_error").increment(1);

                #[cfg(feature = "tracing")]
                tracing::warn!(key = %fingerprint, error = %_err, "store lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store_fetched(&self, fingerprint: &Fingerprint, fetched: &Fetched, trace: &Trace) {
        if fetched.status() != StatusCode::OK {
            self.emit(
                trace,
                CacheEventType::StoreSkipped,
                fingerprint,
                Some(fetched.status()),
            );
            return;
        }

        match self.store.put(fingerprint, fetched.to_entry()).await {
            Ok(_) => self.emit(
                trace,
                CacheEventType::Store,
                fingerprint,
                Some(fetched.status()),
            ),
            Err(_err) => {
                #[cfg(feature = "metrics")]
                counter!("tower_offline_cache.store_error").increment(1);

                #[cfg(feature = "tracing")]
                tracing::warn!(key = %fingerprint, error = %_err, "failed to store response");
            }
        }
    }

    fn record_hit(&self, fingerprint: &Fingerprint, entry: &CacheEntry, trace: &Trace) {
        #[cfg(feature = "metrics")]
        counter!("tower_offline_cache.hit").increment(1);
        self.emit(
            trace,
            CacheEventType::Hit,
            fingerprint,
            Some(entry.status),
        );
    }

    fn emit(
        &self,
        trace: &Trace,
        event_type: CacheEventType,
        key: impl fmt::Display,
        status: Option<StatusCode>,
    ) {
        let Some(request_id) = &trace.request_id else {
            return;
        };
        let mut event = CacheEvent::new(event_type, key.to_string())
            .with_request_id(request_id.clone())
            .with_class(trace.class)
            .with_method(trace.method.clone());
        if let Some(status) = status {
            event = event.with_status(status);
        }
        event.log(&self.events);
    }
}

async fn passthrough<S, ReqBody, ResBody>(
    inner: S,
    req: Request<ReqBody>,
) -> Result<Response<OfflineBody>, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    let response = inner
        .oneshot(req)
        .await
        .map_err(|err| -> BoxError { err.into() })?;
    Ok(response.map(|body| {
        body.map_err(|err| -> BoxError { err.into() })
            .boxed_unsync()
    }))
}

fn full_body(body: Full<Bytes>) -> OfflineBody {
    body.map_err(|never| match never {}).boxed_unsync()
}

fn cached_response(entry: CacheEntry) -> Response<OfflineBody> {
    entry.into_response().map(full_body)
}

fn fresh_response(fetched: Fetched) -> Response<OfflineBody> {
    fetched.into_response().map(full_body)
}
