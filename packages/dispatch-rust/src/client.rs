//! The client surface: path-addressed Send and key-addressed Publish.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::{Service, ServiceExt};
use waypost_core::{
    translate, Mediator, Next, Payload, PublishContext, RequestContext, Resolve, RouteError,
    ScopeFactory, TypeHandle,
};

use crate::config::RouterConfig;
use crate::mediator::MediatorFactory;
use crate::middleware::{build_send_pipeline, SendPipeline};
use crate::publish::{FanOut, PublishHandle, PublishOptions};
use crate::registry::{ListenerRegistry, ServiceRegistry};
use crate::tracker::PublishTracker;

// ---------------------------------------------------------------------------
// SendCall
// ---------------------------------------------------------------------------

/// One Send call as it travels through the tower pipeline.
#[derive(Debug)]
pub struct SendCall {
    pub path: String,
    pub request: Option<Payload>,
    /// Type the caller wants the result translated into.
    pub result_type: Option<TypeHandle>,
}

impl SendCall {
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        request: Option<Payload>,
        result_type: Option<TypeHandle>,
    ) -> Self {
        Self {
            path: path.into(),
            request,
            result_type,
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchService
// ---------------------------------------------------------------------------

/// Innermost Send service: route lookup, translation, filter chain, mediator.
#[derive(Clone)]
pub struct DispatchService {
    services: Arc<ServiceRegistry>,
    provider: Arc<dyn Resolve>,
    mediator: Arc<dyn Mediator>,
}

impl DispatchService {
    #[must_use]
    pub fn new(
        services: Arc<ServiceRegistry>,
        provider: Arc<dyn Resolve>,
        mediator: Arc<dyn Mediator>,
    ) -> Self {
        Self {
            services,
            provider,
            mediator,
        }
    }

    async fn dispatch(self, call: SendCall) -> Result<Option<Payload>, RouteError> {
        let SendCall {
            path,
            request,
            result_type,
        } = call;

        let request = request.ok_or(RouteError::ArgumentNull { name: "request" })?;
        let descriptor = self
            .services
            .get(&path)
            .ok_or_else(|| RouteError::ReceiverNotFound { path: path.clone() })?;

        let parameter_type = *descriptor.parameter_type();
        let parameter = translate(Some(&request), &parameter_type)?
            .ok_or(RouteError::ArgumentNull { name: "request" })?;

        let ctx = RequestContext::new(
            path,
            parameter_type,
            Arc::clone(&self.provider),
            result_type,
        )?;
        let response = Next::new(descriptor.filters(), &ctx, self.mediator.as_ref())
            .run(parameter)
            .await?;

        match ctx.result_type() {
            Some(target) => translate(Some(&response), target),
            None if response.is_unit() => Ok(None),
            None => Ok(Some(response)),
        }
    }
}

impl Service<SendCall> for DispatchService {
    type Response = Option<Payload>;
    type Error = RouteError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, RouteError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: SendCall) -> Self::Future {
        Box::pin(self.clone().dispatch(call))
    }
}

// ---------------------------------------------------------------------------
// MediatorClient
// ---------------------------------------------------------------------------

struct ClientInner {
    services: Arc<ServiceRegistry>,
    listeners: Arc<ListenerRegistry>,
    scopes: Arc<dyn ScopeFactory>,
    mediator_factory: MediatorFactory,
    pipeline: Mutex<SendPipeline>,
    tracker: PublishTracker,
    config: RouterConfig,
}

/// Routes requests by path and events by key. Cheap to clone.
///
/// Send runs on the caller's task and surfaces every failure. Publish
/// schedules a background fan-out and returns once it is scheduled; listener
/// failures only reach the options' hooks and the log.
#[derive(Clone)]
pub struct MediatorClient {
    inner: Arc<ClientInner>,
}

impl MediatorClient {
    /// Creates a client over populated registries.
    ///
    /// `provider` backs Send calls and is handed to filters through the
    /// request context. `scopes` creates one isolated scope per listener.
    #[must_use]
    pub fn new(
        services: Arc<ServiceRegistry>,
        listeners: Arc<ListenerRegistry>,
        provider: Arc<dyn Resolve>,
        scopes: Arc<dyn ScopeFactory>,
        mediator_factory: MediatorFactory,
        config: RouterConfig,
    ) -> Self {
        let mediator = mediator_factory(Arc::clone(&provider));
        let dispatch = DispatchService::new(Arc::clone(&services), provider, mediator);
        Self {
            inner: Arc::new(ClientInner {
                services,
                listeners,
                scopes,
                mediator_factory,
                pipeline: Mutex::new(build_send_pipeline(dispatch)),
                tracker: PublishTracker::new(),
                config,
            }),
        }
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    // -- Send ---------------------------------------------------------------

    /// Sends `request` to `path` and translates the result into `R`.
    ///
    /// Returns `Ok(None)` when the handler produced no value.
    ///
    /// # Errors
    ///
    /// - `RouteError::ReceiverNotFound` if nothing is registered at `path`
    /// - `RouteError::TypeTranslation` if the request or result cannot be reshaped
    /// - any error raised by a filter or the handler
    pub async fn send<R>(
        &self,
        path: &str,
        request: impl Serialize + Send + Sync + 'static,
    ) -> Result<Option<R>, RouteError>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let target = TypeHandle::of::<R>();
        let response = self
            .send_payload(path, Some(Payload::new(request)), Some(target))
            .await?;
        response
            .map(|payload| {
                payload.downcast::<R>().map_err(|other| RouteError::TypeTranslation {
                    from: other.type_name(),
                    to: target.name(),
                    source: serde::de::Error::custom("translated payload holds a different type"),
                })
            })
            .transpose()
    }

    /// Sends `request` to `path` and discards the result.
    ///
    /// # Errors
    ///
    /// See [`MediatorClient::send`].
    pub async fn send_void(
        &self,
        path: &str,
        request: impl Serialize + Send + Sync + 'static,
    ) -> Result<(), RouteError> {
        self.send_payload(path, Some(Payload::new(request)), None)
            .await
            .map(drop)
    }

    /// Type-erased Send.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::ArgumentNull` for an absent request, otherwise see
    /// [`MediatorClient::send`].
    pub async fn send_payload(
        &self,
        path: &str,
        request: Option<Payload>,
        result_type: Option<TypeHandle>,
    ) -> Result<Option<Payload>, RouteError> {
        let pipeline = self.inner.pipeline.lock().clone();
        pipeline
            .oneshot(SendCall::new(path, request, result_type))
            .await
    }

    // -- Publish ------------------------------------------------------------

    /// Publishes `data` to every listener of `key` with default options.
    ///
    /// # Errors
    ///
    /// See [`MediatorClient::publish_payload`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn publish(
        &self,
        key: &str,
        data: impl Serialize + Send + Sync + 'static,
    ) -> Result<PublishHandle, RouteError> {
        self.publish_payload(key, Some(Payload::new(data)), PublishOptions::default())
    }

    /// Publishes `data` to every listener of `key`.
    ///
    /// # Errors
    ///
    /// See [`MediatorClient::publish_payload`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn publish_with(
        &self,
        key: &str,
        data: impl Serialize + Send + Sync + 'static,
        options: PublishOptions,
    ) -> Result<PublishHandle, RouteError> {
        self.publish_payload(key, Some(Payload::new(data)), options)
    }

    /// Type-erased Publish. Returns once the fan-out is scheduled.
    ///
    /// An unknown key schedules nothing and still succeeds.
    ///
    /// # Errors
    ///
    /// - `RouteError::ArgumentNull` if `data` is absent
    /// - `RouteError::InvalidArgument` if `key` is blank
    /// - `RouteError::ShuttingDown` once [`MediatorClient::shutdown`] has started
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn publish_payload(
        &self,
        key: &str,
        data: Option<Payload>,
        options: PublishOptions,
    ) -> Result<PublishHandle, RouteError> {
        let data = data.ok_or(RouteError::ArgumentNull { name: "data" })?;
        let context = PublishContext::new(key, options.headers.clone())?;

        let guard = self.inner.tracker.begin().ok_or(RouteError::ShuttingDown)?;

        let listeners = self.inner.listeners.listeners(key);
        if listeners.is_empty() {
            tracing::trace!(key, "no listeners; nothing scheduled");
            return Ok(PublishHandle::empty());
        }

        tracing::trace!(
            key,
            publish_id = context.id(),
            listeners = listeners.len(),
            "scheduling fan-out"
        );

        let fan_out = FanOut {
            data: Arc::new(data),
            context: Arc::new(context),
            listeners,
            options,
            scopes: Arc::clone(&self.inner.scopes),
            mediator_factory: Arc::clone(&self.inner.mediator_factory),
            guard,
        };
        Ok(fan_out.spawn())
    }

    /// Number of fan-outs scheduled but not yet finished.
    #[must_use]
    pub fn in_flight_publishes(&self) -> u64 {
        self.inner.tracker.in_flight()
    }

    /// Stops accepting publishes and waits up to `drain_timeout` for scheduled
    /// fan-outs. Returns `true` if everything drained in time.
    pub async fn shutdown(&self) -> bool {
        self.inner.tracker.start_draining();
        let drained = self
            .inner
            .tracker
            .wait_for_drain(self.inner.config.drain_timeout)
            .await;
        if drained {
            tracing::info!("publish fan-outs drained");
        } else {
            tracing::warn!(
                in_flight = self.inner.tracker.in_flight(),
                "drain timeout expired with fan-outs still running"
            );
        }
        drained
    }
}

impl std::fmt::Debug for MediatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediatorClient")
            .field("paths", &self.inner.services.paths())
            .field("keys", &self.inner.listeners.keys())
            .field("in_flight", &self.inner.tracker.in_flight())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
