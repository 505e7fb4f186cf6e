//! Event fan-out.
//!
//! A publish call validates its input, then hands a [`FanOut`] to a background
//! task and returns. The task gives every listener its own scope, invokes the
//! listeners concurrently, and reports failures through the caller's hooks and
//! the log. Publish failures never reach the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use waypost_core::{
    translate, ListenerDescriptor, MediateKind, Payload, PublishContext, PublishContextAccessor,
    ResolveExt, RouteError, Scope, ScopeFactory,
};

use crate::mediator::MediatorFactory;
use crate::tracker::InFlightGuard;

/// Hook receiving the published data and the publish context.
pub type PublishHook = Arc<
    dyn Fn(Arc<Payload>, Arc<PublishContext>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Hook receiving the fan-out failure, the published data, and the context.
pub type ErrorHook = Arc<
    dyn Fn(RouteError, Arc<Payload>, Arc<PublishContext>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// PublishOptions
// ---------------------------------------------------------------------------

/// Per-call publish options.
#[derive(Clone, Default)]
pub struct PublishOptions {
    pub(crate) headers: HashMap<String, Value>,
    pub(crate) before_publish: Option<PublishHook>,
    pub(crate) complete: Option<PublishHook>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HashMap<String, Value>) -> Self {
        self.headers = headers;
        self
    }

    /// Runs before any listener is scheduled. A failure aborts the fan-out.
    #[must_use]
    pub fn before_publish<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Payload>, Arc<PublishContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: PublishHook =
            Arc::new(move |data: Arc<Payload>, ctx: Arc<PublishContext>| hook(data, ctx).boxed());
        self.before_publish = Some(hook);
        self
    }

    /// Runs once every listener has been scheduled, not necessarily finished.
    #[must_use]
    pub fn on_complete<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Payload>, Arc<PublishContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: PublishHook =
            Arc::new(move |data: Arc<Payload>, ctx: Arc<PublishContext>| hook(data, ctx).boxed());
        self.complete = Some(hook);
        self
    }

    /// Receives at most one error per publish, after every listener settled.
    #[must_use]
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RouteError, Arc<Payload>, Arc<PublishContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: ErrorHook = Arc::new(
            move |error: RouteError, data: Arc<Payload>, ctx: Arc<PublishContext>| {
                hook(error, data, ctx).boxed()
            },
        );
        self.on_error = Some(hook);
        self
    }
}

impl std::fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOptions")
            .field("headers", &self.headers)
            .field("before_publish", &self.before_publish.is_some())
            .field("complete", &self.complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PublishHandle
// ---------------------------------------------------------------------------

/// Acknowledges that a fan-out was scheduled.
///
/// Dropping the handle does not cancel anything.
#[derive(Debug)]
pub struct PublishHandle {
    task: Option<JoinHandle<()>>,
}

impl PublishHandle {
    pub(crate) fn scheduled(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle for a publish that had no listeners.
    pub(crate) fn empty() -> Self {
        Self { task: None }
    }

    /// Returns `true` if a background fan-out was started.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.task.is_some()
    }

    /// Waits for the background fan-out, including its hooks, to finish.
    pub async fn completed(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "fan-out task terminated abnormally");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FanOut
// ---------------------------------------------------------------------------

/// Everything one background fan-out needs.
pub(crate) struct FanOut {
    pub(crate) data: Arc<Payload>,
    pub(crate) context: Arc<PublishContext>,
    pub(crate) listeners: Vec<ListenerDescriptor>,
    pub(crate) options: PublishOptions,
    pub(crate) scopes: Arc<dyn ScopeFactory>,
    pub(crate) mediator_factory: MediatorFactory,
    pub(crate) guard: InFlightGuard,
}

type ListenerTask = (ListenerDescriptor, JoinHandle<Result<(), RouteError>>);

impl FanOut {
    /// Spawns the fan-out on the current Tokio runtime.
    pub(crate) fn spawn(self) -> PublishHandle {
        let span = info_span!(
            "publish",
            key = %self.context.key(),
            publish_id = %self.context.id(),
            listeners = self.listeners.len(),
        );
        PublishHandle::scheduled(tokio::spawn(self.run().instrument(span)))
    }

    async fn run(self) {
        tracing::trace!("fan-out started");

        if let Some(hook) = &self.options.before_publish {
            if let Err(source) = hook(Arc::clone(&self.data), Arc::clone(&self.context)).await {
                let error = RouteError::HookFailed {
                    hook: "before_publish",
                    source,
                };
                tracing::error!(error = %error, "before_publish failed; fan-out aborted");
                self.report(error).await;
                return;
            }
        }

        let mut scopes = ScopeSet::default();
        let tasks = self.schedule(&mut scopes);

        if let Some(hook) = &self.options.complete {
            if let Err(e) = hook(Arc::clone(&self.data), Arc::clone(&self.context)).await {
                tracing::error!(error = %e, "complete hook failed");
            }
        }

        let settled = join_all(
            tasks
                .into_iter()
                .map(|(listener, task)| async move { (listener, task.await) }),
        )
        .await;
        scopes.release_all();

        let mut failures = Vec::new();
        for (listener, outcome) in settled {
            let name = listener.listener_type().name();
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => RouteError::ListenerInvocation {
                    key: listener.key().to_string(),
                    listener: name,
                    source: Box::new(source),
                },
                Err(_) => RouteError::ListenerPanicked {
                    key: listener.key().to_string(),
                    listener: name,
                },
            };
            tracing::error!(listener = name, error = %failure, "listener failed");
            failures.push(failure);
        }

        if let Some(error) = RouteError::collect(failures) {
            tracing::warn!(failures = error.failure_count(), "fan-out finished with failures");
            self.report(error).await;
        }

        tracing::trace!("fan-out finished");
        drop(self.guard);
    }

    /// Starts one task per listener, in registry order. Listeners whose scope
    /// or payload cannot be prepared are logged and skipped.
    fn schedule(&self, scopes: &mut ScopeSet) -> Vec<ListenerTask> {
        let mut tasks = Vec::with_capacity(self.listeners.len());

        for listener in &self.listeners {
            let name = listener.listener_type().name();

            let scope = match self.scopes.create() {
                Ok(scope) => scope,
                Err(source) => {
                    let error = RouteError::ScopeAcquisition {
                        listener: name,
                        source,
                    };
                    tracing::error!(listener = name, error = %error, "listener skipped");
                    continue;
                }
            };
            scopes.push(Arc::clone(&scope));

            if let Some(accessor) = scope.resolve::<PublishContextAccessor>() {
                accessor.set(Arc::clone(&self.context));
            }

            let message = match translate(Some(&self.data), listener.listener_type()) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::error!(
                        listener = name,
                        "payload translated to no value; listener skipped"
                    );
                    continue;
                }
                Err(error) => {
                    tracing::error!(listener = name, error = %error, "listener skipped");
                    continue;
                }
            };

            let mediator = (self.mediator_factory)(scope.resolver());
            let kind = listener.mediate_kind();
            let span = info_span!(
                "listener",
                key = %listener.key(),
                listener = name,
                publish_id = %self.context.id(),
            );
            tracing::trace!(listener = name, kind = ?kind, "listener scheduled");

            let task = tokio::spawn(
                async move {
                    match kind {
                        MediateKind::Notification => mediator.broadcast(message).await,
                        MediateKind::Request => mediator.send(message).await.map(drop),
                    }
                }
                .instrument(span),
            );
            tasks.push((listener.clone(), task));
        }

        tasks
    }

    async fn report(&self, error: RouteError) {
        let Some(hook) = &self.options.on_error else {
            return;
        };
        if let Err(e) = hook(error, Arc::clone(&self.data), Arc::clone(&self.context)).await {
            tracing::error!(error = %e, "on_error hook failed");
        }
    }
}

/// Scopes owned by one fan-out. Released on drop as well, so an unwinding
/// fan-out task still releases everything it acquired.
#[derive(Default)]
struct ScopeSet(Vec<Arc<dyn Scope>>);

impl ScopeSet {
    fn push(&mut self, scope: Arc<dyn Scope>) {
        self.0.push(scope);
    }

    fn release_all(&mut self) {
        for scope in self.0.drain(..) {
            scope.release();
        }
    }
}

impl Drop for ScopeSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
