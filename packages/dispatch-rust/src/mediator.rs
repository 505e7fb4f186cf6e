//! Default mediator: resolves handlers for a message's runtime type from one
//! resolver (the root container or an isolated scope) and invokes them.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use waypost_core::{
    Capability, Mediator, Notification, NotificationHandler, Payload, Request, RequestHandler,
    Resolve, RouteError,
};

// ---------------------------------------------------------------------------
// Type-erased handlers
// ---------------------------------------------------------------------------

#[async_trait]
pub(crate) trait ErasedRequestHandler: Send + Sync {
    async fn handle(&self, request: Payload) -> Result<Payload, RouteError>;
}

#[async_trait]
pub(crate) trait ErasedNotificationHandler: Send + Sync {
    async fn handle(&self, notification: &Payload) -> Result<(), RouteError>;
}

/// Resolved instance type for request handler registrations.
pub(crate) struct RequestHandlerSlot(pub(crate) Arc<dyn ErasedRequestHandler>);

/// Resolved instance type for notification handler registrations.
pub(crate) struct NotificationHandlerSlot(pub(crate) Arc<dyn ErasedNotificationHandler>);

pub(crate) struct TypedRequestHandler<R, H> {
    handler: H,
    _request: PhantomData<fn(R)>,
}

impl<R, H> TypedRequestHandler<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> ErasedRequestHandler for TypedRequestHandler<R, H>
where
    R: Request,
    H: RequestHandler<R> + 'static,
{
    async fn handle(&self, request: Payload) -> Result<Payload, RouteError> {
        let request = request
            .downcast::<R>()
            .map_err(|other| RouteError::HandlerNotFound {
                message_type: other.type_name(),
            })?;
        let response = self.handler.handle(request).await?;
        Ok(Payload::new(response))
    }
}

pub(crate) struct TypedNotificationHandler<N, H> {
    handler: H,
    _notification: PhantomData<fn(N)>,
}

impl<N, H> TypedNotificationHandler<N, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _notification: PhantomData,
        }
    }
}

#[async_trait]
impl<N, H> ErasedNotificationHandler for TypedNotificationHandler<N, H>
where
    N: Notification,
    H: NotificationHandler<N> + 'static,
{
    async fn handle(&self, notification: &Payload) -> Result<(), RouteError> {
        let Some(notification) = notification.downcast_ref::<N>() else {
            return Err(RouteError::HandlerNotFound {
                message_type: notification.type_name(),
            });
        };
        self.handler.handle(notification).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScopedMediator
// ---------------------------------------------------------------------------

/// Mediator bound to one resolver.
///
/// `send` invokes the first request handler registered for the payload's
/// type. `broadcast` awaits every notification handler in registration order
/// and reports all failures together.
#[derive(Clone)]
pub struct ScopedMediator {
    resolver: Arc<dyn Resolve>,
}

impl ScopedMediator {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Mediator for ScopedMediator {
    async fn send(&self, request: Payload) -> Result<Payload, RouteError> {
        let handler = self
            .resolver
            .resolve_all(Capability::RequestHandler(request.type_id()))
            .into_iter()
            .find_map(|instance| instance.downcast::<RequestHandlerSlot>().ok())
            .ok_or(RouteError::HandlerNotFound {
                message_type: request.type_name(),
            })?;
        handler.0.handle(request).await
    }

    async fn broadcast(&self, notification: Payload) -> Result<(), RouteError> {
        let handlers: Vec<Arc<NotificationHandlerSlot>> = self
            .resolver
            .resolve_all(Capability::NotificationHandler(notification.type_id()))
            .into_iter()
            .filter_map(|instance| instance.downcast::<NotificationHandlerSlot>().ok())
            .collect();

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(e) = handler.0.handle(&notification).await {
                failures.push(e);
            }
        }
        match RouteError::collect(failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Builds the mediator used inside one listener scope.
pub type MediatorFactory = Arc<dyn Fn(Arc<dyn Resolve>) -> Arc<dyn Mediator> + Send + Sync>;

/// The default factory, producing a [`ScopedMediator`].
#[must_use]
pub fn scoped_mediator_factory() -> MediatorFactory {
    Arc::new(|resolver| Arc::new(ScopedMediator::new(resolver)) as Arc<dyn Mediator>)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::container::ServiceCollection;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        value: String,
    }

    impl Request for Ping {
        type Response = String;
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pang {
        value: u32,
    }

    impl Notification for Pang {}

    struct PingHandler;

    #[async_trait]
    impl RequestHandler<Ping> for PingHandler {
        async fn handle(&self, request: Ping) -> anyhow::Result<String> {
            Ok(format!("{} Pong", request.value))
        }
    }

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationHandler<Pang> for Recorder {
        async fn handle(&self, notification: &Pang) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:{}", self.tag, notification.value));
            if self.fail {
                anyhow::bail!("{} failed", self.tag);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_invokes_registered_handler() {
        let mut services = ServiceCollection::new();
        services.add_request_handler::<Ping, _, _>(|_| PingHandler);
        let mediator = ScopedMediator::new(Arc::new(services.build()));

        let response = mediator
            .send(Payload::new(Ping {
                value: "Ping".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(response.downcast::<String>().unwrap(), "Ping Pong");
    }

    #[tokio::test]
    async fn send_without_handler_fails() {
        let mediator = ScopedMediator::new(Arc::new(ServiceCollection::new().build()));
        let err = mediator
            .send(Payload::new(Ping {
                value: "Ping".to_string(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::HandlerNotFound { .. }));
    }

    #[tokio::test]
    async fn broadcast_runs_every_handler_and_collects_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut services = ServiceCollection::new();
        for (tag, fail) in [("a", true), ("b", false), ("c", true)] {
            let log = log.clone();
            services.add_notification_handler::<Pang, _, _>(move |_| Recorder {
                tag,
                log: log.clone(),
                fail,
            });
        }
        let mediator = ScopedMediator::new(Arc::new(services.build()));

        let err = mediator.broadcast(Payload::new(Pang { value: 7 })).await.unwrap_err();
        assert_eq!(*log.lock(), vec!["a:7", "b:7", "c:7"]);
        assert!(matches!(err, RouteError::Aggregate(ref list) if list.len() == 2));
    }

    #[tokio::test]
    async fn broadcast_without_handlers_succeeds() {
        let mediator = ScopedMediator::new(Arc::new(ServiceCollection::new().build()));
        assert!(mediator.broadcast(Payload::new(Pang { value: 1 })).await.is_ok());
    }
}
