use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RouteError;
use crate::types::Payload;

// ---------------------------------------------------------------------------
// Message capabilities
// ---------------------------------------------------------------------------

/// A message answered by exactly one handler.
pub trait Request: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Response produced by the handler. Use `()` for requests without a result.
    type Response: Serialize + Send + Sync + 'static;
}

/// A message broadcast to every registered handler.
pub trait Notification: Serialize + DeserializeOwned + Send + Sync + 'static {}

#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    async fn handle(&self, request: R) -> anyhow::Result<R::Response>;
}

#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync {
    async fn handle(&self, notification: &N) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Mediator contract
// ---------------------------------------------------------------------------

/// The in-process mediator the routing layer sits in front of.
#[async_trait]
pub trait Mediator: Send + Sync {
    /// Invokes the single handler registered for the request's runtime type.
    async fn send(&self, request: Payload) -> Result<Payload, RouteError>;

    /// Runs every handler registered for the notification's runtime type to
    /// completion, collecting all failures instead of stopping at the first.
    async fn broadcast(&self, notification: Payload) -> Result<(), RouteError>;
}

// ---------------------------------------------------------------------------
// Scope contract
// ---------------------------------------------------------------------------

/// Resolved instance, downcast by the caller.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// What a resolver is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// A plain service of the given type.
    Service(TypeId),
    /// Request handlers for the given request type.
    RequestHandler(TypeId),
    /// Notification handlers for the given notification type.
    NotificationHandler(TypeId),
}

impl Capability {
    #[must_use]
    pub fn service<T: 'static>() -> Self {
        Self::Service(TypeId::of::<T>())
    }
}

/// Instance resolution.
pub trait Resolve: Send + Sync {
    /// Resolves every instance registered for `capability`, in registration order.
    fn resolve_all(&self, capability: Capability) -> Vec<Instance>;
}

/// Typed helpers over [`Resolve`].
pub trait ResolveExt {
    /// The first registered service of type `T`, if any.
    fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>>;

    /// All registered services of type `T`.
    fn resolve_many<T: Any + Send + Sync>(&self) -> Vec<Arc<T>>;
}

impl<R: Resolve + ?Sized> ResolveExt for R {
    fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resolve_all(Capability::service::<T>())
            .into_iter()
            .find_map(|instance| instance.downcast::<T>().ok())
    }

    fn resolve_many<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.resolve_all(Capability::service::<T>())
            .into_iter()
            .filter_map(|instance| instance.downcast::<T>().ok())
            .collect()
    }
}

/// An isolated resolution boundary.
pub trait Scope: Resolve {
    /// Releases every instance owned by the scope. Idempotent.
    fn release(&self);

    /// The scope viewed as a plain resolver.
    fn resolver(self: Arc<Self>) -> Arc<dyn Resolve>;
}

/// Creates isolated scopes.
pub trait ScopeFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the scope cannot be created.
    fn create(&self) -> anyhow::Result<Arc<dyn Scope>>;
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct MapResolver(HashMap<Capability, Vec<Instance>>);

    impl Resolve for MapResolver {
        fn resolve_all(&self, capability: Capability) -> Vec<Instance> {
            self.0.get(&capability).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn typed_resolution_downcasts_instances() {
        let mut map = HashMap::new();
        map.insert(
            Capability::service::<String>(),
            vec![
                Arc::new("first".to_string()) as Instance,
                Arc::new("second".to_string()) as Instance,
            ],
        );
        let resolver = MapResolver(map);

        assert_eq!(resolver.resolve::<String>().unwrap().as_str(), "first");
        assert_eq!(resolver.resolve_many::<String>().len(), 2);
        assert!(resolver.resolve::<u32>().is_none());
    }
}
