//! A small scoped service container.
//!
//! Covers what the routing layer needs from dependency injection: lifetimes,
//! handler registration keyed by message type, isolated scopes, and
//! deterministic release of scoped instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use waypost_core::{
    Capability, Instance, Notification, NotificationHandler, PublishContextAccessor, Request,
    RequestHandler, Resolve, Scope, ScopeFactory,
};

use crate::mediator::{
    NotificationHandlerSlot, RequestHandlerSlot, TypedNotificationHandler, TypedRequestHandler,
};

type Factory = Arc<dyn Fn(&dyn Resolve) -> Instance + Send + Sync>;
type InstanceCache = Mutex<HashMap<usize, Instance>>;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance for the whole container.
    Singleton,
    /// One instance per scope. Resolving from the root container behaves like
    /// a root-level scope.
    Scoped,
    /// A fresh instance on every resolution.
    Transient,
}

struct Registration {
    capability: Capability,
    lifetime: Lifetime,
    factory: Factory,
}

// ---------------------------------------------------------------------------
// ServiceCollection
// ---------------------------------------------------------------------------

/// Registrations collected before the container is built.
#[derive(Default)]
pub struct ServiceCollection {
    registrations: Vec<Registration>,
}

impl ServiceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing value as a singleton.
    pub fn add_instance<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        let instance: Instance = Arc::new(value);
        self.push(
            Capability::service::<T>(),
            Lifetime::Singleton,
            Arc::new(move |_| instance.clone()),
        )
    }

    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn Resolve) -> T + Send + Sync + 'static,
    {
        self.add_service(Lifetime::Singleton, factory)
    }

    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn Resolve) -> T + Send + Sync + 'static,
    {
        self.add_service(Lifetime::Scoped, factory)
    }

    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn Resolve) -> T + Send + Sync + 'static,
    {
        self.add_service(Lifetime::Transient, factory)
    }

    /// Registers a request handler; a fresh handler is built per resolution.
    pub fn add_request_handler<R, H, F>(&mut self, factory: F) -> &mut Self
    where
        R: Request,
        H: RequestHandler<R> + 'static,
        F: Fn(&dyn Resolve) -> H + Send + Sync + 'static,
    {
        self.push(
            Capability::RequestHandler(TypeId::of::<R>()),
            Lifetime::Transient,
            Arc::new(move |resolver| {
                let handler = TypedRequestHandler::<R, H>::new(factory(resolver));
                Arc::new(RequestHandlerSlot(Arc::new(handler))) as Instance
            }),
        )
    }

    /// Registers a notification handler; a fresh handler is built per resolution.
    pub fn add_notification_handler<N, H, F>(&mut self, factory: F) -> &mut Self
    where
        N: Notification,
        H: NotificationHandler<N> + 'static,
        F: Fn(&dyn Resolve) -> H + Send + Sync + 'static,
    {
        self.push(
            Capability::NotificationHandler(TypeId::of::<N>()),
            Lifetime::Transient,
            Arc::new(move |resolver| {
                let handler = TypedNotificationHandler::<N, H>::new(factory(resolver));
                Arc::new(NotificationHandlerSlot(Arc::new(handler))) as Instance
            }),
        )
    }

    /// Registers the scoped `PublishContextAccessor` that fan-out fills in for
    /// each listener scope.
    pub fn add_publish_context_accessor(&mut self) -> &mut Self {
        self.add_scoped(|_| PublishContextAccessor::new())
    }

    #[must_use]
    pub fn build(self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                registrations: self.registrations,
                singletons: Mutex::new(HashMap::new()),
                root_scoped: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn add_service<T, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn Resolve) -> T + Send + Sync + 'static,
    {
        self.push(
            Capability::service::<T>(),
            lifetime,
            Arc::new(move |resolver| Arc::new(factory(resolver)) as Instance),
        )
    }

    fn push(&mut self, capability: Capability, lifetime: Lifetime, factory: Factory) -> &mut Self {
        self.registrations.push(Registration {
            capability,
            lifetime,
            factory,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

struct ContainerInner {
    registrations: Vec<Registration>,
    singletons: InstanceCache,
    root_scoped: InstanceCache,
}

/// The root container. Cheap to clone.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Resolves `capability`, with `current` being the resolver that scoped and
    /// transient factories receive and `scoped` the cache for scoped instances.
    fn resolve_in(
        &self,
        capability: Capability,
        current: &dyn Resolve,
        scoped: &InstanceCache,
    ) -> Vec<Instance> {
        self.inner
            .registrations
            .iter()
            .enumerate()
            .filter(|(_, registration)| registration.capability == capability)
            .map(|(index, registration)| match registration.lifetime {
                Lifetime::Singleton => cached(&self.inner.singletons, index, || {
                    (registration.factory)(self)
                }),
                Lifetime::Scoped => cached(scoped, index, || (registration.factory)(current)),
                Lifetime::Transient => (registration.factory)(current),
            })
            .collect()
    }
}

impl Resolve for Container {
    fn resolve_all(&self, capability: Capability) -> Vec<Instance> {
        self.resolve_in(capability, self, &self.inner.root_scoped)
    }
}

impl ScopeFactory for Container {
    fn create(&self) -> anyhow::Result<Arc<dyn Scope>> {
        Ok(Arc::new(ContainerScope::new(self.clone())))
    }
}

/// Returns the cached instance at `index`, creating it outside the lock so
/// factories may resolve their own dependencies.
fn cached(cache: &InstanceCache, index: usize, create: impl FnOnce() -> Instance) -> Instance {
    if let Some(existing) = cache.lock().get(&index) {
        return existing.clone();
    }
    let created = create();
    cache.lock().entry(index).or_insert(created).clone()
}

// ---------------------------------------------------------------------------
// ContainerScope
// ---------------------------------------------------------------------------

/// An isolated scope over a [`Container`].
pub struct ContainerScope {
    id: Uuid,
    root: Container,
    instances: InstanceCache,
    released: AtomicBool,
}

impl ContainerScope {
    fn new(root: Container) -> Self {
        Self {
            id: Uuid::new_v4(),
            root,
            instances: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Resolve for ContainerScope {
    fn resolve_all(&self, capability: Capability) -> Vec<Instance> {
        if self.is_released() {
            tracing::warn!(scope = %self.id, ?capability, "resolution from a released scope");
            return Vec::new();
        }
        self.root.resolve_in(capability, self, &self.instances)
    }
}

impl Scope for ContainerScope {
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let released: Vec<Instance> = self.instances.lock().drain().map(|(_, v)| v).collect();
        tracing::trace!(scope = %self.id, instances = released.len(), "scope released");
        drop(released);
    }

    fn resolver(self: Arc<Self>) -> Arc<dyn Resolve> {
        self
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
