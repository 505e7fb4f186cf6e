//! Startup wiring: candidate types, global filters, and a container become a
//! ready [`MediatorClient`].

use std::sync::Arc;

use waypost_core::{FilterType, Resolve, Routable, RouteError, ScopeFactory, TypeInfo};

use crate::client::MediatorClient;
use crate::config::RouterConfig;
use crate::container::Container;
use crate::mediator::{scoped_mediator_factory, MediatorFactory};
use crate::registry::{ListenerRegistry, ServiceRegistry};

/// Collects everything a client needs before the registries are frozen.
///
/// ```ignore
/// let client = MediatorClientBuilder::new()
///     .routable::<GetOrder>()
///     .global_filter(FilterType::of::<Audit>())
///     .build(services.build())?;
/// ```
#[derive(Default)]
pub struct MediatorClientBuilder {
    config: RouterConfig,
    candidates: Vec<TypeInfo>,
    global_filters: Vec<FilterType>,
    mediator_factory: Option<MediatorFactory>,
}

impl MediatorClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Keeps the first registration when two services share a path.
    #[must_use]
    pub fn allow_duplicate_paths(mut self, allow: bool) -> Self {
        self.config.allow_duplicate_paths = allow;
        self
    }

    /// Adds one candidate type. Candidates that are neither services nor
    /// listeners are skipped at build time.
    #[must_use]
    pub fn candidate(mut self, info: TypeInfo) -> Self {
        self.candidates.push(info);
        self
    }

    #[must_use]
    pub fn candidates(mut self, infos: impl IntoIterator<Item = TypeInfo>) -> Self {
        self.candidates.extend(infos);
        self
    }

    #[must_use]
    pub fn routable<T: Routable>(self) -> Self {
        self.candidate(T::type_info())
    }

    /// Appends a filter to every service, after the filters each type declares.
    #[must_use]
    pub fn global_filter(mut self, filter: FilterType) -> Self {
        self.global_filters.push(filter);
        self
    }

    /// Replaces the mediator used for Send calls and inside listener scopes.
    #[must_use]
    pub fn mediator_factory(mut self, factory: MediatorFactory) -> Self {
        self.mediator_factory = Some(factory);
        self
    }

    /// Builds a client whose Send provider and listener scopes both come from
    /// `container`.
    ///
    /// # Errors
    ///
    /// See [`MediatorClientBuilder::build_with`].
    pub fn build(self, container: Container) -> Result<MediatorClient, RouteError> {
        let scopes: Arc<dyn ScopeFactory> = Arc::new(container.clone());
        self.build_with(Arc::new(container), scopes)
    }

    /// Builds a client over an arbitrary provider and scope factory.
    ///
    /// # Errors
    ///
    /// Fails if a service candidate declares an invalid filter or, without
    /// duplicate tolerance, reuses a path.
    pub fn build_with(
        self,
        provider: Arc<dyn Resolve>,
        scopes: Arc<dyn ScopeFactory>,
    ) -> Result<MediatorClient, RouteError> {
        let services = ServiceRegistry::new();
        let added = services.scan(
            &self.candidates,
            &self.global_filters,
            self.config.allow_duplicate_paths,
        )?;

        let listeners = ListenerRegistry::new();
        let registered = listeners.scan(&self.candidates);

        tracing::debug!(
            candidates = self.candidates.len(),
            services = added,
            listeners = registered,
            "routing registries built"
        );

        Ok(MediatorClient::new(
            Arc::new(services),
            Arc::new(listeners),
            provider,
            scopes,
            self.mediator_factory.unwrap_or_else(scoped_mediator_factory),
            self.config,
        ))
    }
}
