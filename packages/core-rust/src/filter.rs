//! Service filters and the chain that runs them.
//!
//! Filters wrap a Send call onion-style: each one receives the call's
//! `RequestContext`, the current parameter, and a [`Next`] that runs the rest
//! of the chain. The innermost step hands the parameter to the mediator.
//! Filter instances are built fresh for every call from the factory carried by
//! their [`FilterType`].

use std::any::TypeId;
use std::fmt;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::context::RequestContext;
use crate::error::RouteError;
use crate::traits::Mediator;
use crate::types::Payload;

/// Middleware around a routed request.
#[async_trait]
pub trait ServiceFilter: Send + Sync {
    /// Handles one call. Call `next.run(parameter)` to continue the chain, or
    /// return without calling it to short-circuit.
    async fn handle(
        &self,
        ctx: &RequestContext,
        parameter: Payload,
        next: Next<'_>,
    ) -> Result<Payload, RouteError>;
}

type FilterFactory = fn() -> Box<dyn ServiceFilter>;

// ---------------------------------------------------------------------------
// FilterType
// ---------------------------------------------------------------------------

/// Handle for a filter type declared on a route.
#[derive(Clone, Copy)]
pub struct FilterType {
    id: TypeId,
    name: &'static str,
    factory: Option<FilterFactory>,
}

impl FilterType {
    /// A filter built with `F::default()` before each call.
    #[must_use]
    pub fn of<F: ServiceFilter + Default + 'static>() -> Self {
        Self {
            id: TypeId::of::<F>(),
            name: std::any::type_name::<F>(),
            factory: Some(build_filter::<F>),
        }
    }

    /// A bare type reference with no filter capability. Registering a route
    /// that declares one fails with `FilterConstructionInvalid`.
    #[must_use]
    pub fn declared<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            factory: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    #[must_use]
    pub fn is_constructible(&self) -> bool {
        self.factory.is_some()
    }

    /// Builds a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::FilterConstructionInvalid` for declared-only types.
    pub fn activate(&self) -> Result<Box<dyn ServiceFilter>, RouteError> {
        self.factory
            .map(|factory| factory())
            .ok_or(RouteError::FilterConstructionInvalid { filter: self.name })
    }
}

impl PartialEq for FilterType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FilterType {}

impl fmt::Debug for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterType").field(&self.name).finish()
    }
}

fn build_filter<F: ServiceFilter + Default + 'static>() -> Box<dyn ServiceFilter> {
    Box::new(F::default())
}

/// Checks that every filter can be constructed.
///
/// # Errors
///
/// Returns `RouteError::FilterConstructionInvalid` for the first filter that
/// has no factory.
pub fn validate_filters(filters: &[FilterType]) -> Result<(), RouteError> {
    match filters.iter().find(|filter| !filter.is_constructible()) {
        Some(invalid) => Err(RouteError::FilterConstructionInvalid {
            filter: invalid.name,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// The remainder of a filter chain.
pub struct Next<'a> {
    remaining: &'a [FilterType],
    ctx: &'a RequestContext,
    mediator: &'a dyn Mediator,
}

impl<'a> Next<'a> {
    /// A chain over `filters` that ends in `mediator.send`.
    #[must_use]
    pub fn new(
        filters: &'a [FilterType],
        ctx: &'a RequestContext,
        mediator: &'a dyn Mediator,
    ) -> Self {
        Self {
            remaining: filters,
            ctx,
            mediator,
        }
    }

    /// Runs the next filter, or the mediator once no filters remain.
    pub fn run(self, parameter: Payload) -> BoxFuture<'a, Result<Payload, RouteError>> {
        Box::pin(async move {
            match self.remaining.split_first() {
                Some((filter_type, rest)) => {
                    let filter = filter_type.activate()?;
                    let next = Next {
                        remaining: rest,
                        ctx: self.ctx,
                        mediator: self.mediator,
                    };
                    filter.handle(self.ctx, parameter, next).await
                }
                None => self.mediator.send(parameter).await,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
