//! Descriptor discovery.
//!
//! Rust has no runtime attributes, so every candidate type declares its routing
//! metadata explicitly as a [`TypeInfo`]. Discovery is then a pure function
//! from that metadata to descriptors, applying these rules in order:
//!
//! 1. reject types with unbound type parameters
//! 2. reject types that cannot be instantiated
//! 3. reject types lacking the message capability (request for services;
//!    request or notification for listeners)
//! 4. reject types with no routing annotation
//! 5. emit one descriptor per annotation

use crate::descriptor::{ListenerDescriptor, ServiceDescriptor};
use crate::error::{DiscoveryRejection, RouteError};
use crate::filter::FilterType;
use crate::traits::{Notification, Request};
use crate::types::{MediateKind, TypeHandle};

/// A service address annotation, with the filters declared alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsService {
    pub path: String,
    pub filters: Vec<FilterType>,
}

/// An event listener annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsEventListener {
    pub key: String,
}

/// Routing metadata for one candidate type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    handle: TypeHandle,
    capability: Option<MediateKind>,
    open_generic: bool,
    concrete: bool,
    services: Vec<AsService>,
    listeners: Vec<AsEventListener>,
}

impl TypeInfo {
    /// Metadata for a request type.
    #[must_use]
    pub fn request<R: Request>() -> Self {
        Self::with_capability(TypeHandle::of::<R>(), Some(MediateKind::Request))
    }

    /// Metadata for a notification type.
    #[must_use]
    pub fn notification<N: Notification>() -> Self {
        Self::with_capability(TypeHandle::of::<N>(), Some(MediateKind::Notification))
    }

    /// Metadata for a type with no message capability.
    #[must_use]
    pub fn plain(handle: TypeHandle) -> Self {
        Self::with_capability(handle, None)
    }

    fn with_capability(handle: TypeHandle, capability: Option<MediateKind>) -> Self {
        Self {
            handle,
            capability,
            open_generic: false,
            concrete: true,
            services: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Marks the type as still having unbound type parameters.
    #[must_use]
    pub fn open_generic(mut self) -> Self {
        self.open_generic = true;
        self
    }

    /// Marks the type as not instantiable.
    #[must_use]
    pub fn not_concrete(mut self) -> Self {
        self.concrete = false;
        self
    }

    #[must_use]
    pub fn as_service(self, path: impl Into<String>) -> Self {
        self.as_service_with(path, Vec::new())
    }

    /// Adds a service annotation that declares its own filters.
    #[must_use]
    pub fn as_service_with(mut self, path: impl Into<String>, filters: Vec<FilterType>) -> Self {
        self.services.push(AsService {
            path: path.into(),
            filters,
        });
        self
    }

    #[must_use]
    pub fn as_event_listener(mut self, key: impl Into<String>) -> Self {
        self.listeners.push(AsEventListener { key: key.into() });
        self
    }

    #[must_use]
    pub fn handle(&self) -> &TypeHandle {
        &self.handle
    }

    #[must_use]
    pub fn capability(&self) -> Option<MediateKind> {
        self.capability
    }

    #[must_use]
    pub fn services(&self) -> &[AsService] {
        &self.services
    }

    #[must_use]
    pub fn listeners(&self) -> &[AsEventListener] {
        &self.listeners
    }

    fn reject(&self, reason: DiscoveryRejection) -> RouteError {
        RouteError::InvalidRoutingType {
            type_name: self.handle.name(),
            reason,
        }
    }

    fn check_shape(&self) -> Result<(), RouteError> {
        if self.open_generic {
            return Err(self.reject(DiscoveryRejection::OpenGeneric));
        }
        if !self.concrete {
            return Err(self.reject(DiscoveryRejection::NotConcrete));
        }
        Ok(())
    }
}

/// Implemented by message types that carry their own routing metadata.
pub trait Routable {
    fn type_info() -> TypeInfo;
}

/// Service descriptors for `info`, one per service annotation.
///
/// # Errors
///
/// Returns `RouteError::InvalidRoutingType` when a discovery rule rejects the type.
pub fn service_descriptors(info: &TypeInfo) -> Result<Vec<ServiceDescriptor>, RouteError> {
    info.check_shape()?;
    if info.capability != Some(MediateKind::Request) {
        return Err(info.reject(DiscoveryRejection::MissingCapability));
    }
    if info.services.is_empty() {
        return Err(info.reject(DiscoveryRejection::NotAnnotated));
    }
    info.services
        .iter()
        .map(|annotation| {
            if annotation.path.trim().is_empty() {
                return Err(info.reject(DiscoveryRejection::EmptyAddress));
            }
            Ok(ServiceDescriptor::new(
                annotation.path.clone(),
                info.handle,
                annotation.filters.clone(),
            ))
        })
        .collect()
}

/// Listener descriptors for `info`, one per listener annotation. The mediate
/// kind comes from the type's capability.
///
/// # Errors
///
/// Returns `RouteError::InvalidRoutingType` when a discovery rule rejects the type.
pub fn listener_descriptors(info: &TypeInfo) -> Result<Vec<ListenerDescriptor>, RouteError> {
    info.check_shape()?;
    let Some(kind) = info.capability else {
        return Err(info.reject(DiscoveryRejection::MissingCapability));
    };
    if info.listeners.is_empty() {
        return Err(info.reject(DiscoveryRejection::NotAnnotated));
    }
    info.listeners
        .iter()
        .map(|annotation| {
            if annotation.key.trim().is_empty() {
                return Err(info.reject(DiscoveryRejection::EmptyAddress));
            }
            Ok(ListenerDescriptor::new(annotation.key.clone(), info.handle, kind))
        })
        .collect()
}

/// Returns `true` if `info` would yield at least one service descriptor.
#[must_use]
pub fn is_service_candidate(info: &TypeInfo) -> bool {
    !info.services.is_empty() && service_descriptors(info).is_ok()
}

/// Returns `true` if `info` would yield at least one listener descriptor.
#[must_use]
pub fn is_listener_candidate(info: &TypeInfo) -> bool {
    !info.listeners.is_empty() && listener_descriptors(info).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
