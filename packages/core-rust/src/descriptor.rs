use crate::filter::FilterType;
use crate::types::{MediateKind, TypeHandle};

/// One routable request: the path it answers on, the type the payload is
/// translated into, and the filters wrapped around the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    path: String,
    parameter_type: TypeHandle,
    filters: Vec<FilterType>,
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        parameter_type: TypeHandle,
        filters: Vec<FilterType>,
    ) -> Self {
        Self {
            path: path.into(),
            parameter_type,
            filters,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn parameter_type(&self) -> &TypeHandle {
        &self.parameter_type
    }

    /// Filters in execution order, outermost first.
    #[must_use]
    pub fn filters(&self) -> &[FilterType] {
        &self.filters
    }

    /// A copy with `extra` appended after the existing filters.
    #[must_use]
    pub fn with_extra_filters(mut self, extra: &[FilterType]) -> Self {
        self.filters.extend_from_slice(extra);
        self
    }
}

/// One listener registered under an event key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerDescriptor {
    key: String,
    listener_type: TypeHandle,
    mediate_kind: MediateKind,
}

impl ListenerDescriptor {
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        listener_type: TypeHandle,
        mediate_kind: MediateKind,
    ) -> Self {
        Self {
            key: key.into(),
            listener_type,
            mediate_kind,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn listener_type(&self) -> &TypeHandle {
        &self.listener_type
    }

    #[must_use]
    pub fn mediate_kind(&self) -> MediateKind {
        self.mediate_kind
    }
}
