//! Error taxonomy for registration, dispatch, and fan-out.

/// Why a candidate type was rejected by descriptor discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryRejection {
    /// The type still has unfilled type parameters.
    OpenGeneric,
    /// The type cannot be instantiated.
    NotConcrete,
    /// The type is neither a request nor (for listeners) a notification.
    MissingCapability,
    /// The type carries no routing annotation.
    NotAnnotated,
    /// A routing annotation has an empty or whitespace-only address.
    EmptyAddress,
}

impl std::fmt::Display for DiscoveryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::OpenGeneric => "type has unbound type parameters",
            Self::NotConcrete => "type is not instantiable",
            Self::MissingCapability => "type does not implement the required message capability",
            Self::NotAnnotated => "type has no routing annotation",
            Self::EmptyAddress => "routing annotation has an empty address",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("argument `{name}` must not be absent")]
    ArgumentNull { name: &'static str },

    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },

    #[error("no receiver registered for path `{path}`")]
    ReceiverNotFound { path: String },

    #[error("cannot translate `{from}` into `{to}`")]
    TypeTranslation {
        from: &'static str,
        to: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("path `{path}` is already registered")]
    DuplicateAddress { path: String },

    #[error("`{filter}` is not a constructible service filter")]
    FilterConstructionInvalid { filter: &'static str },

    #[error("`{type_name}` cannot be routed: {reason}")]
    InvalidRoutingType {
        type_name: &'static str,
        reason: DiscoveryRejection,
    },

    #[error("no handler registered for `{message_type}`")]
    HandlerNotFound { message_type: &'static str },

    #[error("handler failed: {0}")]
    Handler(#[from] anyhow::Error),

    #[error("listener `{listener}` for `{key}` failed")]
    ListenerInvocation {
        key: String,
        listener: &'static str,
        #[source]
        source: Box<RouteError>,
    },

    #[error("listener `{listener}` for `{key}` panicked")]
    ListenerPanicked { key: String, listener: &'static str },

    #[error("could not acquire a scope for listener `{listener}`")]
    ScopeAcquisition {
        listener: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{hook} hook failed")]
    HookFailed {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("client is shutting down; no new fan-outs are accepted")]
    ShuttingDown,

    #[error("{} failures", .0.len())]
    Aggregate(Vec<RouteError>),
}

impl RouteError {
    /// Collapses a list of failures: one failure stays as is, several become
    /// `Aggregate`. Returns `None` for an empty list.
    #[must_use]
    pub fn collect(mut errors: Vec<RouteError>) -> Option<RouteError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(RouteError::Aggregate(errors)),
        }
    }

    /// Number of leaf failures carried by this error.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Aggregate(errors) => errors.iter().map(Self::failure_count).sum(),
            _ => 1,
        }
    }
}
