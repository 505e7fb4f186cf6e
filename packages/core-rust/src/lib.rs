//! Waypost core: routing descriptors, descriptor discovery, service filters,
//! payload translation, and the mediator/scope contracts the dispatch layer
//! consumes.

pub mod context;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod traits;
pub mod translate;
pub mod types;

pub use context::{PublishContext, PublishContextAccessor, RequestContext};
pub use descriptor::{ListenerDescriptor, ServiceDescriptor};
pub use discovery::{
    is_listener_candidate, is_service_candidate, listener_descriptors, service_descriptors,
    AsEventListener, AsService, Routable, TypeInfo,
};
pub use error::{DiscoveryRejection, RouteError};
pub use filter::{validate_filters, FilterType, Next, ServiceFilter};
pub use traits::{
    Capability, Instance, Mediator, Notification, NotificationHandler, Request, RequestHandler,
    Resolve, ResolveExt, Scope, ScopeFactory,
};
pub use translate::translate;
pub use types::{MediateKind, Payload, TypeHandle};
