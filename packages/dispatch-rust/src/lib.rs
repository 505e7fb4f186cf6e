//! Waypost dispatch: path-addressed Send through filter chains and key-addressed
//! Publish with per-listener scopes, on top of an in-process mediator.

pub mod builder;
pub mod client;
pub mod config;
pub mod container;
pub mod logging;
pub mod mediator;
pub mod middleware;
pub mod publish;
pub mod registry;
pub mod tracker;

pub use builder::MediatorClientBuilder;
pub use client::{DispatchService, MediatorClient, SendCall};
pub use config::RouterConfig;
pub use container::{Container, ContainerScope, Lifetime, ServiceCollection};
pub use logging::init_tracing;
pub use mediator::{scoped_mediator_factory, MediatorFactory, ScopedMediator};
pub use middleware::{build_send_pipeline, SendPipeline, TraceLayer};
pub use publish::{ErrorHook, PublishHandle, PublishHook, PublishOptions};
pub use registry::{ListenerRegistry, ServiceRegistry};
pub use tracker::{PublishTracker, TrackerState};
