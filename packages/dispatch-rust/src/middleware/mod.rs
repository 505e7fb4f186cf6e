//! Tower middleware for the Send path.
//!
//! - [`trace`]: per-call span with timing and outcome
//! - [`pipeline`]: composes the layers around a `DispatchService`

pub mod pipeline;
pub mod trace;

pub use pipeline::{build_send_pipeline, SendPipeline};
pub use trace::TraceLayer;
