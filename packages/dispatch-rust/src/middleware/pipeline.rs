//! Pipeline composition for the Send path.

use tower::util::BoxCloneService;
use tower::ServiceBuilder;
use waypost_core::{Payload, RouteError};

use super::trace::TraceLayer;
use crate::client::{DispatchService, SendCall};

/// The boxed Send service stored by a client.
pub type SendPipeline = BoxCloneService<SendCall, Option<Payload>, RouteError>;

/// Wraps `dispatch` with the Send middleware.
///
/// Layer order (outermost to innermost):
/// 1. `TraceLayer`: span, timing and outcome for the whole call
#[must_use]
pub fn build_send_pipeline(dispatch: DispatchService) -> SendPipeline {
    BoxCloneService::new(ServiceBuilder::new().layer(TraceLayer).service(dispatch))
}
