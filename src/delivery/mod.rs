//! Deciding which items go out, and getting them to subscribers exactly once.

mod dispatcher;
mod pipeline;

pub use dispatcher::{BroadcastReport, DeliveryDispatcher};
pub use pipeline::{CycleReport, DeliveryPipeline, PipelineSettings};
