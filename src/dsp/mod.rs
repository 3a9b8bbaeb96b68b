pub mod filters;
pub mod pipeline;
pub mod resample;
pub mod ulaw;

pub use pipeline::{InboundPipeline, OutboundPipeline};
