//! # caxy_pipeline
//!
//! Per-request proxy state machine and the origin client behind it.
//!
//! A request moves through: parse/normalize -> cache lookup -> (hit: serve
//! from cache) | (miss: fetch origin -> buffer -> store -> serve). Hits and
//! misses are signalled to clients through the `X-Cache` response headers.

mod error;
mod origin;
mod pipeline;
mod response;
mod target;

pub use error::PipelineError;
pub use origin::OriginClient;
pub use pipeline::Pipeline;
pub use response::OriginResponse;
pub use target::{normalize_target, Scheme, Target};
