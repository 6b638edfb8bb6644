//! # caxy_core
//!
//! Server front-end: listener and accept loop, per-connection workers, and
//! the route table for the service endpoints.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use caxy_cache::CacheStore;
use caxy_config::CaxyConfig;
use caxy_pipeline::Pipeline;

pub mod master;
mod worker;

pub use master::{Master, ShutdownHandle};

/// State shared by every connection handler.
pub struct ServerState {
    pub cfg: CaxyConfig,
    pub cache: Arc<CacheStore>,
    pub pipeline: Pipeline,
    /// True while the accept loop runs; `/status` reports it.
    pub running: AtomicBool,
}
