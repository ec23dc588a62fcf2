pub mod accumulator;
pub mod cancel;
pub mod fallback;
pub mod kernel;
pub mod native;
pub mod parallel;
pub mod sampler;

use crate::benchmark::TimingStats;
use crate::errors::EngineResult;
use crate::types::{EngineEstimate, Implementation, PricingRequest};
use cancel::CancelToken;
use std::future::Future;

/// The two interchangeable pricing engines implement this trait.
/// Probing and fallback live in the dispatch controller, never in an engine.
/// Send + Sync required so one service instance can serve concurrent calls.
pub trait PricingEngine: Send + Sync {
    fn implementation(&self) -> Implementation;

    /// Capability probe. Must not run a simulation or mutate state.
    fn is_available(&self) -> bool;

    /// Price one request. The request has already been validated.
    fn price(
        &self,
        request: &PricingRequest,
        cancel: &CancelToken,
    ) -> impl Future<Output = EngineResult<EngineEstimate>> + Send;

    /// One warm-up run followed by `iterations` timed runs on `threads` workers.
    fn benchmark(
        &self,
        request: &PricingRequest,
        threads: usize,
        iterations: usize,
        cancel: &CancelToken,
    ) -> impl Future<Output = EngineResult<TimingStats>> + Send;
}
