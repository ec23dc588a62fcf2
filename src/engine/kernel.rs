use crate::engine::sampler::NormalSampler;
use crate::errors::EngineResult;
use crate::types::PricingRequest;

/// Per-run constants for the GBM terminal-price projection.
/// Built once per run and shared read-only by every worker. Stack, Copy.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrialParams {
    pub spot: f64,
    pub strike: f64,
    pub is_call: bool,
    // Precomputed
    /// (r - sigma^2 / 2) * T
    pub drift: f64,
    /// sigma * sqrt(T)
    pub vol: f64,
    /// e^{-rT}
    pub discount: f64,
}

impl TrialParams {
    /// Validates the request, then precomputes. No sampling happens on failure.
    pub fn from_request(request: &PricingRequest) -> EngineResult<Self> {
        request.validate()?;
        let sigma = request.sigma;
        let t = request.maturity;
        Ok(Self {
            spot: request.spot,
            strike: request.strike,
            is_call: request.is_call,
            drift: (request.rate - 0.5 * sigma * sigma) * t,
            vol: sigma * t.sqrt(),
            discount: (-request.rate * t).exp(),
        })
    }

    /// Undiscounted payoff for a given standard normal shock.
    #[inline]
    pub fn payoff(&self, z: f64) -> f64 {
        let terminal = self.spot * (self.drift + self.vol * z).exp();
        if self.is_call {
            (terminal - self.strike).max(0.0)
        } else {
            (self.strike - terminal).max(0.0)
        }
    }
}

/// One trial: draw, project to maturity, pay off. No shared state.
#[inline]
pub fn run_trial<S: NormalSampler + ?Sized>(params: &TrialParams, sampler: &mut S) -> f64 {
    params.payoff(sampler.sample())
}
