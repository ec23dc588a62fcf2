use crate::errors::{EngineError, EngineResult};
use crate::types::{validate_market, PricingRequest, PricingResult, Validation};

/// Closed-form Black-Scholes price for a European option.
///
/// d1 = (ln(S/K) + (r + sigma^2/2) T) / (sigma sqrt(T)),  d2 = d1 - sigma sqrt(T)
/// call = S Phi(d1) - K e^{-rT} Phi(d2)
/// put  = K e^{-rT} Phi(-d2) - S Phi(-d1)
///
/// Used as the correctness oracle for the simulated estimate.
pub fn black_scholes(
    spot: f64,
    strike: f64,
    rate: f64,
    sigma: f64,
    maturity: f64,
    is_call: bool,
) -> EngineResult<f64> {
    validate_market(spot, strike, rate, sigma, maturity)?;

    let sigma_sqrt_t = sigma * maturity.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * maturity) / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;
    let discounted_strike = strike * (-rate * maturity).exp();

    let price = if is_call {
        spot * norm_cdf(d1) - discounted_strike * norm_cdf(d2)
    } else {
        discounted_strike * norm_cdf(-d2) - spot * norm_cdf(-d1)
    };

    if !price.is_finite() {
        return Err(EngineError::Validation(format!(
            "analytical price is not finite (d1={d1}, d2={d2})"
        )));
    }
    Ok(price)
}

/// Analytical price for a request's market parameters.
#[inline]
pub fn price(request: &PricingRequest) -> EngineResult<f64> {
    black_scholes(
        request.spot,
        request.strike,
        request.rate,
        request.sigma,
        request.maturity,
        request.is_call,
    )
}

/// Standard normal CDF via Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7 on erf).
///
/// Evaluated on |x| and reflected, so Phi(x) + Phi(-x) = 1 up to rounding.
pub fn norm_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let z = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + P * z);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    let erf = 1.0 - poly * (-z * z).exp();

    if x >= 0.0 {
        0.5 * (1.0 + erf)
    } else {
        0.5 * (1.0 - erf)
    }
}

/// Compare a simulated result against the closed form.
/// Never fails the pricing call: any problem is reported inside the `Validation`.
pub fn cross_validate(request: &PricingRequest, result: &PricingResult) -> Validation {
    match compare(request, result) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "analytical cross-check failed");
            Validation::Failed { error: e.to_string() }
        }
    }
}

fn compare(request: &PricingRequest, result: &PricingResult) -> EngineResult<Validation> {
    let analytical_price = price(request)?;

    // Relative error is undefined when the closed form rounds to zero
    // (deep out-of-the-money options).
    if analytical_price.abs() < f64::EPSILON {
        return Err(EngineError::Validation(format!(
            "analytical price {analytical_price:e} too small for a relative error"
        )));
    }

    let absolute_error = (result.option_price - analytical_price).abs();
    Ok(Validation::Report {
        analytical_price,
        absolute_error,
        relative_error: absolute_error / analytical_price,
        is_within_confidence_interval: result.confidence.contains(analytical_price),
    })
}
