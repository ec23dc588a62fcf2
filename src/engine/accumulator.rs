use crate::types::{ConfidenceInterval, EngineEstimate};

/// Two-sided 95% z-score.
pub const Z_95: f64 = 1.96;

/// Sufficient statistics for mean and variance of trial payoffs.
/// Owned by one worker while it runs; merged by field-wise addition after the join.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatAccumulator {
    pub sum: f64,
    pub sum_of_squares: f64,
    pub count: u64,
}

/// Final statistics for one run, discounted to present value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub option_price: f64,
    pub confidence: ConfidenceInterval,
    pub std_error: f64,
    pub variance: f64,
}

impl StatAccumulator {
    #[inline]
    pub fn push(&mut self, payoff: f64) {
        self.sum += payoff;
        self.sum_of_squares += payoff * payoff;
        self.count += 1;
    }

    #[inline]
    pub fn merge(&mut self, other: &StatAccumulator) {
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
        self.count += other.count;
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Bessel-corrected sample variance from the sufficient statistics:
    /// (sum(x^2) - sum(x)^2 / n) / (n - 1).
    /// Zero for fewer than two samples; clamped at zero against cancellation error.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let centered = self.sum_of_squares - self.sum * self.sum / n;
        (centered / (n - 1.0)).max(0.0)
    }

    /// Discounted price and 95% confidence interval.
    pub fn finalize(&self, discount: f64) -> Estimate {
        let variance = self.variance();
        let std_error = if self.count == 0 {
            0.0
        } else {
            (variance / self.count as f64).sqrt()
        };
        let option_price = self.mean() * discount;
        let margin = Z_95 * std_error * discount;
        Estimate {
            option_price,
            confidence: ConfidenceInterval {
                lower: option_price - margin,
                upper: option_price + margin,
            },
            std_error,
            variance,
        }
    }
}

impl Estimate {
    pub fn into_engine_estimate(self, threads_used: usize) -> EngineEstimate {
        EngineEstimate {
            option_price: self.option_price,
            confidence: self.confidence,
            threads_used,
        }
    }
}
