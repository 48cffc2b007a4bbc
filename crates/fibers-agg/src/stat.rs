use serde::{Deserialize, Serialize};

use fibers_core::errors::{ErrorInfo, FibersError};

/// Quantile summary for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantiles {
    /// 5th percentile estimate.
    pub q05: f64,
    /// 25th percentile estimate.
    pub q25: f64,
    /// Median (50th percentile) estimate.
    pub q50: f64,
    /// 75th percentile estimate.
    pub q75: f64,
    /// 95th percentile estimate.
    pub q95: f64,
}

/// Descriptive statistics of a non-empty sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Describe {
    /// Sample size.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator); absent for a single value.
    pub std_dev: Option<f64>,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Linear-interpolated quantiles.
    pub quantiles: Quantiles,
}

impl Describe {
    /// Median of the sample.
    pub fn median(&self) -> f64 {
        self.quantiles.q50
    }
}

/// Describes `values`.
///
/// An empty sample has no mean or spread, so it is an `EmptyGroup` error
/// rather than zeros.
pub fn describe(values: &[f64]) -> Result<Describe, FibersError> {
    if values.is_empty() {
        return Err(FibersError::EmptyGroup(ErrorInfo::new(
            "empty_sample",
            "cannot describe an empty sample",
        )));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std_dev = (count > 1).then(|| {
        let sum_sq: f64 = sorted.iter().map(|value| (value - mean).powi(2)).sum();
        (sum_sq / (count - 1) as f64).sqrt()
    });
    Ok(Describe {
        count,
        mean,
        std_dev,
        min: sorted[0],
        max: sorted[count - 1],
        quantiles: Quantiles {
            q05: percentile(&sorted, 0.05),
            q25: percentile(&sorted, 0.25),
            q50: percentile(&sorted, 0.5),
            q75: percentile(&sorted, 0.75),
            q95: percentile(&sorted, 0.95),
        },
    })
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
pub fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = quantile.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = position - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}
