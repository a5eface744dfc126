//! Response transformations
//!
//! A transformation is fitted on the training responses of one fold, applied
//! before training, and inverted on the model's predictions so every metric
//! is computed on the original scale.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Response scaling applied around model training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseTransformation {
    /// Identity
    #[default]
    None,
    /// Zero mean, unit variance
    Standard,
    /// Scale to [0, 1]
    #[serde(rename = "minmax")]
    MinMax,
    /// Median-centered, scaled by the interquartile range
    Robust,
}

impl FromStr for ResponseTransformation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" | "none" => Ok(Self::None),
            "standard" => Ok(Self::Standard),
            "minmax" => Ok(Self::MinMax),
            "robust" => Ok(Self::Robust),
            other => Err(Error::Configuration(format!(
                "invalid response transformation '{other}', \
                 choose from none, standard, minmax, robust"
            ))),
        }
    }
}

impl ResponseTransformation {
    /// Fit the transformation on training responses.
    ///
    /// NaN responses are ignored. An empty (or all-NaN) input fits the
    /// identity.
    #[must_use]
    pub fn fit(self, response: &[f64]) -> FittedTransformation {
        let mut values: Vec<f64> = response.iter().copied().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return FittedTransformation::IDENTITY;
        }
        values.sort_by(f64::total_cmp);

        let (center, scale) = match self {
            Self::None => (0.0, 1.0),
            Self::Standard => {
                #[allow(clippy::cast_precision_loss)]
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, var.sqrt())
            }
            Self::MinMax => {
                let min = values[0];
                let max = values[values.len() - 1];
                (min, max - min)
            }
            Self::Robust => {
                let median = quantile_sorted(&values, 0.5);
                let iqr = quantile_sorted(&values, 0.75) - quantile_sorted(&values, 0.25);
                (median, iqr)
            }
        };

        FittedTransformation {
            center,
            scale: if scale == 0.0 || !scale.is_finite() { 1.0 } else { scale },
        }
    }
}

/// An affine response transformation fitted on one training set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedTransformation {
    center: f64,
    scale: f64,
}

impl FittedTransformation {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        center: 0.0,
        scale: 1.0,
    };

    /// Map responses into model space.
    #[must_use]
    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| (v - self.center) / self.scale).collect()
    }

    /// Map predictions back onto the response scale.
    #[must_use]
    pub fn inverse_transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| v.mul_add(self.scale, self.center)).collect()
    }
}

/// Linear-interpolation quantile of sorted data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let position = q * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let fraction = position - lower as f64;
    (sorted[upper] - sorted[lower]).mul_add(fraction, sorted[lower])
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: [f64; 6] = [1.0, 3.0, 2.0, 8.0, -4.0, 5.0];

    #[test]
    fn test_roundtrip_all_transformations() {
        for t in [
            ResponseTransformation::None,
            ResponseTransformation::Standard,
            ResponseTransformation::MinMax,
            ResponseTransformation::Robust,
        ] {
            let fitted = t.fit(&DATA);
            let back = fitted.inverse_transform(&fitted.transform(&DATA));
            for (a, b) in back.iter().zip(DATA.iter()) {
                assert!((a - b).abs() < 1e-9, "{t:?}: {a} != {b}");
            }
        }
    }

    #[test]
    fn test_minmax_range() {
        let fitted = ResponseTransformation::MinMax.fit(&DATA);
        let scaled = fitted.transform(&DATA);
        let min = scaled.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(min.abs() < 1e-12);
        assert!((max - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_standard_moments() {
        let fitted = ResponseTransformation::Standard.fit(&DATA);
        let scaled = fitted.transform(&DATA);
        #[allow(clippy::cast_precision_loss)]
        let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn test_constant_response_does_not_divide_by_zero() {
        let fitted = ResponseTransformation::Standard.fit(&[2.0, 2.0]);
        assert_eq!(fitted.transform(&[2.0]), vec![0.0]);
    }

    #[test]
    fn test_quantiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile_sorted(&sorted, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_parse() {
        assert_eq!("None".parse::<ResponseTransformation>().unwrap(), ResponseTransformation::None);
        assert!("log".parse::<ResponseTransformation>().is_err());
    }
}
