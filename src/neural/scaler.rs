//! Feature scalers fitted at training time and persisted with the models.

use crate::utils::error::{CogniError, CogniResult};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Min/max scaler for a single scalar feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> CogniResult<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(CogniError::InsufficientData {
                reason: "min-max scaler needs at least one finite value".to_string(),
            });
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { min, max })
    }

    /// Scale into [0, 1]; a degenerate range maps everything to 0.
    pub fn transform(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range.abs() < 1e-12 || !value.is_finite() {
            0.0
        } else {
            ((value - self.min) / range).clamp(0.0, 1.0)
        }
    }
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// Per-feature z-score scaler with a standard-deviation floor.
///
/// The floor keeps constant training columns from exploding the scaled
/// inputs (divide-by-near-zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl ZScoreScaler {
    pub fn fit(rows: &[Vec<f64>], std_floor: f64) -> CogniResult<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.is_empty() || n_features == 0 {
            return Err(CogniError::InsufficientData {
                reason: "z-score scaler needs at least one sample".to_string(),
            });
        }
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(CogniError::invalid("rows", "inconsistent feature width"));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; n_features];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; n_features];
        for row in rows {
            for ((s, v), m) in std.iter_mut().zip(row.iter()).zip(mean.iter()) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut std {
            *s = s.sqrt().max(std_floor);
        }
        Ok(Self { mean, std })
    }

    pub fn transform(&self, row: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.mean.len(),
            row.iter()
                .zip(self.mean.iter().zip(self.std.iter()))
                .map(|(v, (m, s))| (v - m) / s),
        )
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_scales_into_unit_interval() {
        let scaler = MinMaxScaler::fit(&[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(scaler.transform(2.0), 0.0);
        assert_eq!(scaler.transform(6.0), 1.0);
        assert_eq!(scaler.transform(4.0), 0.5);
    }

    #[test]
    fn degenerate_min_max_range_maps_to_zero() {
        let scaler = MinMaxScaler::fit(&[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(scaler.transform(3.0), 0.0);
        assert_eq!(scaler.transform(99.0), 0.0);
    }

    #[test]
    fn z_score_applies_std_floor_on_constant_feature() {
        let rows = vec![vec![20.0, 0.0], vec![20.0, 10.0], vec![20.0, 20.0]];
        let scaler = ZScoreScaler::fit(&rows, 1.0).unwrap();
        // First feature is constant: std floored to 1.0, transform stays finite.
        assert_eq!(scaler.std[0], 1.0);
        let out = scaler.transform(&[21.0, 10.0]);
        assert!((out[0] - 1.0).abs() < 1e-9);
        assert!(out[1].abs() < 1e-9);
    }
}
