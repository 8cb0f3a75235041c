//! Wavelength grids and the few spectral identities the emulator relies on.
//!
//! Wavelengths are in micrometres and luminosity densities are per unit
//! wavelength, so `Σ w_i L_i` over a grid is a luminosity. Integrals use the
//! trapezoidal rule with precomputed per-point weights, which keeps every
//! integral a dot product and therefore trivially differentiable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `ln(10) · 0.4`: derivative of `10^(-0.4 A)` with respect to `A`, up to sign.
pub const MAG_TO_LN: f64 = 0.4 * std::f64::consts::LN_10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wavelength grid needs at least two positive, strictly increasing values")]
pub struct InvalidGrid;

/// A strictly increasing wavelength axis with trapezoid quadrature weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct WavelengthGrid {
    wavelengths: Vec<f64>,
    weights: Vec<f64>,
}

impl WavelengthGrid {
    pub fn new(wavelengths: Vec<f64>) -> Result<Self, InvalidGrid> {
        if wavelengths.len() < 2 {
            return Err(InvalidGrid);
        }
        if wavelengths.iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(InvalidGrid);
        }
        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(InvalidGrid);
        }
        let weights = trapezoid_weights(&wavelengths);
        Ok(Self {
            wavelengths,
            weights,
        })
    }

    /// Log-spaced grid between `start` and `end` (inclusive).
    pub fn log_spaced(start: f64, end: f64, n: usize) -> Result<Self, InvalidGrid> {
        if n < 2 || start <= 0.0 || end <= start {
            return Err(InvalidGrid);
        }
        let (a, b) = (start.ln(), end.ln());
        let step = (b - a) / (n - 1) as f64;
        Self::new((0..n).map(|i| (a + step * i as f64).exp()).collect())
    }

    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Quadrature weights; all strictly positive.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Trapezoidal integral of `values` sampled on this grid.
    ///
    /// `values` must have the grid's length; extra or missing entries are
    /// not checked here.
    pub fn integrate(&self, values: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(values)
            .map(|(w, v)| w * v)
            .sum()
    }
}

impl TryFrom<Vec<f64>> for WavelengthGrid {
    type Error = InvalidGrid;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WavelengthGrid> for Vec<f64> {
    fn from(grid: WavelengthGrid) -> Self {
        grid.wavelengths
    }
}

fn trapezoid_weights(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let left = if i > 0 { x[i] - x[i - 1] } else { 0.0 };
            let right = if i + 1 < n { x[i + 1] - x[i] } else { 0.0 };
            0.5 * (left + right)
        })
        .collect()
}

/// Fraction of light transmitted through `a_mag` magnitudes of attenuation.
pub fn transmission(a_mag: f64) -> f64 {
    10f64.powf(-0.4 * a_mag)
}

/// Energy removed from `stellar` by the attenuation curve `a_mag`.
pub fn absorbed_energy(grid: &WavelengthGrid, stellar: &[f64], a_mag: &[f64]) -> f64 {
    grid.weights()
        .iter()
        .zip(stellar)
        .zip(a_mag)
        .map(|((w, l), a)| w * l * (1.0 - transmission(*a)))
        .sum()
}
