use std::ops::{Add, AddAssign};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::model::{Cotangent, ForwardPass, SurrogateModel};
use crate::data::model::SimulationSample;

/// Relative weights of the loss terms. Attenuation error has weight one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    /// Weight of `KL(p* ‖ p)` between simulated and predicted emission shapes.
    pub emission: f64,
    /// Weight of the energy-balance penalty.
    pub balance: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            emission: 1.0,
            balance: 10.0,
        }
    }
}

/// Per-term loss values; `total` is the weighted sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub attenuation: f64,
    pub emission: f64,
    pub balance: f64,
    pub total: f64,
}

impl LossBreakdown {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            attenuation: self.attenuation * factor,
            emission: self.emission * factor,
            balance: self.balance * factor,
            total: self.total * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }
}

impl Add for LossBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            attenuation: self.attenuation + rhs.attenuation,
            emission: self.emission + rhs.emission,
            balance: self.balance + rhs.balance,
            total: self.total + rhs.total,
        }
    }
}

impl AddAssign for LossBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Loss of one forward pass against its simulation, and the cotangent of
/// that loss with respect to the model outputs.
///
/// * attenuation: mean squared error in magnitudes
/// * emission: `KL(p* ‖ p)` of the energy fractions per emission bin;
///   skipped when the simulation emitted nothing
/// * balance: `(f_abs - f_em*)²`, both energies as fractions of the
///   intrinsic stellar energy; skipped for a dark stellar spectrum
pub fn sample_loss(
    model: &SurrogateModel,
    pass: &ForwardPass,
    sample: &SimulationSample,
    weights: &LossWeights,
) -> (LossBreakdown, Cotangent) {
    let n_att = pass.attenuation.len() as f64;
    let diff: Array1<f64> = pass
        .attenuation
        .iter()
        .zip(&sample.attenuation)
        .map(|(a, t)| a - t)
        .collect();
    let attenuation = diff.mapv(|d| d * d).sum() / n_att;
    let g_att = diff.mapv(|d| 2.0 * d / n_att);

    let w_em = model.em_grid().weights();
    let emitted_true = model.em_grid().integrate(&sample.emission);

    let mut emission = 0.0;
    let mut g_logits = None;
    if emitted_true > 0.0 {
        let target: Array1<f64> = sample
            .emission
            .iter()
            .zip(w_em)
            .map(|(e, w)| w * e / emitted_true)
            .collect();
        emission = target
            .iter()
            .zip(&pass.log_fractions)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, lp)| t * (t.ln() - lp))
            .sum();
        g_logits = Some((&pass.fractions - &target) * weights.emission);
    }

    let stellar_energy = model.att_grid().integrate(&pass.stellar);
    let mut balance = 0.0;
    let mut g_absorbed = 0.0;
    if stellar_energy > 0.0 {
        let gap = (pass.absorbed - emitted_true) / stellar_energy;
        balance = gap * gap;
        g_absorbed = weights.balance * 2.0 * gap / stellar_energy;
    }

    let breakdown = LossBreakdown {
        attenuation,
        emission,
        balance,
        total: attenuation + weights.emission * emission + weights.balance * balance,
    };
    let cotangent = Cotangent {
        attenuation: Some(g_att),
        emission: None,
        absorbed: g_absorbed,
        logits: g_logits,
    };
    (breakdown, cotangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::fixtures::toy_model;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    const X: [f64; 3] = [1.1, 50.0, 30.0];

    fn target(model: &SurrogateModel) -> SimulationSample {
        let n_att = model.att_grid().len();
        let n_em = model.em_grid().len();
        SimulationSample {
            params: X.to_vec(),
            attenuation: (0..n_att).map(|i| 1.5 / (1.0 + i as f64)).collect(),
            stellar: model.stellar().to_vec(),
            emission: (0..n_em).map(|j| 0.01 * (1.0 + (j as f64 - 2.0).powi(2))).collect(),
            metadata: BTreeMap::new(),
        }
    }

    fn total(model: &SurrogateModel, params: &[f64], sample: &SimulationSample) -> f64 {
        let pass = model.forward(params, Some(&sample.stellar)).unwrap();
        sample_loss(model, &pass, sample, &LossWeights::default()).0.total
    }

    #[test]
    fn perfect_attenuation_has_zero_attenuation_loss() {
        let model = toy_model(2);
        let mut sample = target(&model);
        let pass = model.forward(&X, Some(&sample.stellar)).unwrap();
        sample.attenuation = pass.attenuation.to_vec();
        sample.emission = pass.emission.to_vec();
        let (loss, _) = sample_loss(&model, &pass, &sample, &LossWeights::default());
        assert_eq!(loss.attenuation, 0.0);
        assert!(loss.emission.abs() < 1e-12);
        assert!(loss.balance < 1e-24);
    }

    #[test]
    fn loss_gradient_matches_finite_differences() {
        let model = toy_model(8);
        let sample = target(&model);
        let pass = model.forward(&X, Some(&sample.stellar)).unwrap();
        let (_, cot) = sample_loss(&model, &pass, &sample, &LossWeights::default());
        let grad = model.backward(&pass, &cot, None).unwrap();

        for k in 0..X.len() {
            let h = 1e-6 * (1.0 + X[k].abs());
            let mut up = X;
            let mut down = X;
            up[k] += h;
            down[k] -= h;
            let fd = (total(&model, &up, &sample) - total(&model, &down, &sample)) / (2.0 * h);
            assert_relative_eq!(grad[k], fd, epsilon = 1e-7, max_relative = 1e-5);
        }
    }

    #[test]
    fn dark_dust_skips_emission_term() {
        let model = toy_model(2);
        let mut sample = target(&model);
        sample.emission.iter_mut().for_each(|e| *e = 0.0);
        let pass = model.forward(&X, Some(&sample.stellar)).unwrap();
        let (loss, cot) = sample_loss(&model, &pass, &sample, &LossWeights::default());
        assert_eq!(loss.emission, 0.0);
        assert!(cot.logits.is_none());
        // the surrogate still absorbs something, which the penalty reports
        assert!(loss.balance > 0.0);
    }

    #[test]
    fn breakdown_arithmetic() {
        let a = LossBreakdown {
            attenuation: 1.0,
            emission: 2.0,
            balance: 3.0,
            total: 6.0,
        };
        let mut b = a;
        b += a;
        assert_eq!(b.scaled(0.5), a);
    }
}
