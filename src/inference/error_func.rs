use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// `ln(√(2π))`
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// A log-likelihood value with its derivatives.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodTerm {
    pub value: f64,
    /// `∂value/∂y_pred`.
    pub d_pred: Vec<f64>,
    /// `∂value/∂params` for the error function's own free parameters.
    pub d_params: Vec<f64>,
}

/// Compares a predicted (log) SED with observations.
///
/// An error function may carry free parameters of its own, such as an
/// intrinsic scatter; a posterior appends them after the emulator inputs.
pub trait ErrorFunction: Send + Sync {
    /// Number of observed values the prediction must have.
    fn n_obs(&self) -> usize;

    fn param_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        Vec::new()
    }

    fn n_params(&self) -> usize {
        self.param_names().len()
    }

    /// True if any free parameter touches or crosses its bounds.
    fn check_bounds(&self, params: &[f64]) -> bool {
        params
            .iter()
            .zip(self.bounds())
            .any(|(p, (lo, hi))| *p <= lo || *p >= hi)
    }

    fn log_likelihood(&self, y_pred: &[f64], params: &[f64]) -> ModelResult<LikelihoodTerm>;
}

fn check_lengths(f: &dyn ErrorFunction, y_pred: &[f64], params: &[f64]) -> ModelResult<()> {
    if y_pred.len() != f.n_obs() {
        return Err(ModelError::shape("predicted SED", f.n_obs(), y_pred.len()));
    }
    if params.len() != f.n_params() {
        return Err(ModelError::shape("error-function parameters", f.n_params(), params.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Gaussian
// ---------------------------------------------------------------------------

/// Independent Gaussian errors with known standard deviations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    y_obs: Vec<f64>,
    y_err: Vec<f64>,
    /// Include `Σ -ln(√(2π) σ)`; otherwise only the exponent is returned.
    norm: bool,
}

impl Gaussian {
    pub fn new(y_obs: Vec<f64>, y_err: Vec<f64>, norm: bool) -> ModelResult<Self> {
        let out = Self { y_obs, y_err, norm };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.y_err.len() != self.y_obs.len() {
            return Err(ModelError::shape("observational errors", self.y_obs.len(), self.y_err.len()));
        }
        if self.y_err.iter().any(|e| !(*e > 0.0) || !e.is_finite()) {
            return Err(ModelError::InvalidConfig(
                "observational errors must be positive and finite".into(),
            ));
        }
        Ok(())
    }

    fn norm_term(&self) -> f64 {
        if self.norm {
            self.y_err.iter().map(|s| -(LN_SQRT_2PI + s.ln())).sum()
        } else {
            0.0
        }
    }
}

impl ErrorFunction for Gaussian {
    fn n_obs(&self) -> usize {
        self.y_obs.len()
    }

    fn log_likelihood(&self, y_pred: &[f64], params: &[f64]) -> ModelResult<LikelihoodTerm> {
        check_lengths(self, y_pred, params)?;
        let mut value = self.norm_term();
        let mut d_pred = Vec::with_capacity(y_pred.len());
        for ((y, o), s) in y_pred.iter().zip(&self.y_obs).zip(&self.y_err) {
            let delta = (y - o) / s;
            value -= 0.5 * delta * delta;
            d_pred.push(-delta / s);
        }
        Ok(LikelihoodTerm {
            value,
            d_pred,
            d_params: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// GaussianWithScatter
// ---------------------------------------------------------------------------

/// Gaussian errors with a single unknown scatter `σ`, fitted as `log10 σ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianWithScatter {
    y_obs: Vec<f64>,
    /// Bounds of `log10 σ`.
    bounds: (f64, f64),
}

impl GaussianWithScatter {
    pub const DEFAULT_BOUNDS: (f64, f64) = (-2.0, 0.0);

    pub fn new(y_obs: Vec<f64>, bounds: (f64, f64)) -> ModelResult<Self> {
        let out = Self { y_obs, bounds };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> ModelResult<()> {
        let (lo, hi) = self.bounds;
        if !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
            return Err(ModelError::InvalidConfig(
                "scatter bounds must be finite with lower < upper".into(),
            ));
        }
        Ok(())
    }
}

impl ErrorFunction for GaussianWithScatter {
    fn n_obs(&self) -> usize {
        self.y_obs.len()
    }

    fn param_names(&self) -> Vec<String> {
        vec!["sigma".to_string()]
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        vec![self.bounds]
    }

    fn log_likelihood(&self, y_pred: &[f64], params: &[f64]) -> ModelResult<LikelihoodTerm> {
        check_lengths(self, y_pred, params)?;
        let log_sigma = params[0];
        let sigma = 10f64.powf(log_sigma);
        let m = self.y_obs.len() as f64;

        let mut chi2 = 0.0;
        let mut d_pred = Vec::with_capacity(y_pred.len());
        for (y, o) in y_pred.iter().zip(&self.y_obs) {
            let delta = (y - o) / sigma;
            chi2 += delta * delta;
            d_pred.push(-delta / sigma);
        }
        let value = -0.5 * chi2 - m * (LN_SQRT_2PI + sigma.ln());
        // σ = 10^s: ∂(-½χ²)/∂s = χ² ln10, ∂(-M ln σ)/∂s = -M ln10
        let d_log_sigma = std::f64::consts::LN_10 * (chi2 - m);
        Ok(LikelihoodTerm {
            value,
            d_pred,
            d_params: vec![d_log_sigma],
        })
    }
}

// ---------------------------------------------------------------------------
// ErrorModel – the serialisable choice of error function
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorModel {
    Gaussian(Gaussian),
    GaussianWithScatter(GaussianWithScatter),
}

impl ErrorModel {
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            ErrorModel::Gaussian(g) => g.validate(),
            ErrorModel::GaussianWithScatter(g) => g.validate(),
        }
    }

    fn inner(&self) -> &dyn ErrorFunction {
        match self {
            ErrorModel::Gaussian(g) => g,
            ErrorModel::GaussianWithScatter(g) => g,
        }
    }
}

impl From<Gaussian> for ErrorModel {
    fn from(g: Gaussian) -> Self {
        ErrorModel::Gaussian(g)
    }
}

impl From<GaussianWithScatter> for ErrorModel {
    fn from(g: GaussianWithScatter) -> Self {
        ErrorModel::GaussianWithScatter(g)
    }
}

impl ErrorFunction for ErrorModel {
    fn n_obs(&self) -> usize {
        self.inner().n_obs()
    }

    fn param_names(&self) -> Vec<String> {
        self.inner().param_names()
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        self.inner().bounds()
    }

    fn log_likelihood(&self, y_pred: &[f64], params: &[f64]) -> ModelResult<LikelihoodTerm> {
        self.inner().log_likelihood(y_pred, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn gaussian_value_and_gradient() {
        let f = Gaussian::new(vec![1.0, 2.0], vec![0.5, 1.0], true).unwrap();
        let t = f.log_likelihood(&[1.5, 2.0], &[]).unwrap();
        let expected = -0.5 - (2.0 * PI).ln() + 2f64.ln();
        assert_relative_eq!(t.value, expected, epsilon = 1e-12);
        assert_eq!(t.d_pred, vec![-2.0, 0.0]);
        assert!(t.d_params.is_empty());

        let bare = Gaussian::new(vec![1.0, 2.0], vec![0.5, 1.0], false).unwrap();
        assert_relative_eq!(bare.log_likelihood(&[1.5, 2.0], &[]).unwrap().value, -0.5);
    }

    #[test]
    fn gaussian_rejects_bad_input() {
        assert!(Gaussian::new(vec![1.0], vec![0.0], true).is_err());
        assert!(Gaussian::new(vec![1.0, 2.0], vec![1.0], true).is_err());
        let f = Gaussian::new(vec![1.0], vec![1.0], true).unwrap();
        assert!(f.log_likelihood(&[1.0, 2.0], &[]).is_err());
        assert!(f.log_likelihood(&[1.0], &[0.5]).is_err());
        assert_eq!(f.n_params(), 0);
    }

    #[test]
    fn scatter_matches_gaussian_with_equal_errors() {
        let obs = vec![0.3, -0.2, 1.1];
        let pred = [0.1, 0.0, 1.0];
        let s = 0.2f64;
        let gauss = Gaussian::new(obs.clone(), vec![s; 3], true).unwrap();
        let scatter = GaussianWithScatter::new(obs, GaussianWithScatter::DEFAULT_BOUNDS).unwrap();
        let a = gauss.log_likelihood(&pred, &[]).unwrap();
        let b = scatter.log_likelihood(&pred, &[s.log10()]).unwrap();
        assert_relative_eq!(a.value, b.value, epsilon = 1e-12);
        for (x, y) in a.d_pred.iter().zip(&b.d_pred) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn scatter_gradient_matches_finite_differences() {
        let f = GaussianWithScatter::new(vec![0.3, -0.2, 1.1], (-2.0, 0.0)).unwrap();
        let pred = [0.1, 0.0, 1.0];
        let ls = -0.8;
        let t = f.log_likelihood(&pred, &[ls]).unwrap();
        let h = 1e-6;
        let up = f.log_likelihood(&pred, &[ls + h]).unwrap().value;
        let down = f.log_likelihood(&pred, &[ls - h]).unwrap().value;
        assert_relative_eq!(t.d_params[0], (up - down) / (2.0 * h), max_relative = 1e-6);
    }

    #[test]
    fn scatter_bounds_are_strict() {
        let f = GaussianWithScatter::new(vec![0.0], (-2.0, 0.0)).unwrap();
        assert_eq!(f.param_names(), vec!["sigma".to_string()]);
        assert!(!f.check_bounds(&[-1.0]));
        assert!(f.check_bounds(&[0.0]));
        assert!(f.check_bounds(&[-2.0]));
        assert!(f.check_bounds(&[0.5]));
        assert!(GaussianWithScatter::new(vec![0.0], (0.0, 0.0)).is_err());
    }

    #[test]
    fn error_model_is_tagged_json() {
        let model: ErrorModel = GaussianWithScatter::new(vec![1.0, 2.0], (-2.0, 0.0)).unwrap().into();
        let text = serde_json::to_string(&model).unwrap();
        assert!(text.contains("\"kind\":\"gaussian_with_scatter\""));
        let back: ErrorModel = serde_json::from_str(&text).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.n_params(), 1);
        assert_eq!(back.n_obs(), 2);
    }
}
