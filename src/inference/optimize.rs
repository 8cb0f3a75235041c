use ndarray::{ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use super::error_func::ErrorFunction;
use super::posterior::Posterior;
use crate::error::{ModelError, ModelResult};
use crate::surrogate::{Adam, AdamConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    pub n_step: usize,
    pub learning_rate: f64,
    /// Log progress every this many steps; zero disables it.
    pub log_every: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            n_step: 1000,
            learning_rate: 1e-2,
            log_every: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeResult {
    /// Parameters after the last step.
    pub params: Vec<f64>,
    /// Posterior output at `params`.
    pub loss: f64,
    /// Posterior output before each step.
    pub history: Vec<f64>,
}

/// Minimise the output of `posterior` with Adam, starting from `x0`.
///
/// The posterior is minimised as configured; set
/// [`PosteriorConfig::negative`](super::PosteriorConfig::negative) to find
/// the maximum of the log-posterior instead.
pub fn optimize<E: ErrorFunction>(
    posterior: &Posterior<E>,
    x0: &[f64],
    config: &OptimizeConfig,
) -> ModelResult<OptimizeResult> {
    if x0.len() != posterior.input_size() {
        return Err(ModelError::shape("initial parameters", posterior.input_size(), x0.len()));
    }
    let adam_config = AdamConfig::with_learning_rate(config.learning_rate);
    adam_config.validate()?;
    let mut adam = Adam::new(adam_config);

    let mut params = x0.to_vec();
    let mut history = Vec::with_capacity(config.n_step);
    for step in 0..config.n_step {
        let (loss, grad) = posterior.evaluate_with_grad(&params)?;
        if !loss.is_finite() {
            return Err(ModelError::Diverged { iteration: step });
        }
        history.push(loss);
        if config.log_every > 0 && step % config.log_every == 0 {
            log::debug!("step {step}/{}: loss {loss:.3e}", config.n_step);
        }
        adam.step(
            vec![ArrayViewMut1::from(params.as_mut_slice()).into_dyn()],
            vec![ArrayView1::from(grad.as_slice()).into_dyn()],
        )?;
    }

    let loss = posterior.evaluate(&params)?;
    log::info!("optimisation finished after {} steps: loss {loss:.3e}", config.n_step);
    Ok(OptimizeResult {
        params,
        loss,
        history,
    })
}
