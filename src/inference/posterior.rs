use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::emulator::Emulator;
use super::error_func::{ErrorFunction, ErrorModel};
use crate::config::write_json;
use crate::error::{ModelError, ModelResult};

/// Output conventions of a [`Posterior`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PosteriorConfig {
    /// Multiply the output by -1, turning maximisation into minimisation.
    pub negative: bool,
    /// Added to the log-posterior when any input is out of bounds.
    pub log_out: f64,
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            negative: false,
            log_out: -1e15,
        }
    }
}

impl PosteriorConfig {
    fn sign(&self) -> f64 {
        if self.negative {
            -1.0
        } else {
            1.0
        }
    }
}

/// Log-posterior over the emulator inputs followed by the error function's
/// own parameters.
#[derive(Debug, Clone)]
pub struct Posterior<E = ErrorModel> {
    emulator: Emulator,
    error_func: E,
    config: PosteriorConfig,
}

impl<E: ErrorFunction> Posterior<E> {
    pub fn new(emulator: Emulator, error_func: E) -> ModelResult<Self> {
        check_observations(&emulator, &error_func)?;
        Ok(Self {
            emulator,
            error_func,
            config: PosteriorConfig::default(),
        })
    }

    pub fn with_config(mut self, config: PosteriorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PosteriorConfig {
        &self.config
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    pub fn error_func(&self) -> &E {
        &self.error_func
    }

    pub fn input_size(&self) -> usize {
        self.emulator.input_size() + self.error_func.n_params()
    }

    pub fn param_names(&self) -> Vec<String> {
        let mut names = self.emulator.param_names().to_vec();
        names.extend(self.error_func.param_names());
        names
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = self.emulator.bounds().to_vec();
        bounds.extend(self.error_func.bounds());
        bounds
    }

    /// True when the emulator inputs leave the training range or an
    /// error-function parameter reaches its bounds.
    pub fn is_out_of_bounds(&self, params: &[f64]) -> ModelResult<bool> {
        let (p_model, p_error) = self.split(params)?;
        Ok(self.emulator.check_bounds(p_model)
            || (self.error_func.n_params() > 0 && self.error_func.check_bounds(p_error)))
    }

    pub fn evaluate(&self, params: &[f64]) -> ModelResult<f64> {
        let (p_model, p_error) = self.split(params)?;
        let y_pred = self.emulator.log_sed(p_model)?;
        let term = self.error_func.log_likelihood(&y_pred, p_error)?;
        self.finish(params, term.value)
    }

    /// [`Self::evaluate`] over many points in parallel, order preserved.
    pub fn evaluate_batch(&self, batch: &[Vec<f64>]) -> ModelResult<Vec<f64>> {
        batch.par_iter().map(|p| self.evaluate(p)).collect()
    }

    /// Value and gradient with respect to every input. The out-of-bounds
    /// penalty is a constant and does not contribute to the gradient.
    pub fn evaluate_with_grad(&self, params: &[f64]) -> ModelResult<(f64, Vec<f64>)> {
        let (p_model, p_error) = self.split(params)?;
        let ((value, d_error), d_model) = self.emulator.log_sed_with_grad(p_model, |y| {
            let term = self.error_func.log_likelihood(y, p_error)?;
            Ok(((term.value, term.d_params), term.d_pred))
        })?;

        let sign = self.config.sign();
        let grad = d_model
            .into_iter()
            .chain(d_error)
            .map(|g| sign * g)
            .collect();
        Ok((self.finish(params, value)?, grad))
    }

    fn split<'p>(&self, params: &'p [f64]) -> ModelResult<(&'p [f64], &'p [f64])> {
        if params.len() != self.input_size() {
            return Err(ModelError::shape("posterior parameters", self.input_size(), params.len()));
        }
        Ok(params.split_at(self.emulator.input_size()))
    }

    fn finish(&self, params: &[f64], log_like: f64) -> ModelResult<f64> {
        let penalty = if self.is_out_of_bounds(params)? {
            self.config.log_out
        } else {
            0.0
        };
        Ok(self.config.sign() * (log_like + penalty))
    }
}

fn check_observations<E: ErrorFunction>(emulator: &Emulator, error_func: &E) -> ModelResult<()> {
    let n_sed = emulator.sed_wavelengths().len();
    if error_func.n_obs() != n_sed {
        return Err(ModelError::shape("observations", n_sed, error_func.n_obs()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inference state
// ---------------------------------------------------------------------------

/// Everything needed to resume an inference run apart from the emulator:
/// the error function, the output configuration and free-form user data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceState {
    pub error_func: ErrorModel,
    pub config: PosteriorConfig,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Posterior<ErrorModel> {
    pub fn save_inference_state(&self, path: &Path, data: serde_json::Value) -> ModelResult<()> {
        let state = InferenceState {
            error_func: self.error_func.clone(),
            config: self.config,
            data,
        };
        write_json(path, &state)?;
        log::info!("Saved inference state to {}", path.display());
        Ok(())
    }

    /// Replace the error function and configuration with those stored at
    /// `path` and return the stored user data.
    pub fn load_inference_state(&mut self, path: &Path) -> ModelResult<serde_json::Value> {
        let file = File::open(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: InferenceState = serde_json::from_reader(BufReader::new(file))?;
        state.error_func.validate()?;
        check_observations(&self.emulator, &state.error_func)?;
        self.error_func = state.error_func;
        self.config = state.config;
        log::info!("Loaded inference state from {}", path.display());
        Ok(state.data)
    }
}
