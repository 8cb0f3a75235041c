//! Fitting a [`SurrogateModel`] to a [`SimulationSet`].
//!
//! Mini-batch Adam over shuffled training samples. Per-sample gradients are
//! computed in parallel and summed in sample order, so a run is reproducible
//! for a given seed regardless of the thread count.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::model::{SimulationSample, SimulationSet};
use crate::error::{ModelError, ModelResult};
use crate::inference::Emulator;
use crate::surrogate::{sample_loss, Adam, AdamConfig, Architecture, Gradients, LossBreakdown, LossWeights, SurrogateModel};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: AdamConfig,
    /// Share of the samples held out for validation, in `[0, 1)`.
    pub validation_fraction: f64,
    /// Epochs without sufficient improvement before stopping.
    pub patience: usize,
    /// Minimum relative improvement of the monitored loss that resets
    /// `patience`.
    pub tolerance: f64,
    pub seed: u64,
    pub weights: LossWeights,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 500,
            batch_size: 32,
            optimizer: AdamConfig::default(),
            validation_fraction: 0.2,
            patience: 50,
            tolerance: 1e-4,
            seed: 42,
            weights: LossWeights::default(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.epochs == 0 {
            return Err(ModelError::InvalidConfig("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidConfig("batch_size must be at least 1".into()));
        }
        self.optimizer.validate()?;
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(ModelError::InvalidConfig(
                "validation_fraction must lie in [0, 1)".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(ModelError::InvalidConfig("tolerance must lie in [0, 1)".into()));
        }
        if !(self.weights.emission >= 0.0 && self.weights.balance >= 0.0) {
            return Err(ModelError::InvalidConfig("loss weights must be non-negative".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Mean loss over the training batches of this epoch.
    pub train: LossBreakdown,
    /// Mean loss on the validation samples after the epoch.
    pub validation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub epochs_run: usize,
    /// Stopped by the patience criterion rather than the epoch budget.
    pub converged: bool,
    /// Epoch whose weights were kept.
    pub best_epoch: usize,
    /// Losses of the kept weights.
    pub final_train_loss: f64,
    pub final_validation_loss: Option<f64>,
    pub best_validation_loss: Option<f64>,
    pub history: Vec<EpochRecord>,
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Trainer {
    architecture: Architecture,
    config: TrainConfig,
}

impl Trainer {
    pub fn new(architecture: Architecture, config: TrainConfig) -> ModelResult<Self> {
        architecture.validate()?;
        config.validate()?;
        Ok(Self {
            architecture,
            config,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Train a fresh model on `set` and freeze the best weights.
    ///
    /// The monitored loss is the validation loss, or the training loss when
    /// nothing is held out. Weights are kept from the epoch with the lowest
    /// monitored loss.
    pub fn fit(&self, set: &SimulationSet) -> ModelResult<(Emulator, TrainReport)> {
        if set.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let cfg = &self.config;
        let (train, validation) = set.split(cfg.validation_fraction, cfg.seed);
        let mut model = SurrogateModel::for_set(set, self.architecture.clone(), cfg.seed)?;
        let mut adam = Adam::new(cfg.optimizer);
        let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(1));
        let mut order: Vec<usize> = (0..train.len()).collect();

        log::info!(
            "Training on {} samples ({} held out), {} weights, up to {} epochs",
            train.len(),
            validation.len(),
            model.n_weights(),
            cfg.epochs
        );

        let mut best_model = model.clone();
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = 0;
        let mut reference = f64::INFINITY;
        let mut stale = 0;
        let mut converged = false;
        let mut history = Vec::new();

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = LossBreakdown::default();
            for batch in order.chunks(cfg.batch_size) {
                let samples: Vec<&SimulationSample> = batch.iter().map(|&i| &train.samples[i]).collect();
                let (loss, grads) = batch_gradient(&model, &samples, &cfg.weights)?;
                epoch_loss += loss.scaled(samples.len() as f64);
                adam.step(model.tensors_mut(), grads.tensors())?;
            }
            let train_loss = epoch_loss.scaled(1.0 / train.len() as f64);
            if !train_loss.is_finite() {
                return Err(ModelError::Diverged { iteration: epoch });
            }

            let validation_loss = if validation.is_empty() {
                None
            } else {
                Some(mean_loss(&model, &validation, &cfg.weights)?.total)
            };
            let monitored = validation_loss.unwrap_or(train_loss.total);
            if !monitored.is_finite() {
                return Err(ModelError::Diverged { iteration: epoch });
            }

            log::debug!(
                "epoch {epoch}: train {:.4e} (att {:.3e}, em {:.3e}, bal {:.3e}), validation {}",
                train_loss.total,
                train_loss.attenuation,
                train_loss.emission,
                train_loss.balance,
                validation_loss.map_or_else(|| "-".to_string(), |v| format!("{v:.4e}"))
            );
            history.push(EpochRecord {
                epoch,
                train: train_loss,
                validation: validation_loss,
            });

            if monitored < best_loss {
                best_loss = monitored;
                best_model = model.clone();
                best_epoch = epoch;
            }
            if monitored < reference * (1.0 - cfg.tolerance) {
                reference = monitored;
                stale = 0;
            } else {
                stale += 1;
                if stale >= cfg.patience {
                    converged = true;
                    log::info!("Converged at epoch {epoch} (no improvement for {stale} epochs)");
                    break;
                }
            }
        }

        let final_train_loss = mean_loss(&best_model, &train, &cfg.weights)?.total;
        let final_validation_loss = if validation.is_empty() {
            None
        } else {
            Some(mean_loss(&best_model, &validation, &cfg.weights)?.total)
        };
        let report = TrainReport {
            epochs_run: history.len(),
            converged,
            best_epoch,
            final_train_loss,
            final_validation_loss,
            best_validation_loss: final_validation_loss.map(|_| best_loss),
            history,
        };
        log::info!(
            "Finished after {} epochs; kept epoch {} (train {:.4e}, validation {})",
            report.epochs_run,
            report.best_epoch,
            report.final_train_loss,
            report
                .final_validation_loss
                .map_or_else(|| "-".to_string(), |v| format!("{v:.4e}"))
        );
        Ok((Emulator::new(best_model)?, report))
    }
}

/// Mean loss of `model` over every sample of `set`.
pub fn mean_loss(model: &SurrogateModel, set: &SimulationSet, weights: &LossWeights) -> ModelResult<LossBreakdown> {
    if set.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    let losses = set
        .samples
        .par_iter()
        .map(|sample| -> ModelResult<LossBreakdown> {
            let pass = model.forward(&sample.params, Some(&sample.stellar))?;
            Ok(sample_loss(model, &pass, sample, weights).0)
        })
        .collect::<ModelResult<Vec<LossBreakdown>>>()?;
    let total = losses.into_iter().fold(LossBreakdown::default(), |acc, l| acc + l);
    Ok(total.scaled(1.0 / set.len() as f64))
}

/// Mean loss and mean parameter gradient over a batch.
fn batch_gradient(
    model: &SurrogateModel,
    samples: &[&SimulationSample],
    weights: &LossWeights,
) -> ModelResult<(LossBreakdown, Gradients)> {
    let per_sample = samples
        .par_iter()
        .map(|sample| -> ModelResult<(LossBreakdown, Gradients)> {
            let pass = model.forward(&sample.params, Some(&sample.stellar))?;
            let (loss, cot) = sample_loss(model, &pass, sample, weights);
            let mut grads = model.zero_gradients();
            model.backward(&pass, &cot, Some(&mut grads))?;
            Ok((loss, grads))
        })
        .collect::<ModelResult<Vec<_>>>()?;

    let scale = 1.0 / samples.len() as f64;
    let mut loss = LossBreakdown::default();
    let mut grads = model.zero_gradients();
    for (l, g) in &per_sample {
        loss += *l;
        grads.add_scaled(g, scale);
    }
    Ok((loss.scaled(scale), grads))
}
