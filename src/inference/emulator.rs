use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::write_json;
use crate::error::{ModelError, ModelResult};
use crate::surrogate::{Cotangent, Prediction, SurrogateModel};

/// Version written into model files; bumped on incompatible layout changes.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Smallest luminosity passed to `log10` when building a log SED.
pub const SED_FLOOR: f64 = f64::MIN_POSITIVE;

#[derive(Serialize)]
struct ModelFileOut<'a> {
    format_version: u32,
    model: &'a SurrogateModel,
}

#[derive(Deserialize)]
struct ModelFileIn {
    format_version: u32,
    model: serde_json::Value,
}

/// A trained surrogate, frozen for evaluation.
///
/// Cloning shares the weights; every method takes `&self`, so an emulator
/// can be handed to as many threads as needed.
#[derive(Debug, Clone)]
pub struct Emulator {
    model: Arc<SurrogateModel>,
}

impl Emulator {
    pub fn new(model: SurrogateModel) -> ModelResult<Self> {
        model.validate()?;
        Ok(Self {
            model: Arc::new(model),
        })
    }

    pub fn model(&self) -> &SurrogateModel {
        &self.model
    }

    pub fn input_size(&self) -> usize {
        self.model.input_size()
    }

    pub fn param_names(&self) -> &[String] {
        self.model.param_names()
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        self.model.bounds()
    }

    /// True when any parameter is outside the training range.
    pub fn check_bounds(&self, params: &[f64]) -> bool {
        self.model.check_bounds(params)
    }

    pub fn predict(&self, params: &[f64]) -> ModelResult<Prediction> {
        self.model.predict(params)
    }

    pub fn predict_with_stellar(&self, params: &[f64], stellar: &[f64]) -> ModelResult<Prediction> {
        self.model.predict_with_stellar(params, stellar)
    }

    /// Evaluate many parameter vectors in parallel. Results keep the input
    /// order; the first failure is returned.
    pub fn predict_batch(&self, batch: &[Vec<f64>]) -> ModelResult<Vec<Prediction>> {
        batch.par_iter().map(|p| self.model.predict(p)).collect()
    }

    /// Wavelengths of [`Self::sed`]: the attenuation grid followed by the
    /// emission grid.
    pub fn sed_wavelengths(&self) -> Vec<f64> {
        let mut out = self.model.att_grid().wavelengths().to_vec();
        out.extend_from_slice(self.model.em_grid().wavelengths());
        out
    }

    /// Attenuated starlight followed by dust emission.
    pub fn sed(&self, params: &[f64]) -> ModelResult<Vec<f64>> {
        let pass = self.model.forward(params, None)?;
        let mut out = pass.attenuated_stellar();
        out.extend(pass.emission.iter());
        Ok(out)
    }

    /// `log10` of [`Self::sed`], floored at [`SED_FLOOR`].
    pub fn log_sed(&self, params: &[f64]) -> ModelResult<Vec<f64>> {
        Ok(self.sed(params)?.into_iter().map(log_floor).collect())
    }

    /// Evaluate the log SED and pull an objective's gradient back to the
    /// parameters.
    ///
    /// `objective` receives the log SED and returns its own result along
    /// with `∂result/∂log_sed`; the second element of the return value is
    /// that derivative chained through the network.
    pub fn log_sed_with_grad<T>(
        &self,
        params: &[f64],
        objective: impl FnOnce(&[f64]) -> ModelResult<(T, Vec<f64>)>,
    ) -> ModelResult<(T, Vec<f64>)> {
        let pass = self.model.forward(params, None)?;
        let stellar_part = pass.attenuated_stellar();
        let log_sed: Vec<f64> = stellar_part
            .iter()
            .chain(pass.emission.iter())
            .copied()
            .map(log_floor)
            .collect();

        let (value, d_log_sed) = objective(&log_sed)?;
        if d_log_sed.len() != log_sed.len() {
            return Err(ModelError::shape("log SED cotangent", log_sed.len(), d_log_sed.len()));
        }
        let (d_stellar, d_emission) = d_log_sed.split_at(stellar_part.len());

        // y = log10(L* 10^(-0.4 A))  ⇒  dy/dA = -0.4
        let g_att: Array1<f64> = d_stellar
            .iter()
            .zip(&stellar_part)
            .map(|(g, v)| if *v > SED_FLOOR { -0.4 * g } else { 0.0 })
            .collect();
        let g_em: Array1<f64> = d_emission
            .iter()
            .zip(&pass.emission)
            .map(|(g, e)| if *e > SED_FLOOR { g / (e * std::f64::consts::LN_10) } else { 0.0 })
            .collect();

        let cot = Cotangent {
            attenuation: Some(g_att),
            emission: Some(g_em),
            ..Cotangent::default()
        };
        let grad = self.model.backward(&pass, &cot, None)?;
        Ok((value, grad))
    }

    /// Write the model as pretty JSON.
    pub fn save(&self, path: &Path) -> ModelResult<()> {
        let out = ModelFileOut {
            format_version: MODEL_FORMAT_VERSION,
            model: self.model(),
        };
        write_json(path, &out)?;
        log::info!(
            "Saved emulator ({} inputs, {} weights) to {}",
            self.input_size(),
            self.model.n_weights(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> ModelResult<Self> {
        let file = File::open(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: ModelFileIn = serde_json::from_reader(BufReader::new(file))?;
        if raw.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                expected: MODEL_FORMAT_VERSION,
                found: raw.format_version,
            });
        }
        let model: SurrogateModel = serde_json::from_value(raw.model)?;
        let emulator = Self::new(model)?;
        log::info!(
            "Loaded emulator from {} (parameters: {})",
            path.display(),
            emulator.param_names().join(", ")
        );
        Ok(emulator)
    }
}

fn log_floor(v: f64) -> f64 {
    v.max(SED_FLOOR).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::fixtures::{toy_model, toy_model_with};
    use crate::surrogate::Architecture;
    use approx::assert_relative_eq;
    use std::io::Write;

    const X: [f64; 3] = [0.9, 40.0, 25.0];

    fn emulator() -> Emulator {
        Emulator::new(toy_model(11)).unwrap()
    }

    #[test]
    fn emulator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Emulator>();
    }

    #[test]
    fn batch_matches_single_predictions() {
        let emu = emulator();
        let batch: Vec<Vec<f64>> = (0..16)
            .map(|i| vec![0.1 * i as f64, 5.0 * i as f64, 15.0 + 2.0 * i as f64])
            .collect();
        let preds = emu.predict_batch(&batch).unwrap();
        for (p, x) in preds.iter().zip(&batch) {
            assert_eq!(*p, emu.predict(x).unwrap());
        }
        assert!(emu.predict_batch(&[vec![1.0]]).is_err());
    }

    #[test]
    fn sed_concatenates_both_grids() {
        let emu = emulator();
        let sed = emu.sed(&X).unwrap();
        assert_eq!(sed.len(), 13);
        assert_eq!(emu.sed_wavelengths().len(), 13);
        let pred = emu.predict(&X).unwrap();
        assert_eq!(&sed[7..], pred.emission.as_slice());
        for (y, v) in emu.log_sed(&X).unwrap().iter().zip(&sed) {
            assert_relative_eq!(*y, v.log10(), epsilon = 1e-12);
        }
    }

    #[test]
    fn log_sed_gradient_matches_finite_differences() {
        let emu = emulator();
        let weights: Vec<f64> = (0..13).map(|i| 0.2 - 0.03 * i as f64).collect();
        let dot = |x: &[f64]| -> f64 {
            emu.log_sed(x).unwrap().iter().zip(&weights).map(|(a, b)| a * b).sum()
        };
        let (value, grad) = emu
            .log_sed_with_grad(&X, |y| {
                let v: f64 = y.iter().zip(&weights).map(|(a, b)| a * b).sum();
                Ok((v, weights.clone()))
            })
            .unwrap();
        assert_relative_eq!(value, dot(&X[..]), epsilon = 1e-12);
        for k in 0..3 {
            let h = 1e-6 * (1.0 + X[k].abs());
            let mut up = X;
            let mut down = X;
            up[k] += h;
            down[k] -= h;
            let fd = (dot(&up[..]) - dot(&down[..])) / (2.0 * h);
            assert_relative_eq!(grad[k], fd, epsilon = 1e-7, max_relative = 1e-5);
        }
    }

    #[test]
    fn save_load_round_trip_is_exact() {
        let emu = emulator();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        emu.save(&path).unwrap();
        let back = Emulator::load(&path).unwrap();
        assert_eq!(back.predict(&X).unwrap(), emu.predict(&X).unwrap());
        assert_eq!(back.param_names(), emu.param_names());
    }

    #[test]
    fn full_size_models_reload_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        for seed in 0..5 {
            let emu = Emulator::new(toy_model_with(Architecture::default(), seed)).unwrap();
            emu.save(&path).unwrap();
            let back = Emulator::load(&path).unwrap();
            assert_eq!(back.model(), emu.model());
            assert_eq!(back.log_sed(&X).unwrap(), emu.log_sed(&X).unwrap());
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_reported() {
        let emu = emulator();
        assert!(matches!(
            emu.save(Path::new("/dev/full")),
            Err(ModelError::Io { .. }) | Err(ModelError::Json(_))
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let emu = emulator();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let text = serde_json::to_string(&ModelFileOut {
            format_version: 99,
            model: emu.model(),
        })
        .unwrap();
        File::create(&path).unwrap().write_all(text.as_bytes()).unwrap();
        assert!(matches!(
            Emulator::load(&path),
            Err(ModelError::UnsupportedVersion { expected: 1, found: 99 })
        ));
        assert!(matches!(
            Emulator::load(&dir.path().join("missing.json")),
            Err(ModelError::Io { .. })
        ));
    }
}
