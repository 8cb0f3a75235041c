//! A cheap stand-in for radiative-transfer runs.
//!
//! Attenuation follows a power law normalised at the V band,
//! `A(λ) = 1.086 τ_V (λ / 0.55 µm)^(-0.7 + δ)`, and the dust re-emits
//! exactly the absorbed starlight as a modified blackbody with `β = 2`.
//! Used by the `generate_sample` binary and by tests that need a learnable
//! table.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data::model::{MetadataValue, SimulationSample, SimulationSet};
use crate::spectrum::{self, InvalidGrid, WavelengthGrid};

/// `h c / k` in µm·K.
const HC_OVER_K: f64 = 14_387.77;
const T_STAR: f64 = 5800.0;
const BETA: f64 = 2.0;

/// Parameter names with their sampling ranges.
pub const PARAMETERS: [(&str, f64, f64); 3] = [
    ("tau_v", 0.05, 3.0),
    ("delta", -0.5, 0.3),
    ("t_dust", 15.0, 60.0),
];

const GEOMETRIES: [&str; 3] = ["disk", "bulge", "shell"];

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub n_samples: usize,
    pub seed: u64,
    /// `(start, end)` of the log-spaced attenuation grid, µm.
    pub att_range: (f64, f64),
    pub n_att: usize,
    /// `(start, end)` of the log-spaced emission grid, µm.
    pub em_range: (f64, f64),
    pub n_em: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_samples: 200,
            seed: 42,
            att_range: (0.09, 5.0),
            n_att: 60,
            em_range: (3.0, 1000.0),
            n_em: 50,
        }
    }
}

impl SyntheticConfig {
    pub fn generate(&self) -> Result<SimulationSet, InvalidGrid> {
        let att_grid = WavelengthGrid::log_spaced(self.att_range.0, self.att_range.1, self.n_att)?;
        let em_grid = WavelengthGrid::log_spaced(self.em_range.0, self.em_range.1, self.n_em)?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let star_shape: Vec<f64> = att_grid
            .wavelengths()
            .iter()
            .map(|&l| planck(l, T_STAR))
            .collect();
        let star_norm = att_grid.integrate(&star_shape);

        let samples = (0..self.n_samples)
            .map(|run| {
                let params: Vec<f64> = PARAMETERS
                    .iter()
                    .map(|&(_, lo, hi)| rng.gen_range(lo..hi))
                    .collect();
                let (tau_v, delta, t_dust) = (params[0], params[1], params[2]);

                // stellar luminosity log-uniform in [0.5, 2]
                let scale = 2f64.powf(rng.gen_range(-1.0..1.0));
                let stellar: Vec<f64> = star_shape.iter().map(|s| scale * s / star_norm).collect();

                let attenuation: Vec<f64> = att_grid
                    .wavelengths()
                    .iter()
                    .map(|&l| 1.086 * tau_v * (l / 0.55).powf(-0.7 + delta))
                    .collect();
                let absorbed = spectrum::absorbed_energy(&att_grid, &stellar, &attenuation);

                let dust_shape: Vec<f64> = em_grid
                    .wavelengths()
                    .iter()
                    .map(|&l| l.powf(-BETA) * planck(l, t_dust))
                    .collect();
                let dust_norm = em_grid.integrate(&dust_shape);
                let emission = dust_shape.iter().map(|s| absorbed * s / dust_norm).collect();

                let geometry = GEOMETRIES.choose(&mut rng).copied().unwrap_or("disk");
                let metadata = BTreeMap::from([
                    ("geometry".to_string(), MetadataValue::String(geometry.to_string())),
                    ("run_id".to_string(), MetadataValue::String(format!("run-{run:04}"))),
                ]);

                SimulationSample {
                    params,
                    attenuation,
                    stellar,
                    emission,
                    metadata,
                }
            })
            .collect();

        Ok(SimulationSet::from_samples(
            PARAMETERS.iter().map(|(name, _, _)| name.to_string()).collect(),
            att_grid,
            em_grid,
            samples,
        ))
    }
}

/// Planck `B_λ(T)` up to a constant factor; `λ` in µm.
fn planck(lambda: f64, temperature: f64) -> f64 {
    lambda.powi(-5) / (HC_OVER_K / (lambda * temperature)).exp_m1()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small() -> SimulationSet {
        SyntheticConfig {
            n_samples: 12,
            n_att: 20,
            n_em: 15,
            ..SyntheticConfig::default()
        }
        .generate()
        .unwrap()
    }

    #[test]
    fn simulations_conserve_energy() {
        let set = small();
        assert_eq!(set.len(), 12);
        for sample in &set.samples {
            let absorbed = spectrum::absorbed_energy(&set.att_grid, &sample.stellar, &sample.attenuation);
            assert!(absorbed > 0.0);
            assert_relative_eq!(set.emitted_energy(sample), absorbed, max_relative = 1e-12);
            assert!(set.emitted_energy(sample) < set.stellar_energy(sample));
        }
    }

    #[test]
    fn parameters_stay_in_range() {
        let set = small();
        assert_eq!(set.param_names, vec!["tau_v", "delta", "t_dust"]);
        for sample in &set.samples {
            for (v, (_, lo, hi)) in sample.params.iter().zip(PARAMETERS) {
                assert!(*v >= lo && *v < hi);
            }
            assert!(sample.attenuation.iter().all(|a| *a > 0.0));
        }
        assert_eq!(set.column_names, vec!["geometry".to_string(), "run_id".to_string()]);
    }

    #[test]
    fn generation_is_seeded() {
        let a = small();
        let b = small();
        assert_eq!(a.samples[5].params, b.samples[5].params);
        assert_eq!(a.samples[5].emission, b.samples[5].emission);
        let c = SyntheticConfig {
            seed: 7,
            n_samples: 12,
            n_att: 20,
            n_em: 15,
            ..SyntheticConfig::default()
        }
        .generate()
        .unwrap();
        assert_ne!(a.samples[0].params, c.samples[0].params);
    }

    #[test]
    fn invalid_grid_is_reported() {
        let config = SyntheticConfig {
            n_att: 1,
            ..SyntheticConfig::default()
        };
        assert!(config.generate().is_err());
    }
}
