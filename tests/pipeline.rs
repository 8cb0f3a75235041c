//! End to end: synthetic table → Parquet → training → saved emulator → fit.

use starduster::data::{load_file, write_parquet, TableSchema};
use starduster::inference::{optimize, Gaussian, OptimizeConfig};
use starduster::surrogate::AdamConfig;
use starduster::synthetic::SyntheticConfig;
use starduster::train::mean_loss;
use starduster::{Architecture, Emulator, Posterior, PosteriorConfig, TrainConfig, Trainer};

fn trainer(seed: u64) -> Trainer {
    Trainer::new(
        Architecture {
            hidden: vec![8],
            ..Architecture::default()
        },
        TrainConfig {
            epochs: 30,
            batch_size: 8,
            patience: 100,
            seed,
            optimizer: AdamConfig::with_learning_rate(1e-2),
            ..TrainConfig::default()
        },
    )
    .unwrap()
}

fn table() -> (tempfile::TempDir, std::path::PathBuf) {
    let set = SyntheticConfig {
        n_samples: 40,
        n_att: 12,
        n_em: 10,
        ..SyntheticConfig::default()
    }
    .generate()
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sims.parquet");
    write_parquet(&set, &path, &TableSchema::default()).unwrap();
    (dir, path)
}

#[test]
fn train_save_load_and_fit() {
    let (dir, path) = table();
    let set = load_file(&path, &TableSchema::default()).unwrap();
    assert_eq!(set.len(), 40);
    assert_eq!(set.param_names, ["tau_v", "delta", "t_dust"]);

    let (emulator, report) = trainer(7).fit(&set).unwrap();
    assert_eq!(report.epochs_run, 30);
    let first = report.history[0].validation.unwrap();
    assert!(report.best_validation_loss.unwrap() <= first);

    // The kept weights are the ones the report describes.
    let weights = TrainConfig::default().weights;
    let loss = mean_loss(emulator.model(), &set, &weights).unwrap();
    assert!(loss.total.is_finite());

    // Energy is conserved for every simulation, whatever the fit quality.
    for sample in &set.samples {
        let p = emulator.predict_with_stellar(&sample.params, &sample.stellar).unwrap();
        assert!(p.absorbed >= 0.0);
        assert!(p.energy_balance_residual() < 1e-9);
        assert!(p.attenuation.iter().all(|a| *a >= 0.0));
    }

    let model_path = dir.path().join("model.json");
    emulator.save(&model_path).unwrap();
    let reloaded = Emulator::load(&model_path).unwrap();
    let x = &set.samples[3].params;
    assert_eq!(reloaded.predict(x).unwrap(), emulator.predict(x).unwrap());
    assert_eq!(reloaded.log_sed(x).unwrap(), emulator.log_sed(x).unwrap());
}

#[test]
fn training_is_reproducible() {
    let (_dir, path) = table();
    let set = load_file(&path, &TableSchema::default()).unwrap();
    let (a, report_a) = trainer(3).fit(&set).unwrap();
    let (b, report_b) = trainer(3).fit(&set).unwrap();
    assert_eq!(report_a, report_b);
    let x = &set.samples[0].params;
    assert_eq!(a.predict(x).unwrap(), b.predict(x).unwrap());
}

#[test]
fn posterior_recovers_a_synthetic_observation() {
    let (_dir, path) = table();
    let set = load_file(&path, &TableSchema::default()).unwrap();
    let (emulator, _) = trainer(11).fit(&set).unwrap();

    let x0: Vec<f64> = emulator.bounds().iter().map(|(lo, hi)| 0.5 * (lo + hi)).collect();
    let x_true: Vec<f64> = emulator
        .bounds()
        .iter()
        .map(|(lo, hi)| lo + 0.7 * (hi - lo))
        .collect();
    let y_obs = emulator.log_sed(&x_true).unwrap();
    let y_err = vec![0.1; y_obs.len()];
    let gaussian = Gaussian::new(y_obs, y_err, false).unwrap();

    let posterior = Posterior::new(emulator.clone(), gaussian.clone()).unwrap();
    assert!(posterior.evaluate(&x_true).unwrap() >= posterior.evaluate(&x0).unwrap());
    assert!(posterior.evaluate(&x_true).unwrap().abs() < 1e-12);

    let minimising = Posterior::new(emulator, gaussian).unwrap().with_config(PosteriorConfig {
        negative: true,
        log_out: 0.0,
    });
    let result = optimize(
        &minimising,
        &x0,
        &OptimizeConfig {
            n_step: 60,
            learning_rate: 1e-3,
            log_every: 0,
        },
    )
    .unwrap();
    assert_eq!(result.history.len(), 60);
    assert!(result.loss <= result.history[0]);
}
