//! Headless training: load a simulation table, fit an emulator, save it.
//!
//! Usage:
//! ```text
//! starduster-train --data sims.parquet [--config starduster.json] [--out model.json]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use starduster::data::load_file;
use starduster::{StardusterConfig, Trainer};

#[derive(Parser, Debug)]
#[command(
    name = "starduster-train",
    about = "Train a dust radiative-transfer emulator on a simulation table",
    long_about = None
)]
struct Args {
    /// Simulation table (.parquet, .json or .csv)
    #[arg(short, long)]
    data: PathBuf,

    /// JSON configuration (schema, architecture, training); defaults otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the trained model
    #[arg(short, long, default_value = "model.json")]
    out: PathBuf,

    /// Write the training report (JSON) here as well
    #[arg(long)]
    report: Option<PathBuf>,

    /// Override the epoch budget
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the Adam learning rate
    #[arg(long)]
    learning_rate: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StardusterConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => StardusterConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.train.seed = seed;
    }
    if let Some(lr) = args.learning_rate {
        config.train.optimizer.learning_rate = lr;
    }

    let set = load_file(&args.data, &config.schema)
        .with_context(|| format!("loading simulations from {}", args.data.display()))?;
    let trainer = Trainer::new(config.architecture.clone(), config.train.clone())
        .context("invalid training configuration")?;
    let (emulator, report) = trainer.fit(&set).context("training failed")?;

    emulator
        .save(&args.out)
        .with_context(|| format!("writing model to {}", args.out.display()))?;
    if let Some(path) = &args.report {
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).with_context(|| format!("writing report to {}", path.display()))?;
    }

    println!(
        "Trained for {} epochs ({}), kept epoch {}: train loss {:.4e}, validation loss {}",
        report.epochs_run,
        if report.converged { "converged" } else { "epoch budget reached" },
        report.best_epoch,
        report.final_train_loss,
        report
            .final_validation_loss
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4e}"))
    );
    println!("Model written to {}", args.out.display());
    Ok(())
}
