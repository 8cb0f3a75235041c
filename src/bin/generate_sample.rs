//! Write a synthetic simulation table for trying out the viewer and trainer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use starduster::data::{write_parquet, TableSchema};
use starduster::synthetic::SyntheticConfig;

#[derive(Parser, Debug)]
#[command(name = "generate_sample", about = "Generate a synthetic dust RT table", long_about = None)]
struct Args {
    /// Number of simulated galaxies
    #[arg(short = 'n', long, default_value_t = 200)]
    samples: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output Parquet file
    #[arg(short, long, default_value = "sample_data.parquet")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = SyntheticConfig {
        n_samples: args.samples,
        seed: args.seed,
        ..SyntheticConfig::default()
    };
    let set = config.generate().context("building wavelength grids")?;
    write_parquet(&set, &args.out, &TableSchema::default())
        .with_context(|| format!("writing {}", args.out.display()))?;

    println!(
        "Wrote {} simulations ({} + {} wavelengths each) to {}",
        set.len(),
        set.att_grid.len(),
        set.em_grid.len(),
        args.out.display()
    );
    Ok(())
}
