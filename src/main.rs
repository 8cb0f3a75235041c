mod app;
mod color;
mod state;
mod ui;

use std::path::PathBuf;

use app::StardusterApp;
use clap::Parser;
use eframe::egui;

/// Desktop viewer for simulation tables and trained emulators.
#[derive(Parser, Debug)]
#[command(name = "starduster", long_about = None)]
struct Args {
    /// Simulation table to open at startup
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Trained model to open at startup
    #[arg(short, long)]
    model: Option<PathBuf>,
}

fn main() -> eframe::Result {
    env_logger::init();
    let args = Args::parse();

    let mut app = StardusterApp::default();
    if let Some(path) = &args.data {
        ui::panels::open_simulations(&mut app.state, path);
    }
    if let Some(path) = &args.model {
        ui::panels::open_model(&mut app.state, path);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 860.0])
            .with_min_inner_size([700.0, 450.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Starduster – Dust RT Emulator",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
}
