use eframe::egui;

use crate::state::AppState;
use crate::ui::{panels, plot, table};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StardusterApp {
    pub state: AppState,
}

impl eframe::App for StardusterApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        egui::SidePanel::left("filter_panel")
            .default_width(220.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        egui::SidePanel::right("emulator_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::emulator_panel(ui, &mut self.state);
            });

        // Residual table only once there is something to compare.
        if !self.state.sample_predictions.is_empty() {
            egui::TopBottomPanel::bottom("fit_table")
                .default_height(180.0)
                .resizable(true)
                .show(ctx, |ui| {
                    table::fit_table(ui, &self.state);
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            plot::curve_plot(ui, &self.state);
        });
    }
}
