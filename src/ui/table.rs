use eframe::egui::{Color32, RichText, Ui};
use egui_extras::{Column, TableBuilder};

use crate::state::AppState;

/// Emulator-vs-simulation residuals for the visible samples.
pub fn fit_table(ui: &mut Ui, state: &AppState) {
    let Some(ds) = &state.dataset else {
        return;
    };
    let rows = &state.visible_indices;

    TableBuilder::new(ui)
        .striped(true)
        .resizable(true)
        .column(Column::auto().at_least(60.0))
        .column(Column::auto().at_least(100.0))
        .columns(Column::auto().at_least(110.0), 3)
        .column(Column::remainder())
        .header(20.0, |mut header| {
            for title in ["#", "label", "A rmse [mag]", "emission err", "balance", "parameters"] {
                header.col(|ui| {
                    ui.strong(title);
                });
            }
        })
        .body(|body| {
            body.rows(18.0, rows.len(), |mut row| {
                let idx = rows[row.index()];
                let sample = &ds.samples[idx];
                let fit = state.sample_fit(idx);
                let color = state
                    .color_map
                    .as_ref()
                    .map_or(Color32::GRAY, |cm| cm.color_for(sample));
                let label = state
                    .color_map
                    .as_ref()
                    .and_then(|cm| cm.label_for(sample))
                    .unwrap_or_default();

                row.col(|ui| {
                    ui.label(idx.to_string());
                });
                row.col(|ui| {
                    ui.label(RichText::new(label).color(color));
                });
                let cells = match &fit {
                    Some(f) => [
                        format!("{:.4}", f.attenuation_rmse),
                        format!("{:+.2}%", 100.0 * f.emission_error),
                        format!("{:.1e}", f.balance_residual),
                    ],
                    None => Default::default(),
                };
                for text in cells {
                    row.col(|ui| {
                        ui.label(text);
                    });
                }
                row.col(|ui| {
                    let params: Vec<String> = ds
                        .param_names
                        .iter()
                        .zip(&sample.params)
                        .map(|(n, v)| format!("{n}={v:.3}"))
                        .collect();
                    ui.label(params.join("  "));
                });
            });
        });
}
