use eframe::egui::{Color32, Ui};
use egui_plot::{Legend, Line, LineStyle, Plot};

use starduster::inference::SED_FLOOR;
use starduster::{Prediction, WavelengthGrid};

use crate::state::{AppState, CurveKind};

// ---------------------------------------------------------------------------
// Curve plot (central panel)
// ---------------------------------------------------------------------------

fn points(grid: &WavelengthGrid, values: &[f64], log_y: bool) -> Vec<[f64; 2]> {
    grid.wavelengths()
        .iter()
        .zip(values)
        .map(|(&lam, &v)| {
            let y = if log_y { v.max(SED_FLOOR).log10() } else { v };
            [lam.log10(), y]
        })
        .collect()
}

/// The curve of `kind` from a prediction.
fn predicted<'a>(kind: CurveKind, p: &'a Prediction) -> &'a [f64] {
    match kind {
        CurveKind::Attenuation => &p.attenuation,
        CurveKind::Emission => &p.emission,
    }
}

/// Render the attenuation or emission curves of the visible samples.
pub fn curve_plot(ui: &mut Ui, state: &AppState) {
    let dataset = state.dataset.as_ref();
    let emulator = state.emulator.as_ref();
    if dataset.is_none() && emulator.is_none() {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open simulations or a model to view curves  (File → Open…)");
        });
        return;
    }

    let y_label = match (state.curve, state.log_y) {
        (CurveKind::Attenuation, false) => "A(λ) [mag]",
        (CurveKind::Attenuation, true) => "log10 A(λ)",
        (CurveKind::Emission, false) => "L_dust(λ)",
        (CurveKind::Emission, true) => "log10 L_dust(λ)",
    };

    Plot::new("curve_plot")
        .legend(Legend::default())
        .x_axis_label("log10 λ [µm]")
        .y_axis_label(y_label)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            if let Some(ds) = dataset {
                let grid = match state.curve {
                    CurveKind::Attenuation => &ds.att_grid,
                    CurveKind::Emission => &ds.em_grid,
                };
                for &idx in &state.visible_indices {
                    let sample = &ds.samples[idx];
                    let color = state
                        .color_map
                        .as_ref()
                        .map_or(Color32::LIGHT_BLUE, |cm| cm.color_for(sample));
                    let name = state
                        .color_map
                        .as_ref()
                        .and_then(|cm| cm.label_for(sample))
                        .unwrap_or_else(|| format!("simulation {idx}"));

                    let values = match state.curve {
                        CurveKind::Attenuation => &sample.attenuation,
                        CurveKind::Emission => &sample.emission,
                    };
                    plot_ui.line(
                        Line::new(points(grid, values, state.log_y))
                            .name(&name)
                            .color(color)
                            .width(1.5),
                    );

                    if state.show_predictions {
                        if let Some(p) = state.sample_predictions.get(idx) {
                            plot_ui.line(
                                Line::new(points(grid, predicted(state.curve, p), state.log_y))
                                    .name(&name)
                                    .color(color)
                                    .width(1.0)
                                    .style(LineStyle::dashed_loose()),
                            );
                        }
                    }
                }
            }

            if let (Some(emu), Some(p)) = (emulator, &state.query_prediction) {
                let grid = match state.curve {
                    CurveKind::Attenuation => emu.model().att_grid(),
                    CurveKind::Emission => emu.model().em_grid(),
                };
                plot_ui.line(
                    Line::new(points(grid, predicted(state.curve, p), state.log_y))
                        .name("emulator")
                        .color(Color32::WHITE)
                        .width(2.5),
                );
            }
        });
}
