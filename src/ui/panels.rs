use std::path::Path;

use eframe::egui::{self, Color32, RichText, ScrollArea, Slider, Ui};

use starduster::data::load_file;
use starduster::inference::Emulator;

use crate::color::ColorBy;
use crate::state::{AppState, CurveKind};

// ---------------------------------------------------------------------------
// Left side panel – colour and filter widgets
// ---------------------------------------------------------------------------

fn color_by_label(by: &ColorBy, param_names: &[String]) -> String {
    match by {
        ColorBy::Metadata(col) => col.clone(),
        ColorBy::Parameter(k) => param_names.get(*k).cloned().unwrap_or_else(|| format!("param {k}")),
    }
}

/// Render the left filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Simulations");
    ui.separator();

    let Some(dataset) = &state.dataset else {
        ui.label("No simulations loaded.");
        return;
    };

    // Cloned so the loop below can mutate `state`.
    let columns = dataset.column_names.clone();
    let unique = dataset.unique_values.clone();
    let param_names = dataset.param_names.clone();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            ui.strong("Color by");
            let current = state.color_map.as_ref().map(|m| m.by().clone());
            let current_text = current
                .as_ref()
                .map(|by| color_by_label(by, &param_names))
                .unwrap_or_default();
            let options = columns
                .iter()
                .cloned()
                .map(ColorBy::Metadata)
                .chain((0..param_names.len()).map(ColorBy::Parameter));
            egui::ComboBox::from_id_salt("color_by")
                .selected_text(current_text)
                .show_ui(ui, |ui: &mut Ui| {
                    for by in options {
                        let label = color_by_label(&by, &param_names);
                        if ui.selectable_label(current.as_ref() == Some(&by), label).clicked() {
                            state.set_color_by(by);
                        }
                    }
                });

            if let Some(cm) = &state.color_map {
                if matches!(cm.by(), ColorBy::Parameter(_)) {
                    ui.horizontal(|ui: &mut Ui| {
                        for (label, color) in cm.legend_entries() {
                            ui.label(RichText::new(label).color(color));
                        }
                    });
                }
            }
            ui.separator();

            for col in &columns {
                let Some(all_values) = unique.get(col) else {
                    continue;
                };
                let n_selected = state.filters.get(col).map_or(0, |s| s.len());
                let header_text = format!("{col}  ({n_selected}/{})", all_values.len());

                egui::CollapsingHeader::new(RichText::new(header_text).strong())
                    .id_salt(col)
                    .default_open(false)
                    .show(ui, |ui: &mut Ui| {
                        ui.horizontal(|ui: &mut Ui| {
                            if ui.small_button("All").clicked() {
                                state.select_all(col);
                            }
                            if ui.small_button("None").clicked() {
                                state.select_none(col);
                            }
                        });

                        for val in all_values {
                            let mut checked = state.filters.get(col).is_some_and(|s| s.contains(val));
                            let mut text = RichText::new(val.to_string());
                            if let Some(c) = state.color_map.as_ref().and_then(|cm| cm.value_color(col, val)) {
                                text = text.color(c);
                            }
                            if ui.checkbox(&mut checked, text).changed() {
                                state.toggle_filter_value(col, val);
                            }
                        }
                    });
            }
        });
}

// ---------------------------------------------------------------------------
// Right side panel – emulator query
// ---------------------------------------------------------------------------

/// Parameter sliders for the loaded emulator and its energy budget.
pub fn emulator_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Emulator");
    ui.separator();

    let Some(emu) = &state.emulator else {
        ui.label("No model loaded  (File → Open model…)");
        return;
    };
    let names = emu.param_names().to_vec();
    let bounds = emu.bounds().to_vec();
    let arch = emu.model().architecture();
    ui.label(format!(
        "hidden {:?}, {:?}, {} weights",
        arch.hidden,
        arch.activation,
        emu.model().n_weights()
    ));
    ui.separator();

    for (k, (name, (lo, hi))) in names.iter().zip(bounds).enumerate() {
        let mut value = state.query[k];
        if ui.add(Slider::new(&mut value, lo..=hi).text(name)).changed() {
            state.set_query_value(k, value);
        }
    }
    ui.separator();

    if let Some(p) = &state.query_prediction {
        egui::Grid::new("energy_budget").striped(true).show(ui, |ui: &mut Ui| {
            ui.label("Absorbed");
            ui.label(format!("{:.4e}", p.absorbed));
            ui.end_row();
            ui.label("Emitted");
            ui.label(format!("{:.4e}", p.emitted));
            ui.end_row();
            ui.label("Balance residual");
            ui.label(format!("{:.2e}", p.energy_balance_residual()));
            ui.end_row();
        });
    }

    ui.separator();
    ui.add_enabled(
        !state.sample_predictions.is_empty(),
        egui::Checkbox::new(&mut state.show_predictions, "Overlay predictions"),
    );
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open simulations…").clicked() {
                open_simulations_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open model…").clicked() {
                open_model_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(ds) = &state.dataset {
            ui.label(format!(
                "{} simulations loaded, {} visible",
                ds.len(),
                state.visible_indices.len()
            ));
            ui.separator();
        }

        for (kind, label) in [(CurveKind::Attenuation, "Attenuation"), (CurveKind::Emission, "Emission")] {
            if ui.selectable_label(state.curve == kind, label).clicked() {
                state.curve = kind;
            }
        }
        if ui.selectable_label(state.log_y, "Log y").clicked() {
            state.log_y = !state.log_y;
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_simulations_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open simulation table")
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        open_simulations(state, &path);
    }
}

pub fn open_model_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open trained emulator")
        .add_filter("Model", &["json"])
        .pick_file();

    if let Some(path) = file {
        open_model(state, &path);
    }
}

/// Load a simulation table into the state, reporting failures in the status bar.
pub fn open_simulations(state: &mut AppState, path: &Path) {
    match load_file(path, &state.schema) {
        Ok(dataset) => {
            log::info!(
                "Loaded {} simulations with parameters {:?}",
                dataset.len(),
                dataset.param_names
            );
            state.set_dataset(dataset);
        }
        Err(e) => {
            log::error!("Failed to load {}: {e}", path.display());
            state.status_message = Some(format!("Error: {e}"));
        }
    }
}

pub fn open_model(state: &mut AppState, path: &Path) {
    match Emulator::load(path) {
        Ok(emulator) => {
            log::info!("Loaded emulator for {:?}", emulator.param_names());
            state.set_emulator(emulator);
        }
        Err(e) => {
            log::error!("Failed to load model {}: {e}", path.display());
            state.status_message = Some(format!("Error: {e}"));
        }
    }
}
