use std::collections::BTreeSet;

use rayon::prelude::*;
use starduster::data::filter::{filtered_indices, init_filter_state, FilterState};
use starduster::data::{MetadataValue, SimulationSet, TableSchema};
use starduster::inference::Emulator;
use starduster::{ModelResult, Prediction};

use crate::color::{ColorBy, ColorMap};

/// Which curve family the central plot shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveKind {
    #[default]
    Attenuation,
    Emission,
}

/// Per-sample comparison of the emulator with its simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFit {
    /// RMS attenuation error, magnitudes.
    pub attenuation_rmse: f64,
    /// `(emitted_pred - emitted_sim) / emitted_sim`.
    pub emission_error: f64,
    pub balance_residual: f64,
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    /// Column names used when reading tables.
    pub schema: TableSchema,

    /// Loaded simulations (None until user loads a file).
    pub dataset: Option<SimulationSet>,

    /// Per-column filter selections.
    pub filters: FilterState,

    /// Indices of samples passing the current filters (cached).
    pub visible_indices: Vec<usize>,

    pub color_map: Option<ColorMap>,

    pub curve: CurveKind,
    pub log_y: bool,

    /// Loaded emulator, if any.
    pub emulator: Option<Emulator>,

    /// Slider values fed to the emulator.
    pub query: Vec<f64>,
    pub query_prediction: Option<Prediction>,

    /// Overlay the emulator's prediction for every visible sample.
    pub show_predictions: bool,
    /// Emulator predictions aligned with `dataset.samples`; empty when the
    /// emulator and dataset do not share parameters.
    pub sample_predictions: Vec<Prediction>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            schema: TableSchema::default(),
            dataset: None,
            filters: FilterState::default(),
            visible_indices: Vec::new(),
            color_map: None,
            curve: CurveKind::default(),
            log_y: false,
            emulator: None,
            query: Vec::new(),
            query_prediction: None,
            show_predictions: true,
            sample_predictions: Vec::new(),
            status_message: None,
        }
    }
}

impl AppState {
    /// Ingest a newly loaded dataset, initialise filters and colour.
    pub fn set_dataset(&mut self, dataset: SimulationSet) {
        self.filters = init_filter_state(&dataset);
        self.visible_indices = (0..dataset.len()).collect();

        // Default colour: first metadata column, else the first parameter.
        let by = dataset
            .column_names
            .first()
            .cloned()
            .map_or(ColorBy::Parameter(0), ColorBy::Metadata);
        self.color_map = Some(ColorMap::new(&dataset, by));

        self.dataset = Some(dataset);
        self.status_message = None;
        self.refresh_sample_predictions();
    }

    /// Install a new emulator and centre the sliders in its bounds.
    pub fn set_emulator(&mut self, emulator: Emulator) {
        self.query = emulator.bounds().iter().map(|(lo, hi)| 0.5 * (lo + hi)).collect();
        self.emulator = Some(emulator);
        self.status_message = None;
        self.update_query();
        self.refresh_sample_predictions();
    }

    pub fn set_query_value(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.query.get_mut(index) {
            *slot = value;
            self.update_query();
        }
    }

    fn update_query(&mut self) {
        self.query_prediction = match &self.emulator {
            Some(emu) => match emu.predict(&self.query) {
                Ok(p) => Some(p),
                Err(e) => {
                    self.status_message = Some(format!("Error: {e}"));
                    None
                }
            },
            None => None,
        };
    }

    /// Predict every sample of the dataset when the emulator shares its
    /// parameters and grids.
    pub fn refresh_sample_predictions(&mut self) {
        self.sample_predictions.clear();
        let (Some(ds), Some(emu)) = (&self.dataset, &self.emulator) else {
            return;
        };
        let model = emu.model();
        if model.param_names() != ds.param_names.as_slice()
            || model.att_grid() != &ds.att_grid
            || model.em_grid() != &ds.em_grid
        {
            log::warn!("Emulator and dataset do not match; predictions are not overlaid");
            self.status_message = Some("Emulator parameters or grids differ from the dataset".into());
            return;
        }
        // Each sample is predicted under its own stellar spectrum.
        let predictions: ModelResult<Vec<Prediction>> = ds
            .samples
            .par_iter()
            .map(|s| emu.predict_with_stellar(&s.params, &s.stellar))
            .collect();
        match predictions {
            Ok(p) => self.sample_predictions = p,
            Err(e) => {
                log::error!("Predicting the dataset failed: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    /// Comparison of the emulator with sample `index`, when predictions
    /// are available.
    pub fn sample_fit(&self, index: usize) -> Option<SampleFit> {
        let ds = self.dataset.as_ref()?;
        let sample = ds.samples.get(index)?;
        let pred = self.sample_predictions.get(index)?;
        let n = sample.attenuation.len().max(1) as f64;
        let mse = pred
            .attenuation
            .iter()
            .zip(&sample.attenuation)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            / n;
        let emitted_sim = ds.emitted_energy(sample);
        Some(SampleFit {
            attenuation_rmse: mse.sqrt(),
            emission_error: (pred.emitted - emitted_sim) / emitted_sim.max(f64::MIN_POSITIVE),
            balance_residual: pred.energy_balance_residual(),
        })
    }

    /// Recompute `visible_indices` after filter change.
    pub fn refilter(&mut self) {
        if let Some(ds) = &self.dataset {
            self.visible_indices = filtered_indices(ds, &self.filters);
        }
    }

    pub fn set_color_by(&mut self, by: ColorBy) {
        if let Some(ds) = &self.dataset {
            self.color_map = Some(ColorMap::new(ds, by));
        }
    }

    /// Select all values in a column.
    pub fn select_all(&mut self, column: &str) {
        if let Some(ds) = &self.dataset {
            if let Some(all_vals) = ds.unique_values.get(column) {
                self.filters.insert(column.to_string(), all_vals.clone());
                self.refilter();
            }
        }
    }

    /// Deselect all values in a column.
    pub fn select_none(&mut self, column: &str) {
        self.filters.insert(column.to_string(), BTreeSet::new());
        self.refilter();
    }

    /// Toggle a single metadata value in a column's filter.
    pub fn toggle_filter_value(&mut self, column: &str, value: &MetadataValue) {
        let selected = self.filters.entry(column.to_string()).or_default();
        if !selected.remove(value) {
            selected.insert(value.clone());
        }
        self.refilter();
    }
}
