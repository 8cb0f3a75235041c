use std::collections::BTreeMap;

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use starduster::data::{MetadataValue, SimulationSample, SimulationSet};

// ---------------------------------------------------------------------------
// Colour sources
// ---------------------------------------------------------------------------

/// What a curve's colour encodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorBy {
    /// A metadata column, one colour per distinct value.
    Metadata(String),
    /// A physical parameter, by index, on a continuous ramp.
    Parameter(usize),
}

fn hsl_to_color32(hue: f32, saturation: f32, lightness: f32) -> Color32 {
    let rgb: Srgb = Hsl::new(hue, saturation, lightness).into_color();
    Color32::from_rgb(
        (rgb.red * 255.0) as u8,
        (rgb.green * 255.0) as u8,
        (rgb.blue * 255.0) as u8,
    )
}

/// `n` visually distinct colours with evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    (0..n)
        .map(|i| hsl_to_color32((i as f32 / n as f32) * 360.0, 0.75, 0.55))
        .collect()
}

/// Blue (t = 0) to red (t = 1); `t` is clamped.
pub fn ramp(t: f64) -> Color32 {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    hsl_to_color32(240.0 * (1.0 - t as f32), 0.8, 0.55)
}

// ---------------------------------------------------------------------------
// Colour mapping: sample → Color32
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Scale {
    Categorical(BTreeMap<MetadataValue, Color32>),
    Continuous { lo: f64, hi: f64 },
}

#[derive(Debug, Clone)]
pub struct ColorMap {
    by: ColorBy,
    scale: Scale,
}

impl ColorMap {
    pub fn new(set: &SimulationSet, by: ColorBy) -> Self {
        let scale = match &by {
            ColorBy::Metadata(column) => {
                let values = set.unique_values.get(column).cloned().unwrap_or_default();
                let palette = generate_palette(values.len());
                Scale::Categorical(values.into_iter().zip(palette).collect())
            }
            ColorBy::Parameter(k) => {
                let (lo, hi) = set.bounds().get(*k).copied().unwrap_or((0.0, 1.0));
                Scale::Continuous { lo, hi }
            }
        };
        Self { by, scale }
    }

    pub fn by(&self) -> &ColorBy {
        &self.by
    }

    /// Colour of one metadata value, if `column` is the one being coloured.
    pub fn value_color(&self, column: &str, value: &MetadataValue) -> Option<Color32> {
        match (&self.scale, &self.by) {
            (Scale::Categorical(mapping), ColorBy::Metadata(c)) if c == column => mapping.get(value).copied(),
            _ => None,
        }
    }

    pub fn color_for(&self, sample: &SimulationSample) -> Color32 {
        match (&self.scale, &self.by) {
            (Scale::Categorical(_), ColorBy::Metadata(column)) => sample
                .metadata
                .get(column)
                .and_then(|v| self.value_color(column, v))
                .unwrap_or(Color32::GRAY),
            (Scale::Continuous { lo, hi }, ColorBy::Parameter(k)) => sample
                .params
                .get(*k)
                .map_or(Color32::GRAY, |v| ramp((v - lo) / (hi - lo))),
            _ => Color32::GRAY,
        }
    }

    /// Legend text for a sample: the metadata value or the parameter value.
    pub fn label_for(&self, sample: &SimulationSample) -> Option<String> {
        match &self.by {
            ColorBy::Metadata(column) => sample.metadata.get(column).map(|v| v.to_string()),
            ColorBy::Parameter(k) => sample.params.get(*k).map(|v| format!("{v:.3}")),
        }
    }

    /// Legend entries (label → colour) for the side panel.
    pub fn legend_entries(&self) -> Vec<(String, Color32)> {
        match &self.scale {
            Scale::Categorical(mapping) => mapping.iter().map(|(v, c)| (v.to_string(), *c)).collect(),
            Scale::Continuous { lo, hi } => vec![(format!("{lo:.3}"), ramp(0.0)), (format!("{hi:.3}"), ramp(1.0))],
        }
    }
}
