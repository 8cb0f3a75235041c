use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::spectrum::WavelengthGrid;

// ---------------------------------------------------------------------------
// MetadataValue – a non-parameter scalar attached to a sample
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (run label, geometry tag, seed, ...).
/// Downstream code keys `BTreeMap` / `BTreeSet` on it, so it must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn rank(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Numeric view used when a scalar column is promoted to a parameter.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SimulationSample – one radiative-transfer run
// ---------------------------------------------------------------------------

/// Inputs and outputs of a single radiative-transfer run.
#[derive(Debug, Clone)]
pub struct SimulationSample {
    /// Physical parameters, ordered like [`SimulationSet::param_names`].
    pub params: Vec<f64>,
    /// Attenuation `A(λ)` in magnitudes on the attenuation grid.
    pub attenuation: Vec<f64>,
    /// Intrinsic stellar luminosity density on the attenuation grid.
    pub stellar: Vec<f64>,
    /// Dust emission luminosity density on the emission grid.
    pub emission: Vec<f64>,
    /// Remaining scalar columns.
    pub metadata: BTreeMap<String, MetadataValue>,
}

// ---------------------------------------------------------------------------
// SimulationSet – the complete loaded table
// ---------------------------------------------------------------------------

/// A validated table of simulation samples sharing two wavelength grids.
#[derive(Debug, Clone)]
pub struct SimulationSet {
    pub param_names: Vec<String>,
    pub att_grid: WavelengthGrid,
    pub em_grid: WavelengthGrid,
    pub samples: Vec<SimulationSample>,
    /// Ordered list of metadata column names.
    pub column_names: Vec<String>,
    /// For each metadata column the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl SimulationSet {
    /// Build the metadata index. Callers are expected to have validated the
    /// curve lengths against the grids (the loader does).
    pub fn from_samples(
        param_names: Vec<String>,
        att_grid: WavelengthGrid,
        em_grid: WavelengthGrid,
        samples: Vec<SimulationSample>,
    ) -> Self {
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();
        for sample in &samples {
            for (col, val) in &sample.metadata {
                unique_values
                    .entry(col.clone())
                    .or_default()
                    .insert(val.clone());
            }
        }
        let column_names = unique_values.keys().cloned().collect();
        SimulationSet {
            param_names,
            att_grid,
            em_grid,
            samples,
            column_names,
            unique_values,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    /// Per-parameter `(min, max)` over all samples. A constant parameter
    /// is padded by half its magnitude (at least 0.5) on each side so
    /// normalisation stays finite.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        (0..self.n_params())
            .map(|k| {
                let (lo, hi) = self.samples.iter().map(|s| s.params[k]).fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), v| (lo.min(v), hi.max(v)),
                );
                if hi - lo > f64::EPSILON * hi.abs().max(1.0) {
                    (lo, hi)
                } else {
                    let pad = 0.5 * hi.abs().max(1.0);
                    (lo - pad, hi + pad)
                }
            })
            .collect()
    }

    /// Energy re-emitted by dust in a sample, `∫ E dλ`.
    pub fn emitted_energy(&self, sample: &SimulationSample) -> f64 {
        self.em_grid.integrate(&sample.emission)
    }

    /// Intrinsic stellar energy of a sample, `∫ L* dλ`.
    pub fn stellar_energy(&self, sample: &SimulationSample) -> f64 {
        self.att_grid.integrate(&sample.stellar)
    }

    /// A new set holding the samples at `indices` (in that order).
    pub fn subset(&self, indices: &[usize]) -> SimulationSet {
        let samples = indices
            .iter()
            .filter_map(|&i| self.samples.get(i).cloned())
            .collect();
        SimulationSet::from_samples(
            self.param_names.clone(),
            self.att_grid.clone(),
            self.em_grid.clone(),
            samples,
        )
    }

    /// Shuffle with `seed` and split off `validation_fraction` of the
    /// samples. Returns `(train, validation)`; validation may be empty.
    pub fn split(&self, validation_fraction: f64, seed: u64) -> (SimulationSet, SimulationSet) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let n_val = ((self.len() as f64) * validation_fraction.clamp(0.0, 1.0)).round() as usize;
        let n_val = n_val.min(self.len().saturating_sub(1));
        let (val, train) = order.split_at(n_val);
        (self.subset(train), self.subset(val))
    }
}
