use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Table format errors (data layer)
// ---------------------------------------------------------------------------

/// Raised when a simulation table cannot be turned into a [`SimulationSet`].
///
/// [`SimulationSet`]: crate::data::model::SimulationSet
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported file extension: .{0}")]
    UnsupportedExtension(String),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parsing CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("reading parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("decoding arrow data: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("expected a top-level array of records")]
    NotARecordArray,

    #[error("row {row}: missing column '{column}'")]
    MissingColumn { row: usize, column: String },

    #[error("row {row}, {column}[{index}]: '{value}' is not a number")]
    NotANumber {
        row: usize,
        column: String,
        index: usize,
        value: String,
    },

    #[error("row {row}, {column}[{index}]: value is not finite")]
    NonFinite {
        row: usize,
        column: String,
        index: usize,
    },

    #[error("row {row}, {column}[{index}]: negative luminosity {value}")]
    NegativeLuminosity {
        row: usize,
        column: String,
        index: usize,
        value: f64,
    },

    #[error("row {row}: '{column}' has {found} values but its grid has {expected}")]
    DimensionMismatch {
        row: usize,
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("row {row}: wavelength grid '{column}' differs from the first row")]
    GridMismatch { row: usize, column: String },

    #[error("wavelength grid '{column}' must be positive and strictly increasing")]
    InvalidGrid { column: String },

    #[error("row {row}: parameter '{column}' is not numeric")]
    InvalidParameter { row: usize, column: String },

    #[error("no parameter columns found")]
    NoParameters,

    #[error("table contains no samples")]
    Empty,
}

// ---------------------------------------------------------------------------
// Model errors (surrogate, training, inference)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{what}: expected {expected} values, got {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("non-finite loss at iteration {iteration}")]
    Diverged { iteration: usize },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing model: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported model file version {found} (expected {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },
}

impl ModelError {
    /// Shorthand for a length check failure.
    pub fn shape(what: &'static str, expected: usize, found: usize) -> Self {
        ModelError::ShapeMismatch {
            what,
            expected,
            found,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
