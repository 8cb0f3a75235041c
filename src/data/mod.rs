/// Data layer: simulation tables, validation, and metadata filtering.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → raw rows → validate against TableSchema
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ SimulationSet │  shared grids, Vec<SimulationSample>, metadata index
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  metadata predicates → sample indices
///   └──────────┘
///
///   writer: SimulationSet → .parquet (same layout the loader reads)
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod writer;

pub use loader::{load_file, TableSchema};
pub use model::{MetadataValue, SimulationSample, SimulationSet};
pub use writer::write_parquet;
