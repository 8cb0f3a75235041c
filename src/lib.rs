//! Starduster: a trainable emulator for dust radiative-transfer simulations.
//!
//! The emulator maps galaxy parameters to a dust attenuation curve and a
//! dust emission curve, and re-emits exactly the energy the attenuation
//! removes from the stellar spectrum.
//!
//! * [`data`] loads and validates simulation tables
//! * [`surrogate`] is the network and its reverse pass
//! * [`train`] fits a surrogate to a table
//! * [`inference`] evaluates a frozen emulator, builds posteriors and fits
//!   observations

pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod spectrum;
pub mod surrogate;
pub mod synthetic;
pub mod train;

pub use config::StardusterConfig;
pub use error::{FormatError, ModelError, ModelResult};
pub use inference::{Emulator, Posterior, PosteriorConfig};
pub use spectrum::WavelengthGrid;
pub use surrogate::{Architecture, Prediction, SurrogateModel};
pub use train::{TrainConfig, TrainReport, Trainer};
