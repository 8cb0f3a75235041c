//! Using a trained emulator: batch prediction, log-SEDs with gradients,
//! likelihoods, posteriors, and gradient-based fitting.

pub mod emulator;
pub mod error_func;
pub mod optimize;
pub mod posterior;

pub use emulator::{Emulator, MODEL_FORMAT_VERSION, SED_FLOOR};
pub use error_func::{ErrorFunction, ErrorModel, Gaussian, GaussianWithScatter, LikelihoodTerm};
pub use optimize::{optimize, OptimizeConfig, OptimizeResult};
pub use posterior::{InferenceState, Posterior, PosteriorConfig};
