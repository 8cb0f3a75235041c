/// Neural surrogate for the radiative-transfer simulation.
///
/// ```text
///  params ──► normalise ──► trunk (Dense + activation)* ──┬─► att head ─ softplus ─► A(λ)
///                                                         │                          │
///                                                         │             L_abs = Σ w L* (1 - 10^(-0.4 A))
///                                                         │                          │
///                                                         └─► em head ─ softmax ──► p ─┴─► E = L_abs p / w
/// ```
///
/// `layers` holds the dense building blocks, `model` the network and its
/// reverse pass, `loss` the training objective, `optim` the optimiser.

pub mod layers;
pub mod loss;
pub mod model;
pub mod optim;

pub use layers::Activation;
pub use loss::{sample_loss, LossBreakdown, LossWeights};
pub use model::{Architecture, Cotangent, ForwardPass, Gradients, Prediction, SurrogateModel};
pub use optim::{Adam, AdamConfig};

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::spectrum::WavelengthGrid;

    /// Small three-parameter model on short grids.
    pub fn toy_model(seed: u64) -> SurrogateModel {
        toy_model_with(
            Architecture {
                hidden: vec![6, 5],
                activation: Activation::Tanh,
            },
            seed,
        )
    }

    /// The toy problem with a chosen network shape.
    pub fn toy_model_with(architecture: Architecture, seed: u64) -> SurrogateModel {
        SurrogateModel::new(
            architecture,
            vec!["tau".into(), "incl".into(), "t_dust".into()],
            vec![(0.0, 2.0), (0.0, 90.0), (15.0, 60.0)],
            WavelengthGrid::log_spaced(0.1, 3.0, 7).unwrap(),
            WavelengthGrid::log_spaced(5.0, 500.0, 6).unwrap(),
            vec![5.0, 4.0, 3.5, 3.0, 2.0, 1.0, 0.5],
            seed,
        )
        .unwrap()
    }
}
