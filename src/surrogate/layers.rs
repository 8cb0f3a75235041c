use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Hidden-layer nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Tanh,
    Relu,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
        }
    }

    /// Derivative expressed through the activation's output `y`.
    pub fn derivative_from_output(self, y: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - y * y,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Fully-connected layer `y = W x + b` with `W` stored `(outputs, inputs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Dense {
    /// Xavier-uniform weights, zero bias.
    pub fn xavier<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let weight = Array2::from_shape_simple_fn((outputs, inputs), || rng.gen_range(-limit..limit));
        Self {
            weight,
            bias: Array1::zeros(outputs),
        }
    }

    /// A zero layer of the same shape, used as a gradient accumulator.
    pub fn zeros_like(&self) -> Self {
        Self {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        self.weight.dot(&input) + &self.bias
    }

    /// Propagate `grad_output` back to the input. When `accum` is given, the
    /// parameter gradients are added to it.
    pub fn backward(
        &self,
        input: ArrayView1<f64>,
        grad_output: ArrayView1<f64>,
        accum: Option<&mut Dense>,
    ) -> Array1<f64> {
        if let Some(acc) = accum {
            let col = grad_output.insert_axis(Axis(1));
            let row = input.insert_axis(Axis(0));
            acc.weight.scaled_add(1.0, &col.dot(&row));
            acc.bias.scaled_add(1.0, &grad_output);
        }
        self.weight.t().dot(&grad_output)
    }

    /// Elementwise `self += scale * other`.
    pub fn add_scaled(&mut self, other: &Dense, scale: f64) {
        self.weight.scaled_add(scale, &other.weight);
        self.bias.scaled_add(scale, &other.bias);
    }
}

/// `ln(1 + e^x)` without overflow.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-softmax, shifted by the maximum for stability.
pub fn log_softmax(z: &Array1<f64>) -> Array1<f64> {
    let max = z.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let log_norm = z.fold(0.0, |acc, &v| acc + (v - max).exp()).ln() + max;
    z.mapv(|v| v - log_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn forward_matches_manual() {
        let layer = Dense {
            weight: array![[1.0, 2.0], [0.5, -1.0], [0.0, 3.0]],
            bias: array![0.5, 0.25, -1.0],
        };
        let y = layer.forward(array![1.0, -1.0].view());
        assert_eq!(y, array![-0.5, 1.75, -4.0]);
    }

    #[test]
    fn backward_accumulates_outer_product() {
        let layer = Dense {
            weight: array![[1.0, 2.0], [0.5, -1.0]],
            bias: array![0.0, 0.0],
        };
        let mut acc = layer.zeros_like();
        let x = array![3.0, 4.0];
        let g = array![1.0, -2.0];
        let gx = layer.backward(x.view(), g.view(), Some(&mut acc));
        assert_eq!(acc.weight, array![[3.0, 4.0], [-6.0, -8.0]]);
        assert_eq!(acc.bias, g);
        // Wᵀ g
        assert_eq!(gx, array![0.0, 4.0]);
    }

    #[test]
    fn xavier_is_seeded() {
        let a = Dense::xavier(4, 3, &mut StdRng::seed_from_u64(1));
        let b = Dense::xavier(4, 3, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        let limit = (6.0f64 / 7.0).sqrt();
        assert!(a.weight.iter().all(|w| w.abs() < limit));
    }

    #[test]
    fn stable_scalar_functions() {
        assert_relative_eq!(softplus(0.0), 2f64.ln(), epsilon = 1e-15);
        assert_relative_eq!(softplus(800.0), 800.0);
        assert!(softplus(-800.0) >= 0.0);
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-800.0).is_finite());

        let lp = log_softmax(&array![1000.0, 1000.0]);
        assert_relative_eq!(lp[0], -(2f64.ln()), epsilon = 1e-12);
        let total: f64 = log_softmax(&array![0.3, -2.0, 5.0]).mapv(f64::exp).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }
}
