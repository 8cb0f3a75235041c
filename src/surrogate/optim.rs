use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ModelError::InvalidConfig(
                "learning_rate must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(ModelError::InvalidConfig(
                "Adam betas must lie in [0, 1)".into(),
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(ModelError::InvalidConfig("epsilon must be positive".into()));
        }
        Ok(())
    }
}

/// Adam with bias-corrected moments. Moment buffers are created on the
/// first step from the shapes of the tensors passed in; later steps must
/// pass tensors in the same order and shapes.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    step: u64,
    first: Vec<ArrayD<f64>>,
    second: Vec<ArrayD<f64>>,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            step: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Move each parameter against its gradient.
    pub fn step(
        &mut self,
        params: Vec<ArrayViewMutD<'_, f64>>,
        grads: Vec<ArrayViewD<'_, f64>>,
    ) -> ModelResult<()> {
        if params.len() != grads.len() {
            return Err(ModelError::shape("gradient tensors", params.len(), grads.len()));
        }
        // All shapes are checked before any state changes.
        let fresh = self.first.is_empty();
        if !fresh && self.first.len() != params.len() {
            return Err(ModelError::shape("optimizer state", self.first.len(), params.len()));
        }
        for (k, (p, g)) in params.iter().zip(&grads).enumerate() {
            if p.shape() != g.shape() {
                return Err(ModelError::shape("gradient tensor", p.len(), g.len()));
            }
            if !fresh && self.first[k].shape() != p.shape() {
                return Err(ModelError::shape("optimizer state", self.first[k].len(), p.len()));
            }
        }
        if fresh {
            self.first = params.iter().map(|p| ArrayD::zeros(p.raw_dim())).collect();
            self.second = self.first.clone();
        }

        self.step += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let t = self.step as i32;
        let correction1 = 1.0 - beta1.powi(t);
        let correction2 = 1.0 - beta2.powi(t);

        for (((mut p, g), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(&mut self.first)
            .zip(&mut self.second)
        {
            Zip::from(&mut p)
                .and(&g)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / correction1;
                    let v_hat = *v / correction2;
                    *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, ArrayView1, ArrayViewMut1};

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(AdamConfig::with_learning_rate(0.1));
        let mut x = vec![1.0, -2.0];
        let g = vec![4.0, -0.5];
        adam.step(
            vec![ArrayViewMut1::from(x.as_mut_slice()).into_dyn()],
            vec![ArrayView1::from(g.as_slice()).into_dyn()],
        )
        .unwrap();
        // bias-corrected first step is lr * sign(g)
        assert_relative_eq!(x[0], 0.9, epsilon = 1e-6);
        assert_relative_eq!(x[1], -1.9, epsilon = 1e-6);
        assert_eq!(adam.steps_taken(), 1);
    }

    #[test]
    fn minimises_a_quadratic() {
        let mut adam = Adam::new(AdamConfig::with_learning_rate(0.05));
        let mut x = array![3.0, -1.5];
        for _ in 0..2000 {
            let g = x.mapv(|v| 2.0 * v);
            adam.step(vec![x.view_mut().into_dyn()], vec![g.view().into_dyn()])
                .unwrap();
        }
        assert!(x.iter().all(|v| v.abs() < 1e-2));
    }

    #[test]
    fn shape_changes_are_errors() {
        let mut adam = Adam::new(AdamConfig::default());
        let mut a = array![1.0, 2.0];
        let g = array![0.1, 0.1];
        adam.step(vec![a.view_mut().into_dyn()], vec![g.view().into_dyn()])
            .unwrap();
        let mut b = array![1.0, 2.0, 3.0];
        let gb = array![0.1, 0.1, 0.1];
        assert!(adam
            .step(vec![b.view_mut().into_dyn()], vec![gb.view().into_dyn()])
            .is_err());
        assert!(adam.step(vec![a.view_mut().into_dyn()], vec![]).is_err());
    }

    #[test]
    fn rejected_step_leaves_everything_untouched() {
        let mut adam = Adam::new(AdamConfig::with_learning_rate(0.1));
        let mut a = array![1.0, 2.0];
        let mut b = array![3.0];
        let ga = array![0.5, 0.5];
        let gb = array![0.5, 0.5];
        assert!(adam
            .step(
                vec![a.view_mut().into_dyn(), b.view_mut().into_dyn()],
                vec![ga.view().into_dyn(), gb.view().into_dyn()],
            )
            .is_err());
        assert_eq!(a, array![1.0, 2.0]);
        assert_eq!(b, array![3.0]);
        assert_eq!(adam.steps_taken(), 0);

        // The first successful step still sees fresh moments.
        let gb = array![0.5];
        adam.step(
            vec![a.view_mut().into_dyn(), b.view_mut().into_dyn()],
            vec![ga.view().into_dyn(), gb.view().into_dyn()],
        )
        .unwrap();
        assert_relative_eq!(a[0], 0.9, epsilon = 1e-6);
        assert_relative_eq!(b[0], 2.9, epsilon = 1e-6);
        assert_eq!(adam.steps_taken(), 1);

        let gb = array![0.5, 0.5];
        assert!(adam
            .step(
                vec![a.view_mut().into_dyn(), b.view_mut().into_dyn()],
                vec![ga.view().into_dyn(), gb.view().into_dyn()],
            )
            .is_err());
        assert_relative_eq!(a[0], 0.9, epsilon = 1e-6);
        assert_eq!(adam.steps_taken(), 1);
    }

    #[test]
    fn config_validation() {
        assert!(AdamConfig::default().validate().is_ok());
        assert!(AdamConfig::with_learning_rate(0.0).validate().is_err());
        assert!(AdamConfig {
            beta1: 1.0,
            ..AdamConfig::default()
        }
        .validate()
        .is_err());
    }
}
