use ndarray::{Array1, ArrayView1, ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::layers::{log_softmax, sigmoid, softplus, Activation, Dense};
use crate::data::model::SimulationSet;
use crate::error::{ModelError, ModelResult};
use crate::spectrum::{self, WavelengthGrid, MAG_TO_LN};

// ---------------------------------------------------------------------------
// Architecture
// ---------------------------------------------------------------------------

/// Shape of the network: trunk widths and the trunk nonlinearity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Architecture {
    pub hidden: Vec<usize>,
    pub activation: Activation,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            hidden: vec![64, 64],
            activation: Activation::Tanh,
        }
    }
}

impl Architecture {
    pub fn validate(&self) -> ModelResult<()> {
        if self.hidden.is_empty() {
            return Err(ModelError::InvalidConfig(
                "at least one hidden layer is required".into(),
            ));
        }
        if self.hidden.contains(&0) {
            return Err(ModelError::InvalidConfig(
                "hidden layer widths must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Output of one emulator evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// `A(λ)` in magnitudes on the attenuation grid.
    pub attenuation: Vec<f64>,
    /// Dust emission luminosity density on the emission grid.
    pub emission: Vec<f64>,
    /// Stellar energy removed by the attenuation curve.
    pub absorbed: f64,
    /// `∫ E dλ` of the emission curve.
    pub emitted: f64,
}

impl Prediction {
    /// `|emitted - absorbed|` relative to the absorbed energy.
    pub fn energy_balance_residual(&self) -> f64 {
        (self.emitted - self.absorbed).abs() / self.absorbed.abs().max(f64::MIN_POSITIVE)
    }
}

// ---------------------------------------------------------------------------
// Forward pass cache and cotangents
// ---------------------------------------------------------------------------

/// Intermediates of a forward evaluation, kept for the reverse pass.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Trunk activations; `activations[0]` is the normalised input.
    activations: Vec<Array1<f64>>,
    att_pre: Array1<f64>,
    pub attenuation: Array1<f64>,
    pub transmission: Array1<f64>,
    pub log_fractions: Array1<f64>,
    pub fractions: Array1<f64>,
    pub stellar: Vec<f64>,
    pub absorbed: f64,
    pub emission: Array1<f64>,
}

impl ForwardPass {
    /// Attenuated starlight `L*(λ) T(λ)` on the attenuation grid.
    pub fn attenuated_stellar(&self) -> Vec<f64> {
        self.stellar
            .iter()
            .zip(&self.transmission)
            .map(|(l, t)| l * t)
            .collect()
    }
}

/// Derivatives of a scalar objective with respect to the model outputs.
///
/// `logits` is a direct cotangent on the emission-head output; it lets a
/// loss on the energy fractions skip the `1/p` factor of a cotangent on
/// `fractions`.
#[derive(Debug, Clone, Default)]
pub struct Cotangent {
    pub attenuation: Option<Array1<f64>>,
    pub emission: Option<Array1<f64>>,
    pub absorbed: f64,
    pub logits: Option<Array1<f64>>,
}

/// Parameter gradients, laid out like the model's layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub trunk: Vec<Dense>,
    pub att_head: Dense,
    pub em_head: Dense,
}

impl Gradients {
    /// Elementwise `self += scale * other`.
    pub fn add_scaled(&mut self, other: &Gradients, scale: f64) {
        for (a, b) in self.trunk.iter_mut().zip(&other.trunk) {
            a.add_scaled(b, scale);
        }
        self.att_head.add_scaled(&other.att_head, scale);
        self.em_head.add_scaled(&other.em_head, scale);
    }

    /// Views in the same order as [`SurrogateModel::tensors_mut`].
    pub fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        self.trunk
            .iter()
            .chain([&self.att_head, &self.em_head])
            .flat_map(|d| [d.weight.view().into_dyn(), d.bias.view().into_dyn()])
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SurrogateModel
// ---------------------------------------------------------------------------

/// Neural emulator mapping physical parameters to attenuation and emission.
///
/// Energy balance is structural: the emission head only predicts how the
/// absorbed energy is distributed in wavelength (a softmax over emission
/// bins), and the amplitude is the absorbed energy itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateModel {
    architecture: Architecture,
    param_names: Vec<String>,
    bounds: Vec<(f64, f64)>,
    att_grid: WavelengthGrid,
    em_grid: WavelengthGrid,
    /// Default intrinsic stellar spectrum on the attenuation grid.
    stellar: Vec<f64>,
    trunk: Vec<Dense>,
    att_head: Dense,
    em_head: Dense,
}

impl SurrogateModel {
    pub fn new(
        architecture: Architecture,
        param_names: Vec<String>,
        bounds: Vec<(f64, f64)>,
        att_grid: WavelengthGrid,
        em_grid: WavelengthGrid,
        stellar: Vec<f64>,
        seed: u64,
    ) -> ModelResult<Self> {
        architecture.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut width = param_names.len();
        let mut trunk = Vec::with_capacity(architecture.hidden.len());
        for &h in &architecture.hidden {
            trunk.push(Dense::xavier(width, h, &mut rng));
            width = h;
        }
        let att_head = Dense::xavier(width, att_grid.len(), &mut rng);
        let em_head = Dense::xavier(width, em_grid.len(), &mut rng);

        let model = Self {
            architecture,
            param_names,
            bounds,
            att_grid,
            em_grid,
            stellar,
            trunk,
            att_head,
            em_head,
        };
        model.validate()?;
        Ok(model)
    }

    /// Fresh model shaped for `set`: bounds from the data, the mean stellar
    /// spectrum as the default template.
    pub fn for_set(set: &SimulationSet, architecture: Architecture, seed: u64) -> ModelResult<Self> {
        if set.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let mut stellar = vec![0.0; set.att_grid.len()];
        for sample in &set.samples {
            for (acc, v) in stellar.iter_mut().zip(&sample.stellar) {
                *acc += v;
            }
        }
        let n = set.len() as f64;
        stellar.iter_mut().for_each(|v| *v /= n);

        Self::new(
            architecture,
            set.param_names.clone(),
            set.bounds(),
            set.att_grid.clone(),
            set.em_grid.clone(),
            stellar,
            seed,
        )
    }

    /// Check the internal consistency of a model (also run after loading).
    pub fn validate(&self) -> ModelResult<()> {
        self.architecture.validate()?;
        let n = self.param_names.len();
        if n == 0 {
            return Err(ModelError::InvalidConfig("model has no input parameters".into()));
        }
        if self.bounds.len() != n {
            return Err(ModelError::shape("parameter bounds", n, self.bounds.len()));
        }
        if self.bounds.iter().any(|(lo, hi)| !(hi > lo) || !lo.is_finite() || !hi.is_finite()) {
            return Err(ModelError::InvalidConfig(
                "parameter bounds must be finite with lower < upper".into(),
            ));
        }
        if self.stellar.len() != self.att_grid.len() {
            return Err(ModelError::shape("stellar template", self.att_grid.len(), self.stellar.len()));
        }
        if self.stellar.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ModelError::InvalidConfig(
                "stellar template must be finite and non-negative".into(),
            ));
        }
        if self.trunk.len() != self.architecture.hidden.len() {
            return Err(ModelError::shape("trunk layers", self.architecture.hidden.len(), self.trunk.len()));
        }
        let mut width = n;
        for (layer, &h) in self.trunk.iter().zip(&self.architecture.hidden) {
            check_layer(layer, width, h)?;
            width = h;
        }
        check_layer(&self.att_head, width, self.att_grid.len())?;
        check_layer(&self.em_head, width, self.em_grid.len())?;
        Ok(())
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn input_size(&self) -> usize {
        self.param_names.len()
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn att_grid(&self) -> &WavelengthGrid {
        &self.att_grid
    }

    pub fn em_grid(&self) -> &WavelengthGrid {
        &self.em_grid
    }

    pub fn stellar(&self) -> &[f64] {
        &self.stellar
    }

    /// True when any parameter lies outside the training bounds.
    pub fn check_bounds(&self, params: &[f64]) -> bool {
        params
            .iter()
            .zip(&self.bounds)
            .any(|(p, (lo, hi))| p < lo || p > hi)
    }

    pub fn predict(&self, params: &[f64]) -> ModelResult<Prediction> {
        Ok(self.prediction(&self.forward(params, None)?))
    }

    pub fn predict_with_stellar(&self, params: &[f64], stellar: &[f64]) -> ModelResult<Prediction> {
        Ok(self.prediction(&self.forward(params, Some(stellar))?))
    }

    pub fn prediction(&self, pass: &ForwardPass) -> Prediction {
        let emission = pass.emission.to_vec();
        Prediction {
            attenuation: pass.attenuation.to_vec(),
            emitted: self.em_grid.integrate(&emission),
            emission,
            absorbed: pass.absorbed,
        }
    }

    /// Evaluate the network, keeping intermediates for [`Self::backward`].
    /// `stellar` overrides the default template.
    pub fn forward(&self, params: &[f64], stellar: Option<&[f64]>) -> ModelResult<ForwardPass> {
        if params.len() != self.input_size() {
            return Err(ModelError::shape("parameters", self.input_size(), params.len()));
        }
        let stellar = stellar.unwrap_or(&self.stellar);
        if stellar.len() != self.att_grid.len() {
            return Err(ModelError::shape("stellar spectrum", self.att_grid.len(), stellar.len()));
        }

        let input: Array1<f64> = params
            .iter()
            .zip(&self.bounds)
            .map(|(x, (lo, hi))| 2.0 * (x - lo) / (hi - lo) - 1.0)
            .collect();

        let mut activations = Vec::with_capacity(self.trunk.len() + 1);
        activations.push(input);
        for layer in &self.trunk {
            let pre = layer.forward(last(&activations));
            let act = self.architecture.activation;
            activations.push(pre.mapv(|v| act.apply(v)));
        }
        let hidden = last(&activations);

        let att_pre = self.att_head.forward(hidden);
        let attenuation = att_pre.mapv(softplus);
        let transmission = attenuation.mapv(spectrum::transmission);

        let log_fractions = log_softmax(&self.em_head.forward(hidden));
        let fractions = log_fractions.mapv(f64::exp);

        let absorbed: f64 = self
            .att_grid
            .weights()
            .iter()
            .zip(stellar)
            .zip(&transmission)
            .map(|((w, l), t)| w * l * (1.0 - t))
            .sum();

        let emission: Array1<f64> = fractions
            .iter()
            .zip(self.em_grid.weights())
            .map(|(p, w)| absorbed * p / w)
            .collect();

        Ok(ForwardPass {
            activations,
            att_pre,
            attenuation,
            transmission,
            log_fractions,
            fractions,
            stellar: stellar.to_vec(),
            absorbed,
            emission,
        })
    }

    /// Reverse pass: pull `cot` back to the input parameters, adding the
    /// parameter gradients to `grads` when given.
    pub fn backward(
        &self,
        pass: &ForwardPass,
        cot: &Cotangent,
        mut grads: Option<&mut Gradients>,
    ) -> ModelResult<Vec<f64>> {
        let n_att = self.att_grid.len();
        let n_em = self.em_grid.len();
        check_cotangent(&cot.attenuation, "attenuation cotangent", n_att)?;
        check_cotangent(&cot.emission, "emission cotangent", n_em)?;
        check_cotangent(&cot.logits, "logit cotangent", n_em)?;

        let w_em = self.em_grid.weights();
        let w_att = self.att_grid.weights();
        let p = &pass.fractions;

        // E_j = L_abs p_j / w_j
        let mut g_absorbed = cot.absorbed;
        let mut g_logits = Array1::<f64>::zeros(n_em);
        if let Some(g_em) = &cot.emission {
            let g_p: Array1<f64> = (0..n_em).map(|j| g_em[j] * pass.absorbed / w_em[j]).collect();
            g_absorbed += (0..n_em).map(|j| g_em[j] * p[j] / w_em[j]).sum::<f64>();
            // softmax Jacobian: p ⊙ (g - <p, g>)
            let mean = p.dot(&g_p);
            g_logits = p * &(g_p - mean);
        }
        if let Some(extra) = &cot.logits {
            g_logits += extra;
        }

        // L_abs = Σ w L* (1 - 10^(-0.4 A))
        let mut g_att = cot
            .attenuation
            .clone()
            .unwrap_or_else(|| Array1::zeros(n_att));
        if g_absorbed != 0.0 {
            for i in 0..n_att {
                g_att[i] += g_absorbed * w_att[i] * pass.stellar[i] * MAG_TO_LN * pass.transmission[i];
            }
        }
        let g_att_pre = &g_att * &pass.att_pre.mapv(sigmoid);

        let hidden = last(&pass.activations);
        let mut g_hidden = self.att_head.backward(
            hidden,
            g_att_pre.view(),
            grads.as_mut().map(|g| &mut g.att_head),
        );
        g_hidden += &self.em_head.backward(
            hidden,
            g_logits.view(),
            grads.as_mut().map(|g| &mut g.em_head),
        );

        let act = self.architecture.activation;
        for (l, layer) in self.trunk.iter().enumerate().rev() {
            let out = &pass.activations[l + 1];
            let g_pre = &g_hidden * &out.mapv(|y| act.derivative_from_output(y));
            g_hidden = layer.backward(
                pass.activations[l].view(),
                g_pre.view(),
                grads.as_mut().map(|g| &mut g.trunk[l]),
            );
        }

        Ok(g_hidden
            .iter()
            .zip(&self.bounds)
            .map(|(g, (lo, hi))| g * 2.0 / (hi - lo))
            .collect())
    }

    pub fn zero_gradients(&self) -> Gradients {
        Gradients {
            trunk: self.trunk.iter().map(Dense::zeros_like).collect(),
            att_head: self.att_head.zeros_like(),
            em_head: self.em_head.zeros_like(),
        }
    }

    /// Mutable views of every trainable tensor.
    pub fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        self.trunk
            .iter_mut()
            .chain([&mut self.att_head, &mut self.em_head])
            .flat_map(|d| [d.weight.view_mut().into_dyn(), d.bias.view_mut().into_dyn()])
            .collect()
    }

    pub fn n_weights(&self) -> usize {
        self.trunk
            .iter()
            .chain([&self.att_head, &self.em_head])
            .map(|d| d.weight.len() + d.bias.len())
            .sum()
    }
}

fn last(activations: &[Array1<f64>]) -> ArrayView1<'_, f64> {
    activations
        .last()
        .map(|a| a.view())
        .unwrap_or_else(|| ArrayView1::from(&[]))
}

fn check_layer(layer: &Dense, inputs: usize, outputs: usize) -> ModelResult<()> {
    if layer.inputs() != inputs {
        return Err(ModelError::shape("layer inputs", inputs, layer.inputs()));
    }
    if layer.outputs() != outputs || layer.bias.len() != outputs {
        return Err(ModelError::shape("layer outputs", outputs, layer.outputs()));
    }
    Ok(())
}

fn check_cotangent(cot: &Option<Array1<f64>>, what: &'static str, expected: usize) -> ModelResult<()> {
    match cot {
        Some(c) if c.len() != expected => Err(ModelError::shape(what, expected, c.len())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::fixtures::toy_model;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    const X: [f64; 3] = [0.7, 35.0, 22.0];

    /// Scalar probe `s = <a, A> + <e, E>` used to check VJPs.
    fn probe(model: &SurrogateModel, params: &[f64], a: &[f64], e: &[f64]) -> f64 {
        let pred = model.predict(params).unwrap();
        let sa: f64 = pred.attenuation.iter().zip(a).map(|(x, y)| x * y).sum();
        let se: f64 = pred.emission.iter().zip(e).map(|(x, y)| x * y).sum();
        sa + se
    }

    fn probe_cotangent(model: &SurrogateModel) -> (Vec<f64>, Vec<f64>) {
        let a = (0..model.att_grid().len()).map(|i| 0.3 - 0.1 * i as f64).collect();
        let e = (0..model.em_grid().len()).map(|j| 0.05 * (j as f64 + 1.0)).collect();
        (a, e)
    }

    #[test]
    fn energy_balance_holds_by_construction() {
        let model = toy_model(3);
        for x in [[0.0, 0.0, 15.0], X, [2.0, 90.0, 60.0], [5.0, -10.0, 100.0]] {
            let pred = model.predict(&x).unwrap();
            assert!(pred.absorbed > 0.0);
            assert!(pred.energy_balance_residual() < 1e-12);
            assert!(pred.attenuation.iter().all(|a| *a >= 0.0));
            assert!(pred.emission.iter().all(|e| *e >= 0.0));
        }
    }

    #[test]
    fn stellar_override_scales_energy() {
        let model = toy_model(3);
        let base = model.predict(&X).unwrap();
        let doubled: Vec<f64> = model.stellar().iter().map(|v| 2.0 * v).collect();
        let pred = model.predict_with_stellar(&X, &doubled).unwrap();
        assert_relative_eq!(pred.absorbed, 2.0 * base.absorbed, max_relative = 1e-12);
        assert_eq!(pred.attenuation, base.attenuation);
        assert!(model.predict_with_stellar(&X, &[1.0]).is_err());
    }

    #[test]
    fn prediction_is_deterministic() {
        let a = toy_model(9);
        let b = toy_model(9);
        assert_eq!(a.predict(&X).unwrap(), b.predict(&X).unwrap());
        assert_eq!(a.predict(&X).unwrap(), a.predict(&X).unwrap());
        assert_ne!(toy_model(10).predict(&X).unwrap(), a.predict(&X).unwrap());
    }

    #[test]
    fn rejects_wrong_input_length() {
        let model = toy_model(1);
        assert!(matches!(
            model.predict(&[1.0]),
            Err(ModelError::ShapeMismatch { expected: 3, found: 1, .. })
        ));
    }

    #[test]
    fn bounds_check_is_inclusive() {
        let model = toy_model(1);
        assert!(!model.check_bounds(&[0.0, 90.0, 15.0]));
        assert!(model.check_bounds(&[-0.01, 45.0, 20.0]));
        assert!(model.check_bounds(&[1.0, 45.0, 60.5]));
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let model = toy_model(5);
        let (a, e) = probe_cotangent(&model);
        let pass = model.forward(&X, None).unwrap();
        let cot = Cotangent {
            attenuation: Some(Array1::from(a.clone())),
            emission: Some(Array1::from(e.clone())),
            ..Cotangent::default()
        };
        let grad = model.backward(&pass, &cot, None).unwrap();

        for k in 0..X.len() {
            let h = 1e-6 * (1.0 + X[k].abs());
            let mut up = X;
            let mut down = X;
            up[k] += h;
            down[k] -= h;
            let fd = (probe(&model, &up, &a, &e) - probe(&model, &down, &a, &e)) / (2.0 * h);
            assert_relative_eq!(grad[k], fd, epsilon = 1e-7, max_relative = 1e-5);
        }
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let model = toy_model(5);
        let (a, e) = probe_cotangent(&model);
        let pass = model.forward(&X, None).unwrap();
        let cot = Cotangent {
            attenuation: Some(Array1::from(a.clone())),
            emission: Some(Array1::from(e.clone())),
            ..Cotangent::default()
        };
        let mut grads = model.zero_gradients();
        model.backward(&pass, &cot, Some(&mut grads)).unwrap();
        let analytic: Vec<f64> = grads.tensors().iter().flat_map(|t| t.iter().copied().collect::<Vec<_>>()).collect();
        assert_eq!(analytic.len(), model.n_weights());

        let h = 1e-6;
        for idx in (0..analytic.len()).step_by(7) {
            let nudge = |delta: f64| {
                let mut m = model.clone();
                let mut seen = 0;
                for mut t in m.tensors_mut() {
                    for v in t.iter_mut() {
                        if seen == idx {
                            *v += delta;
                        }
                        seen += 1;
                    }
                }
                probe(&m, &X, &a, &e)
            };
            let fd = (nudge(h) - nudge(-h)) / (2.0 * h);
            assert_relative_eq!(analytic[idx], fd, epsilon = 1e-7, max_relative = 1e-5);
        }
    }

    #[test]
    fn serde_round_trip_preserves_predictions() {
        let model = toy_model(4);
        let text = serde_json::to_string(&model).unwrap();
        let back: SurrogateModel = serde_json::from_str(&text).unwrap();
        back.validate().unwrap();
        assert_eq!(back.predict(&X).unwrap(), model.predict(&X).unwrap());
    }

    #[test]
    fn architecture_validation() {
        assert!(Architecture { hidden: vec![], ..Default::default() }.validate().is_err());
        assert!(Architecture { hidden: vec![4, 0], ..Default::default() }.validate().is_err());
        assert!(Architecture::default().validate().is_ok());
    }
}
