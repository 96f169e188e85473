//! Gated recurrent cell for the deterministic path of the latent model.
//!
//! All three gates come out of a single fused projection of
//! `concat(input, state)`, optionally layer-normalised before the split.
//! The update gate carries a constant `-1` bias so a freshly initialised cell
//! leans towards keeping its previous state.

use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

// ============================================================================
// GRU Configuration
// ============================================================================

/// Configuration for [`GruCell`].
#[derive(Debug, Clone)]
pub struct GruCellConfig {
    /// Input feature size.
    pub d_input: usize,
    /// Hidden state size.
    pub d_hidden: usize,
    /// Layer-normalise the fused gate projection.
    pub norm: bool,
    /// Constant added to the update gate pre-activation.
    pub update_bias: f32,
}

impl GruCellConfig {
    /// Create new GRU config.
    pub fn new(d_input: usize, d_hidden: usize) -> Self {
        Self {
            d_input,
            d_hidden,
            norm: false,
            update_bias: -1.0,
        }
    }

    /// Enable or disable layer normalisation.
    pub fn with_norm(mut self, norm: bool) -> Self {
        self.norm = norm;
        self
    }

    /// Set the update gate bias.
    pub fn with_update_bias(mut self, update_bias: f32) -> Self {
        self.update_bias = update_bias;
        self
    }

    /// Initialize the GRU cell.
    pub fn init<B: Backend>(&self, device: &B::Device) -> GruCell<B> {
        // Normalisation provides the shift, so the projection drops its bias.
        let gates = LinearConfig::new(self.d_input + self.d_hidden, 3 * self.d_hidden)
            .with_bias(!self.norm)
            .init(device);
        let norm = self
            .norm
            .then(|| LayerNormConfig::new(3 * self.d_hidden).init(device));

        GruCell {
            gates,
            norm,
            d_input: self.d_input,
            d_hidden: self.d_hidden,
            update_bias: self.update_bias,
        }
    }
}

// ============================================================================
// GRU Cell
// ============================================================================

/// Fused GRU cell.
///
/// ```text
/// [r, c, u] = split(LN?(W [x, h]))
/// r  = σ(r)
/// c  = tanh(r ⊙ c)
/// u  = σ(u + update_bias)
/// h' = u ⊙ c + (1 - u) ⊙ h
/// ```
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    gates: Linear<B>,
    norm: Option<LayerNorm<B>>,
    #[module(skip)]
    d_input: usize,
    #[module(skip)]
    d_hidden: usize,
    #[module(skip)]
    update_bias: f32,
}

impl<B: Backend> GruCell<B> {
    /// Advance the cell by one step.
    ///
    /// # Arguments
    ///
    /// * `input` - Input tensor [batch, d_input]
    /// * `state` - Previous hidden state [batch, d_hidden]
    ///
    /// # Returns
    ///
    /// New hidden state [batch, d_hidden]
    pub fn step(&self, input: Tensor<B, 2>, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, _] = input.dims();
        let h = self.d_hidden;
        debug_assert_eq!(state.dims(), [batch, h], "GruCell: state shape mismatch");

        let mut parts = self.gates.forward(Tensor::cat(vec![input, state.clone()], 1));
        if let Some(norm) = &self.norm {
            parts = norm.forward(parts);
        }

        let reset = sigmoid(parts.clone().slice([0..batch, 0..h]));
        let cand = (reset * parts.clone().slice([0..batch, h..2 * h])).tanh();
        let update = sigmoid(parts.slice([0..batch, 2 * h..3 * h]).add_scalar(self.update_bias));

        update.clone() * cand + (update.neg().add_scalar(1.0)) * state
    }

    /// Zero hidden state for `batch_size` rows.
    pub fn initial_state(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.d_hidden], device)
    }

    /// Hidden size (output dimension).
    pub fn hidden_size(&self) -> usize {
        self.d_hidden
    }

    /// Input size.
    pub fn input_size(&self) -> usize {
        self.d_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_gru_cell_step_shapes() {
        let device = Default::default();
        let cell = GruCellConfig::new(4, 8).init::<B>(&device);

        let input: Tensor<B, 2> = Tensor::ones([3, 4], &device);
        let state = cell.initial_state(3, &device);
        let next = cell.step(input, state);

        assert_eq!(next.dims(), [3, 8]);
        assert_eq!(cell.hidden_size(), 8);
        assert_eq!(cell.input_size(), 4);
    }

    #[test]
    fn test_gru_cell_with_norm() {
        let device = Default::default();
        let cell = GruCellConfig::new(2, 5).with_norm(true).init::<B>(&device);
        assert!(cell.norm.is_some());

        let input: Tensor<B, 2> = Tensor::ones([2, 2], &device);
        let next = cell.step(input, cell.initial_state(2, &device));
        assert_eq!(next.dims(), [2, 5]);
    }

    #[test]
    fn test_gru_output_is_bounded() {
        // Convex mix of tanh(.) and a state in [-1, 1] stays in [-1, 1].
        let device = Default::default();
        let cell = GruCellConfig::new(3, 6).init::<B>(&device);

        let mut state = Tensor::<B, 2>::ones([4, 6], &device);
        for _ in 0..5 {
            let input = Tensor::<B, 2>::ones([4, 3], &device) * 10.0;
            state = cell.step(input, state);
        }

        let data = state.into_data();
        for &v in data.as_slice::<f32>().unwrap() {
            assert!(v.abs() <= 1.0 + 1e-5, "hidden value out of range: {}", v);
        }
    }

    #[test]
    fn test_large_negative_update_bias_keeps_state() {
        let device = Default::default();
        let cell = GruCellConfig::new(2, 3)
            .with_update_bias(-50.0)
            .init::<B>(&device);

        let state = Tensor::<B, 2>::from_floats([[0.3, -0.2, 0.7]], &device);
        let next = cell.step(Tensor::ones([1, 2], &device), state.clone());

        let diff: f32 = (next - state).abs().max().into_scalar();
        assert!(diff < 1e-5, "state should be carried over, diff {}", diff);
    }
}
