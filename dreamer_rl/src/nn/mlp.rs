//! Dense network with a distribution output layer.
//!
//! [`MlpHead`] is used for the reward and discount heads, the actor and the
//! critic. Its hidden [`DenseStack`] repeats `Linear → LayerNorm? → act`
//! `layers` times; the output layer produces the parameters of the
//! configured [`HeadDist`].

use std::fmt;

use burn::module::{Ignored, Module};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::{sigmoid, softplus};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::Activation;
use crate::algorithms::Dist;
use crate::error::{DreamerError, Result};

// ============================================================================
// Output distribution
// ============================================================================

/// Distribution family produced by an [`MlpHead`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadDist {
    /// Unit-variance Gaussian around the output.
    Mse,
    /// Gaussian with learned scale `softplus(s) + min_std`.
    Normal {
        /// Lower bound on the scale.
        min_std: f32,
    },
    /// Independent Bernoulli over logits.
    Binary,
    /// Gaussian on [-1, 1] with mean `tanh(out)` and scale
    /// `2 * sigmoid((s + init_std) / 2) + min_std`.
    TruncNormal {
        /// Lower bound on the scale.
        min_std: f32,
        /// Offset applied to the scale pre-activation.
        init_std: f32,
    },
    /// Single categorical over the output width.
    OneHot,
}

impl HeadDist {
    /// Parse a configured name.
    ///
    /// # Arguments
    ///
    /// * `key` - Configuration key, used in the error message
    /// * `name` - One of `mse`, `normal`, `binary`, `trunc_normal`, `onehot`
    /// * `min_std` - Scale floor for `normal` and `trunc_normal`
    /// * `init_std` - Scale offset for `trunc_normal`
    pub fn parse(key: &str, name: &str, min_std: f32, init_std: f32) -> Result<Self> {
        match name {
            "mse" => Ok(Self::Mse),
            "normal" => Ok(Self::Normal { min_std }),
            "binary" => Ok(Self::Binary),
            "trunc_normal" => Ok(Self::TruncNormal { min_std, init_std }),
            "onehot" => Ok(Self::OneHot),
            other => Err(DreamerError::config(
                key,
                format!(
                    "unknown distribution `{}` (expected mse, normal, binary, trunc_normal or onehot)",
                    other
                ),
            )),
        }
    }

    fn needs_std(&self) -> bool {
        matches!(self, Self::Normal { .. } | Self::TruncNormal { .. })
    }
}

impl fmt::Display for HeadDist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mse => "mse",
            Self::Normal { .. } => "normal",
            Self::Binary => "binary",
            Self::TruncNormal { .. } => "trunc_normal",
            Self::OneHot => "onehot",
        };
        f.write_str(name)
    }
}

// ============================================================================
// DenseStack
// ============================================================================

/// Configuration for [`DenseStack`].
#[derive(Debug, Clone)]
pub struct DenseStackConfig {
    /// Input feature size.
    pub d_input: usize,
    /// Number of hidden layers.
    pub layers: usize,
    /// Width of every hidden layer.
    pub units: usize,
    /// Hidden activation.
    pub act: Activation,
    /// Layer-normalise hidden pre-activations.
    pub norm: bool,
}

impl DenseStackConfig {
    /// Create new stack config.
    pub fn new(d_input: usize, layers: usize, units: usize) -> Self {
        Self {
            d_input,
            layers,
            units,
            act: Activation::Elu,
            norm: false,
        }
    }

    /// Set the hidden activation.
    pub fn with_act(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }

    /// Enable or disable layer normalisation.
    pub fn with_norm(mut self, norm: bool) -> Self {
        self.norm = norm;
        self
    }

    /// Initialize the stack.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseStack<B> {
        let mut layers = Vec::with_capacity(self.layers);
        let mut norms = Vec::new();
        let mut width = self.d_input;
        for _ in 0..self.layers {
            layers.push(LinearConfig::new(width, self.units).init(device));
            if self.norm {
                norms.push(LayerNormConfig::new(self.units).init(device));
            }
            width = self.units;
        }

        DenseStack {
            layers,
            norms,
            act: Ignored(self.act),
            d_output: width,
        }
    }
}

/// `Linear → LayerNorm? → act`, repeated. With zero layers it is the identity.
#[derive(Module, Debug)]
pub struct DenseStack<B: Backend> {
    layers: Vec<Linear<B>>,
    norms: Vec<LayerNorm<B>>,
    act: Ignored<Activation>,
    #[module(skip)]
    d_output: usize,
}

impl<B: Backend> DenseStack<B> {
    /// Forward pass [rows, d_input] → [rows, d_output].
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut h = x;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(h);
            if let Some(norm) = self.norms.get(i) {
                h = norm.forward(h);
            }
            h = self.act.0.forward(h);
        }
        h
    }

    /// Width of the output.
    pub fn d_output(&self) -> usize {
        self.d_output
    }
}

// ============================================================================
// MlpHead
// ============================================================================

/// Configuration for [`MlpHead`].
#[derive(Debug, Clone)]
pub struct MlpHeadConfig {
    /// Input feature size.
    pub d_input: usize,
    /// Event size of the output distribution.
    pub d_output: usize,
    /// Number of hidden layers.
    pub layers: usize,
    /// Width of every hidden layer.
    pub units: usize,
    /// Hidden activation.
    pub act: Activation,
    /// Layer-normalise hidden pre-activations.
    pub norm: bool,
    /// Output distribution.
    pub dist: HeadDist,
}

impl MlpHeadConfig {
    /// Create a config with 4 hidden layers of 400 units.
    pub fn new(d_input: usize, d_output: usize, dist: HeadDist) -> Self {
        Self {
            d_input,
            d_output,
            layers: 4,
            units: 400,
            act: Activation::Elu,
            norm: false,
            dist,
        }
    }

    /// Set the number of hidden layers.
    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    /// Set the hidden width.
    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    /// Set the hidden activation.
    pub fn with_act(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }

    /// Enable or disable layer normalisation.
    pub fn with_norm(mut self, norm: bool) -> Self {
        self.norm = norm;
        self
    }

    /// Initialize the head.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpHead<B> {
        let trunk = DenseStackConfig::new(self.d_input, self.layers, self.units)
            .with_act(self.act)
            .with_norm(self.norm)
            .init(device);
        let width = trunk.d_output();

        let out = LinearConfig::new(width, self.d_output).init(device);
        let std = self
            .dist
            .needs_std()
            .then(|| LinearConfig::new(width, self.d_output).init(device));

        MlpHead {
            trunk,
            out,
            std,
            dist: Ignored(self.dist),
            d_input: self.d_input,
            d_output: self.d_output,
        }
    }
}

/// Dense network returning a [`Dist`] per input row.
#[derive(Module, Debug)]
pub struct MlpHead<B: Backend> {
    trunk: DenseStack<B>,
    out: Linear<B>,
    std: Option<Linear<B>>,
    dist: Ignored<HeadDist>,
    #[module(skip)]
    d_input: usize,
    #[module(skip)]
    d_output: usize,
}

impl<B: Backend> MlpHead<B> {
    /// Output distribution for a batch of inputs.
    ///
    /// # Arguments
    ///
    /// * `x` - Input features [rows, d_input]
    pub fn forward(&self, x: Tensor<B, 2>) -> Dist<B> {
        let h = self.trunk.forward(x);
        let out = self.out.forward(h.clone());
        let std = self.std.as_ref().map(|layer| layer.forward(h));

        match (self.dist.0, std) {
            (HeadDist::Mse, _) => Dist::mse(out),
            (HeadDist::Normal { min_std }, Some(std)) => {
                Dist::normal(out, softplus(std, 1.0).add_scalar(min_std))
            }
            (HeadDist::Binary, _) => Dist::bernoulli(out),
            (HeadDist::TruncNormal { min_std, init_std }, Some(std)) => {
                let scale = sigmoid(std.add_scalar(init_std).div_scalar(2.0))
                    .mul_scalar(2.0)
                    .add_scalar(min_std);
                Dist::trunc_normal(out.tanh(), scale, -1.0, 1.0)
            }
            (HeadDist::OneHot, _) => {
                let classes = self.d_output;
                Dist::one_hot(out, classes)
            }
            (dist, None) => unreachable!("MlpHead: {} head built without a scale layer", dist),
        }
    }

    /// Output distribution family.
    pub fn dist(&self) -> HeadDist {
        self.dist.0
    }

    /// Input feature size.
    pub fn d_input(&self) -> usize {
        self.d_input
    }

    /// Event size of the output.
    pub fn d_output(&self) -> usize {
        self.d_output
    }
}
