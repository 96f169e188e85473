//! Interfaces between the latent model and its observation-side networks.
//!
//! The world model treats the encoder, the decoder and every prediction head
//! as opaque collaborators behind the traits in this module. Dense reference
//! implementations ([`DenseEncoder`], [`DenseDecoder`]) handle flat vector
//! observations.

use std::collections::BTreeMap;

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::{Activation, DenseStack, DenseStackConfig, MlpHead};
use crate::algorithms::Dist;
use crate::error::{DreamerError, Result};
use crate::world_model::Observations;

// ============================================================================
// Head output
// ============================================================================

/// What a prediction head returns for a batch of features.
#[derive(Debug, Clone)]
pub enum HeadOutput<B: Backend> {
    /// One distribution, reported under the head's own name.
    Single(Dist<B>),
    /// One distribution per named field.
    Multi(BTreeMap<String, Dist<B>>),
}

impl<B: Backend> HeadOutput<B> {
    /// Flatten into `(field, dist)` pairs; a single output is named after
    /// the head.
    pub fn into_named(self, head: &str) -> Vec<(String, Dist<B>)> {
        match self {
            Self::Single(dist) => vec![(head.to_string(), dist)],
            Self::Multi(dists) => dists.into_iter().collect(),
        }
    }
}

/// Maps features to one or more predictive distributions.
pub trait PredictionHead<B: Backend> {
    /// Predict from features [rows, feat].
    fn predict(&self, feat: Tensor<B, 2>) -> HeadOutput<B>;
}

impl<B: Backend> PredictionHead<B> for MlpHead<B> {
    fn predict(&self, feat: Tensor<B, 2>) -> HeadOutput<B> {
        HeadOutput::Single(self.forward(feat))
    }
}

/// Embeds observations.
pub trait Encoder<B: Backend>: Module<B> {
    /// Encode `[T, N, ...]` observations into `[T, N, embed]`.
    ///
    /// Fails with [`DreamerError::MissingField`] when a required observation
    /// is absent.
    fn encode(&self, obs: &Observations<B>) -> Result<Tensor<B, 3>>;

    /// Width of the embedding.
    fn embed_size(&self) -> usize;
}

/// Reconstructs observations from features.
pub trait Decoder<B: Backend>: PredictionHead<B> + Module<B> {
    /// Concatenated means of every reconstructed field [rows, out].
    ///
    /// Must be a differentiable function of `feat`.
    fn decode_mean(&self, feat: Tensor<B, 2>) -> Tensor<B, 2>;
}

// ============================================================================
// DenseEncoder
// ============================================================================

/// Configuration for [`DenseEncoder`].
#[derive(Debug, Clone)]
pub struct DenseEncoderConfig {
    /// `(key, width)` of every encoded observation, in concatenation order.
    pub keys: Vec<(String, usize)>,
    /// Number of hidden layers.
    pub layers: usize,
    /// Width of every hidden layer and of the embedding.
    pub units: usize,
    /// Hidden activation.
    pub act: Activation,
    /// Layer-normalise hidden pre-activations.
    pub norm: bool,
}

impl DenseEncoderConfig {
    /// Create new encoder config with 4 layers of 400 units.
    pub fn new(keys: Vec<(String, usize)>) -> Self {
        Self {
            keys,
            layers: 4,
            units: 400,
            act: Activation::Elu,
            norm: false,
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

    /// Initialize the encoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseEncoder<B> {
        let d_input = self.keys.iter().map(|(_, w)| w).sum();
        let stack = DenseStackConfig::new(d_input, self.layers, self.units)
            .with_act(self.act)
            .with_norm(self.norm)
            .init(device);
        DenseEncoder {
            stack,
            keys: self.keys.clone(),
        }
    }
}

/// Concatenates the configured vector observations and embeds them with a
/// dense stack.
#[derive(Module, Debug)]
pub struct DenseEncoder<B: Backend> {
    stack: DenseStack<B>,
    #[module(skip)]
    keys: Vec<(String, usize)>,
}

impl<B: Backend> Encoder<B> for DenseEncoder<B> {
    fn encode(&self, obs: &Observations<B>) -> Result<Tensor<B, 3>> {
        let parts = self
            .keys
            .iter()
            .map(|(key, width)| {
                let value = obs
                    .get(key)
                    .ok_or_else(|| DreamerError::MissingField(key.clone()))?;
                debug_assert_eq!(value.dims()[2], *width, "DenseEncoder: `{}` width", key);
                Ok(value.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let x = Tensor::cat(parts, 2);
        let [t, n, f] = x.dims();
        let embed = self.stack.forward(x.reshape([t * n, f]));
        Ok(embed.reshape([t, n, self.stack.d_output()]))
    }

    fn embed_size(&self) -> usize {
        self.stack.d_output()
    }
}

// ============================================================================
// DenseDecoder
// ============================================================================

/// Configuration for [`DenseDecoder`].
#[derive(Debug, Clone)]
pub struct DenseDecoderConfig {
    /// Feature size.
    pub d_input: usize,
    /// `(key, width)` of every reconstructed observation.
    pub keys: Vec<(String, usize)>,
    /// Number of hidden layers.
    pub layers: usize,
    /// Width of every hidden layer.
    pub units: usize,
    /// Hidden activation.
    pub act: Activation,
    /// Layer-normalise hidden pre-activations.
    pub norm: bool,
}

impl DenseDecoderConfig {
    /// Create new decoder config with 4 layers of 400 units.
    pub fn new(d_input: usize, keys: Vec<(String, usize)>) -> Self {
        Self {
            d_input,
            keys,
            layers: 4,
            units: 400,
            act: Activation::Elu,
            norm: false,
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

    /// Initialize the decoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseDecoder<B> {
        let stack = DenseStackConfig::new(self.d_input, self.layers, self.units)
            .with_act(self.act)
            .with_norm(self.norm)
            .init(device);
        let outs = self
            .keys
            .iter()
            .map(|(_, width)| LinearConfig::new(stack.d_output(), *width).init(device))
            .collect();
        DenseDecoder {
            stack,
            outs,
            keys: self.keys.clone(),
        }
    }
}

/// Shared dense trunk with one unit-variance Gaussian output per key.
#[derive(Module, Debug)]
pub struct DenseDecoder<B: Backend> {
    stack: DenseStack<B>,
    outs: Vec<Linear<B>>,
    #[module(skip)]
    keys: Vec<(String, usize)>,
}

impl<B: Backend> DenseDecoder<B> {
    fn means(&self, feat: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        let h = self.stack.forward(feat);
        self.outs.iter().map(|out| out.forward(h.clone())).collect()
    }
}

impl<B: Backend> PredictionHead<B> for DenseDecoder<B> {
    fn predict(&self, feat: Tensor<B, 2>) -> HeadOutput<B> {
        let dists = self
            .keys
            .iter()
            .zip(self.means(feat))
            .map(|((key, _), mean)| (key.clone(), Dist::mse(mean)))
            .collect();
        HeadOutput::Multi(dists)
    }
}

impl<B: Backend> Decoder<B> for DenseDecoder<B> {
    fn decode_mean(&self, feat: Tensor<B, 2>) -> Tensor<B, 2> {
        Tensor::cat(self.means(feat), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{HeadDist, MlpHeadConfig};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn keys() -> Vec<(String, usize)> {
        vec![("position".to_string(), 2), ("velocity".to_string(), 3)]
    }

    #[test]
    fn test_encoder_shapes() {
        let device = Default::default();
        let encoder = DenseEncoderConfig::new(keys())
            .with_layers(2)
            .with_units(7)
            .init::<B>(&device);

        let mut obs = Observations::new();
        obs.insert("position".to_string(), Tensor::ones([4, 3, 2], &device));
        obs.insert("velocity".to_string(), Tensor::ones([4, 3, 3], &device));
        obs.insert("ignored".to_string(), Tensor::ones([4, 3, 9], &device));

        assert_eq!(encoder.embed_size(), 7);
        assert_eq!(encoder.encode(&obs).unwrap().dims(), [4, 3, 7]);

        obs.remove("velocity");
        assert!(matches!(
            encoder.encode(&obs),
            Err(DreamerError::MissingField(k)) if k == "velocity"
        ));
    }

    #[test]
    fn test_decoder_outputs_one_dist_per_key() {
        let device = Default::default();
        let decoder = DenseDecoderConfig::new(6, keys())
            .with_layers(1)
            .with_units(5)
            .init::<B>(&device);

        let feat = Tensor::<B, 2>::ones([8, 6], &device);
        let named = decoder.predict(feat.clone()).into_named("decoder");
        let names: Vec<_> = named.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["position", "velocity"]);
        assert_eq!(named[1].1.event_size(), 3);
        assert_eq!(decoder.decode_mean(feat).dims(), [8, 5]);
    }

    #[test]
    fn test_single_output_named_after_head() {
        let device = Default::default();
        let head = MlpHeadConfig::new(4, 1, HeadDist::Mse)
            .with_layers(1)
            .with_units(3)
            .init::<B>(&device);
        let named = head.predict(Tensor::zeros([2, 4], &device)).into_named("reward");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].0, "reward");
    }
}
