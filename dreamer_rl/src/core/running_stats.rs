//! Streaming magnitude normalisation.
//!
//! Keeps an exponential moving average of the mean absolute value of the
//! inputs and divides by it:
//!
//! ```text
//! mag    ← momentum * mag + (1 - momentum) * mean(|x|)
//! output = x / (mag + eps) * scale
//! ```
//!
//! `mag` starts at 1, so `momentum = 1` leaves values untouched (up to `eps`).
//! The estimate is updated once per call before the batch is transformed.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::metrics::{tensor_scalar, Metrics};

/// Hyperparameters of a [`StreamNorm`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamNormConfig {
    /// EMA momentum of the magnitude estimate.
    pub momentum: f64,
    /// Multiplier applied after normalisation.
    pub scale: f64,
    /// Added to the magnitude before dividing.
    pub eps: f64,
}

impl Default for StreamNormConfig {
    fn default() -> Self {
        Self {
            momentum: 1.0,
            scale: 1.0,
            eps: 1e-8,
        }
    }
}

/// Running magnitude normaliser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamNorm {
    config: StreamNormConfig,
    mag: f64,
}

impl StreamNorm {
    /// Create a normaliser with `mag = 1`.
    pub fn new(config: StreamNormConfig) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&config.momentum),
            "StreamNorm: momentum must lie in [0, 1], got {}",
            config.momentum
        );
        Self { config, mag: 1.0 }
    }

    /// Current magnitude estimate.
    pub fn magnitude(&self) -> f64 {
        self.mag
    }

    /// Fold the mean absolute value of a batch into the estimate.
    pub fn update(&mut self, batch_abs_mean: f64) {
        let m = self.config.momentum;
        self.mag = m * self.mag + (1.0 - m) * batch_abs_mean;
    }

    /// Normalise with the current estimate without updating it.
    pub fn transform<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let factor = self.config.scale / (self.mag + self.config.eps);
        x.mul_scalar(factor)
    }

    /// Update the estimate with `x`, then normalise `x`.
    ///
    /// # Returns
    ///
    /// The normalised tensor and `mean`, `std`, `normed_mean`, `normed_std`.
    pub fn normalize<B: Backend, const D: usize>(
        &mut self,
        x: Tensor<B, D>,
    ) -> (Tensor<B, D>, Metrics) {
        let flat = x.clone().flatten::<1>(0, D - 1);
        let mut metrics = Metrics::new();
        metrics.insert("mean", tensor_scalar(flat.clone().mean()));
        metrics.insert("std", tensor_scalar(flat.clone().var(0).sqrt()));

        self.update(tensor_scalar(flat.abs().mean()));
        let normed = self.transform(x);

        let normed_flat = normed.clone().flatten::<1>(0, D - 1);
        metrics.insert("normed_mean", tensor_scalar(normed_flat.clone().mean()));
        metrics.insert("normed_std", tensor_scalar(normed_flat.var(0).sqrt()));
        (normed, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_default_momentum_is_identity() {
        let device = Default::default();
        let mut norm = StreamNorm::new(StreamNormConfig::default());
        let x = Tensor::<B, 2>::from_floats([[1.0, -2.0], [3.0, 4.0]], &device);

        let (out, metrics) = norm.normalize(x);
        assert_eq!(norm.magnitude(), 1.0);

        let data = out.into_data();
        let values = data.as_slice::<f32>().unwrap();
        for (got, want) in values.iter().zip([1.0, -2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-5, "got {}, want {}", got, want);
        }
        assert!((metrics.get("mean").unwrap() - 1.5).abs() < 1e-6);
        assert!(metrics.contains("normed_std"));
    }

    #[test]
    fn test_magnitude_tracks_abs_mean() {
        let device = Default::default();
        let config = StreamNormConfig {
            momentum: 0.5,
            ..Default::default()
        };
        let mut norm = StreamNorm::new(config);

        let x = Tensor::<B, 1>::from_floats([3.0, -3.0, 3.0, -3.0], &device);
        let (out, _) = norm.normalize(x);

        // mag = 0.5 * 1 + 0.5 * 3
        assert!((norm.magnitude() - 2.0).abs() < 1e-9);
        let data = out.into_data();
        assert!((data.as_slice::<f32>().unwrap()[0] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_zero_momentum_uses_batch_only() {
        let mut norm = StreamNorm::new(StreamNormConfig {
            momentum: 0.0,
            scale: 2.0,
            eps: 0.0,
        });
        norm.update(4.0);
        assert_eq!(norm.magnitude(), 4.0);
        norm.update(0.5);
        assert_eq!(norm.magnitude(), 0.5);

        let device = Default::default();
        let out = norm.transform(Tensor::<B, 1>::from_floats([1.0], &device));
        let v: f32 = out.into_scalar();
        assert!((v - 4.0).abs() < 1e-6);
    }
}
