//! Training batches and their preprocessing.
//!
//! A [`Batch`] is a time-major window of `T` steps from `N` episodes.
//! `action[t]` is the action that led to `obs[t]`, so `action[0]` of a
//! fresh episode is all zeros.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

use crate::error::{DreamerError, Result};

/// Named observation tensors, each `[T, N, features]`.
pub type Observations<B> = BTreeMap<String, Tensor<B, 3>>;

/// Raw training batch.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// Observations keyed by name.
    pub obs: Observations<B>,
    /// Actions [T, N, A].
    pub action: Tensor<B, 3>,
    /// Rewards received on arrival at `obs[t]` [T, N].
    pub reward: Tensor<B, 2>,
    /// Episode starts [T, N].
    pub is_first: Tensor<B, 2, Bool>,
    /// Terminal states [T, N].
    pub is_terminal: Tensor<B, 2, Bool>,
}

impl<B: Backend> Batch<B> {
    /// Sequence length `T`.
    pub fn steps(&self) -> usize {
        self.reward.dims()[0]
    }

    /// Number of sequences `N`.
    pub fn batch(&self) -> usize {
        self.reward.dims()[1]
    }

    /// Assert that every field agrees on `[T, N]`.
    pub fn check_shapes(&self) {
        let tn = self.reward.dims();
        let [t, n, _] = self.action.dims();
        assert_eq!([t, n], tn, "Batch: action is [{}, {}], reward is {:?}", t, n, tn);
        assert_eq!(self.is_first.dims(), tn, "Batch: is_first shape mismatch");
        assert_eq!(self.is_terminal.dims(), tn, "Batch: is_terminal shape mismatch");
        for (key, value) in &self.obs {
            let [t, n, _] = value.dims();
            assert_eq!([t, n], tn, "Batch: observation `{}` shape mismatch", key);
        }
    }
}

// ============================================================================
// Reward clipping
// ============================================================================

/// Transformation applied to rewards before they are used as targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClipRewards {
    /// Leave rewards untouched.
    Identity,
    /// Keep only the sign.
    Sign,
    /// Squash with `tanh`.
    #[default]
    Tanh,
}

impl ClipRewards {
    /// Apply to a tensor of rewards.
    pub fn apply<B: Backend, const D: usize>(&self, reward: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Identity => reward,
            Self::Sign => reward.sign(),
            Self::Tanh => reward.tanh(),
        }
    }
}

impl FromStr for ClipRewards {
    type Err = DreamerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "identity" => Ok(Self::Identity),
            "sign" => Ok(Self::Sign),
            "tanh" => Ok(Self::Tanh),
            other => Err(DreamerError::config(
                "clip_rewards",
                format!("expected identity, sign or tanh, got `{}`", other),
            )),
        }
    }
}

impl fmt::Display for ClipRewards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Sign => "sign",
            Self::Tanh => "tanh",
        })
    }
}

// ============================================================================
// Prepared batch
// ============================================================================

/// Batch after reward clipping and discount computation.
#[derive(Debug, Clone)]
pub struct Prepared<B: Backend> {
    /// Observations keyed by name.
    pub obs: Observations<B>,
    /// Actions [T, N, A].
    pub action: Tensor<B, 3>,
    /// Clipped rewards [T, N].
    pub reward: Tensor<B, 2>,
    /// `(1 - is_terminal) * discount` [T, N].
    pub discount: Tensor<B, 2>,
    /// Episode starts [T, N].
    pub is_first: Tensor<B, 2, Bool>,
    /// Terminal states [T, N].
    pub is_terminal: Tensor<B, 2, Bool>,
}

impl<B: Backend> Prepared<B> {
    /// Clip rewards and turn terminal flags into discounts.
    pub fn new(batch: Batch<B>, clip: ClipRewards, discount: f32) -> Self {
        batch.check_shapes();
        let discount = batch
            .is_terminal
            .clone()
            .bool_not()
            .float()
            .mul_scalar(discount);

        Self {
            obs: batch.obs,
            action: batch.action,
            reward: clip.apply(batch.reward),
            discount,
            is_first: batch.is_first,
            is_terminal: batch.is_terminal,
        }
    }

    /// Sequence length `T`.
    pub fn steps(&self) -> usize {
        self.reward.dims()[0]
    }

    /// Number of sequences `N`.
    pub fn batch(&self) -> usize {
        self.reward.dims()[1]
    }

    /// Prediction target for a head output, flattened to `[T * N, features]`.
    ///
    /// `reward` and `discount` resolve to the scalar streams, everything else
    /// to the observation of that name.
    pub fn field(&self, key: &str) -> Result<Tensor<B, 2>> {
        let rows = self.steps() * self.batch();
        match key {
            "reward" => Ok(self.reward.clone().reshape([rows, 1])),
            "discount" => Ok(self.discount.clone().reshape([rows, 1])),
            _ => {
                let obs = self
                    .obs
                    .get(key)
                    .ok_or_else(|| DreamerError::MissingField(key.to_string()))?;
                let [_, _, features] = obs.dims();
                Ok(obs.clone().reshape([rows, features]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn batch() -> Batch<B> {
        let device = Default::default();
        let mut obs = Observations::new();
        obs.insert("position".to_string(), Tensor::ones([2, 3, 4], &device));
        Batch {
            obs,
            action: Tensor::zeros([2, 3, 1], &device),
            reward: Tensor::from_floats([[2.0, -0.5, 0.0], [-3.0, 0.1, 1.0]], &device),
            is_first: Tensor::from_data(
                TensorData::from([[true, true, true], [false, false, false]]),
                &device,
            ),
            is_terminal: Tensor::from_data(
                TensorData::from([[false, false, false], [true, false, false]]),
                &device,
            ),
        }
    }

    #[test]
    fn test_discount_from_terminals() {
        let prepared = Prepared::new(batch(), ClipRewards::Identity, 0.99);
        let data = prepared.discount.into_data();
        let d = data.as_slice::<f32>().unwrap();
        assert!((d[0] - 0.99).abs() < 1e-6);
        assert_eq!(d[3], 0.0);
        assert!((d[4] - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_reward_clipping_modes() {
        let sign = Prepared::new(batch(), ClipRewards::Sign, 0.99).reward.into_data();
        assert_eq!(sign.as_slice::<f32>().unwrap(), &[1.0, -1.0, 0.0, -1.0, 1.0, 1.0]);

        let tanh = Prepared::new(batch(), ClipRewards::Tanh, 0.99).reward.into_data();
        assert!((tanh.as_slice::<f32>().unwrap()[0] - 2.0f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_field_lookup() {
        let prepared = Prepared::new(batch(), ClipRewards::Tanh, 0.99);
        assert_eq!(prepared.field("reward").unwrap().dims(), [6, 1]);
        assert_eq!(prepared.field("discount").unwrap().dims(), [6, 1]);
        assert_eq!(prepared.field("position").unwrap().dims(), [6, 4]);
        assert!(matches!(
            prepared.field("image"),
            Err(DreamerError::MissingField(k)) if k == "image"
        ));
    }

    #[test]
    fn test_parse_clip_rewards() {
        assert_eq!("sign".parse::<ClipRewards>().unwrap(), ClipRewards::Sign);
        assert!("clip".parse::<ClipRewards>().is_err());
    }
}
