//! Hidden-layer activations selectable from configuration.

use std::fmt;
use std::str::FromStr;

use burn::tensor::activation::{relu, silu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::DreamerError;

/// Elementwise nonlinearity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// `x` for `x > 0`, `exp(x) - 1` otherwise.
    #[default]
    Elu,
    /// `max(x, 0)`.
    Relu,
    /// Hyperbolic tangent.
    Tanh,
    /// `x * sigmoid(x)`.
    Swish,
}

impl Activation {
    /// Apply the activation.
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Elu => elu(x),
            Self::Relu => relu(x),
            Self::Tanh => x.tanh(),
            Self::Swish => silu(x),
        }
    }
}

/// Exponential linear unit with unit scale.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x.clone()) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

impl FromStr for Activation {
    type Err = DreamerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elu" => Ok(Self::Elu),
            "relu" => Ok(Self::Relu),
            "tanh" => Ok(Self::Tanh),
            "swish" | "silu" => Ok(Self::Swish),
            other => Err(DreamerError::config(
                "act",
                format!("unknown activation `{}`", other),
            )),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Elu => "elu",
            Self::Relu => "relu",
            Self::Tanh => "tanh",
            Self::Swish => "swish",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_elu_values() {
        let device = Default::default();
        let x = Tensor::<B, 1>::from_floats([-1.0, 0.0, 2.0], &device);
        let data = Activation::Elu.forward(x).into_data();
        let y = data.as_slice::<f32>().unwrap();
        assert!((y[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!(y[1].abs() < 1e-6);
        assert!((y[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("silu".parse::<Activation>().unwrap(), Activation::Swish);
        assert!("gelu2".parse::<Activation>().is_err());
        assert_eq!(Activation::Tanh.to_string(), "tanh");
    }

    #[test]
    fn test_serde_lowercase() {
        let act: Activation = serde_json::from_str("\"tanh\"").unwrap();
        assert_eq!(act, Activation::Tanh);
        assert_eq!(serde_json::to_string(&Activation::Elu).unwrap(), "\"elu\"");
    }
}
