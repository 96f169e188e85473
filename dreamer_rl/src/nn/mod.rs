//! Neural network building blocks.
//!
//! # Modules
//!
//! - [`activation`]: configurable hidden activations
//! - [`mlp`]: dense stacks and distribution-valued MLP heads
//! - [`heads`]: encoder, decoder and prediction-head interfaces with dense
//!   reference implementations

pub mod activation;
pub mod heads;
pub mod mlp;

pub use activation::{elu, Activation};
pub use heads::{
    Decoder, DenseDecoder, DenseDecoderConfig, DenseEncoder, DenseEncoderConfig, Encoder,
    HeadOutput, PredictionHead,
};
pub use mlp::{DenseStack, DenseStackConfig, HeadDist, MlpHead, MlpHeadConfig};
