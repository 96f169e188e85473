//! Relaxed isometry regulariser for the decoder.
//!
//! Pushes the decoder Jacobian `J` (w.r.t. the latent features) towards a
//! scaled isometry by penalising the distortion
//!
//! ```text
//! TrG  = E ‖J v‖²
//! TrG2 = E ‖Jᵀ J v‖²
//! term = TrG2 - 2 TrG + 2            v ~ N(0, I)
//! ```
//!
//! evaluated at a few feature vectors mixed with random partners
//! (`alpha ~ U(1 - eta, 1 + eta)`). `J` is estimated with central finite
//! differences in a single batched decoder pass, so the term stays
//! differentiable with respect to both the decoder and the features.

use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Regulariser settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsoConfig {
    /// Add the term to the world-model loss.
    pub enabled: bool,
    /// Multiplier on the term.
    pub scale: f32,
    /// Half-width of the interpolation interval around 1.
    pub eta: f32,
    /// One feature vector is kept per `ratio` rows (at least one).
    pub ratio: usize,
    /// Finite-difference step.
    pub epsilon: f32,
}

impl Default for IsoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: 0.1,
            eta: 0.2,
            ratio: 400,
            epsilon: 1e-2,
        }
    }
}

/// Scaled distortion term for a batch of features.
///
/// # Arguments
///
/// * `decode` - Differentiable map [rows, feat] → [rows, out]
/// * `feat` - Feature vectors [rows, feat]
/// * `config` - Sub-sampling, mixing and step settings
///
/// # Returns
///
/// `iso.scale * (TrG2 - 2 TrG + 2)` as a [1] tensor
pub fn isometry_loss<B, F>(decode: F, feat: Tensor<B, 2>, config: &IsoConfig) -> Tensor<B, 1>
where
    B: Backend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    let [rows, width] = feat.dims();
    let device = feat.device();
    let keep = (rows / config.ratio.max(1)).max(1);

    let mut rng = rand::rng();
    let mut order: Vec<i64> = (0..rows as i64).collect();
    order.shuffle(&mut rng);
    let z = feat.select(0, index_tensor::<B>(&order[..keep], &device));

    let mut pairing: Vec<i64> = (0..keep as i64).collect();
    pairing.shuffle(&mut rng);
    let z_perm = z.clone().select(0, index_tensor::<B>(&pairing, &device));

    let alpha = Tensor::<B, 2>::random(
        [keep, 1],
        Distribution::Uniform(1.0 - config.eta as f64, 1.0 + config.eta as f64),
        &device,
    )
    .repeat_dim(1, width);
    let z_mixed = alpha.clone() * z + (alpha.neg().add_scalar(1.0)) * z_perm;
    let v = Tensor::<B, 2>::random([keep, width], Distribution::Normal(0.0, 1.0), &device);

    let (tr_g, tr_g2) = distortion(decode, z_mixed, v, config.epsilon);
    tracing::trace!(keep, "isometry term evaluated");

    (tr_g2 - tr_g.mul_scalar(2.0)).add_scalar(2.0).mul_scalar(config.scale)
}

/// `(TrG, TrG2)` at the points `z` along the directions `v`.
///
/// # Arguments
///
/// * `decode` - Differentiable map [rows, feat] → [rows, out]
/// * `z` - Evaluation points [bs, feat]
/// * `v` - Probe vectors [bs, feat]
/// * `epsilon` - Finite-difference step
pub fn distortion<B, F>(
    decode: F,
    z: Tensor<B, 2>,
    v: Tensor<B, 2>,
    epsilon: f32,
) -> (Tensor<B, 1>, Tensor<B, 1>)
where
    B: Backend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    let [bs, width] = z.dims();
    let device = z.device();

    // Row (b, i) of the shifted batch is z_b shifted by ±ε along axis i.
    let shift = identity::<B>(width, &device)
        .mul_scalar(epsilon)
        .reshape([1, width, width])
        .repeat_dim(0, bs);
    let base = z.reshape([bs, 1, width]).repeat_dim(1, width);
    let plus = (base.clone() + shift.clone()).reshape([bs * width, width]);
    let minus = (base - shift).reshape([bs * width, width]);

    let out = decode(Tensor::cat(vec![plus, minus], 0));
    let [_, out_dim] = out.dims();
    let diff = out.clone().slice([0..bs * width, 0..out_dim])
        - out.slice([bs * width..2 * bs * width, 0..out_dim]);
    // jt[b, i, o] = ∂ out_o / ∂ z_i at z_b
    let jt = diff.div_scalar(2.0 * epsilon).reshape([bs, width, out_dim]);

    let jv = v.reshape([bs, 1, width]).matmul(jt.clone());
    let jtjv = jt.matmul(jv.clone().reshape([bs, out_dim, 1]));

    let tr_g = jv.powf_scalar(2.0).sum_dim(2).mean();
    let tr_g2 = jtjv.powf_scalar(2.0).sum_dim(1).mean();
    (tr_g, tr_g2)
}

fn identity<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; size * size];
    for i in 0..size {
        values[i * size + i] = 1.0;
    }
    Tensor::from_data(TensorData::new(values, [size, size]), device)
}

fn index_tensor<B: Backend>(indices: &[i64], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(indices.to_vec(), [indices.len()]), device)
}
