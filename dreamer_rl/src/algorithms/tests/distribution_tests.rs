//! Statistical and gradient-path tests for [`Dist`].
//!
//! Sample statistics use large batches with loose tolerances; gradient tests
//! run on `Autodiff<NdArray>` and only check which inputs receive gradient.

use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Tensor, TensorData};

use crate::algorithms::distributions::Dist;

type B = NdArray<f32>;
type AB = Autodiff<NdArray<f32>>;

fn column<Bk: burn::tensor::backend::Backend>(value: f32, rows: usize) -> Tensor<Bk, 2> {
    Tensor::from_data(TensorData::new(vec![value; rows], [rows, 1]), &Default::default())
}

fn mean_and_std(values: &[f32]) -> (f32, f32) {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

// ============================================================================
// Sampling statistics
// ============================================================================

#[test]
fn test_normal_sample_moments() {
    let dist = Dist::<B>::normal(column(2.0, 20_000), column(0.5, 20_000));
    let samples = dist.sample().into_data().to_vec::<f32>().unwrap();
    let (mean, std) = mean_and_std(&samples);
    assert!((mean - 2.0).abs() < 0.03, "sample mean {}", mean);
    assert!((std - 0.5).abs() < 0.03, "sample std {}", std);
}

#[test]
fn test_trunc_normal_sample_mean_matches_analytic_mean() {
    let dist = Dist::<B>::trunc_normal(column(0.6, 20_000), column(0.8, 20_000), -1.0, 1.0);
    let samples = dist.sample().into_data().to_vec::<f32>().unwrap();
    let (mean, _) = mean_and_std(&samples);
    let analytic = dist.mean().into_data().to_vec::<f32>().unwrap()[0];
    assert!(
        (mean - analytic).abs() < 0.03,
        "sample mean {} vs analytic {}",
        mean,
        analytic
    );
    assert!(analytic < 0.6, "truncation at 1 should pull the mean below loc");
}

#[test]
fn test_bernoulli_sample_frequency() {
    // sigmoid(ln 3) = 0.75
    let dist = Dist::<B>::bernoulli(column(3.0f32.ln(), 20_000));
    let samples = dist.sample().into_data().to_vec::<f32>().unwrap();
    let (mean, _) = mean_and_std(&samples);
    assert!((mean - 0.75).abs() < 0.02, "frequency {}", mean);
    assert!(samples.iter().all(|v| *v == 0.0 || *v == 1.0));
}

#[test]
fn test_one_hot_sample_frequency_follows_probabilities() {
    let rows = 10_000;
    let logits: Vec<f32> = (0..rows).flat_map(|_| [0.0, 0.0, 2.0f32.ln()]).collect();
    let dist = Dist::<B>::one_hot(
        Tensor::from_data(TensorData::new(logits, [rows, 3]), &Default::default()),
        3,
    );
    let samples = dist.sample().into_data().to_vec::<f32>().unwrap();
    let third: f32 = samples.iter().skip(2).step_by(3).sum::<f32>() / rows as f32;
    // probabilities are 1/4, 1/4, 1/2
    assert!((third - 0.5).abs() < 0.03, "frequency of class 2: {}", third);
}

// ============================================================================
// Gradient paths
// ============================================================================

#[test]
fn test_normal_sample_is_reparameterised() {
    let device = Default::default();
    let mean = Tensor::<AB, 2>::zeros([4, 2], &device).require_grad();
    let std = Tensor::<AB, 2>::ones([4, 2], &device).require_grad();
    let dist = Dist::normal(mean.clone(), std.clone());

    let grads = dist.sample().sum().backward();
    let mean_grad = mean.grad(&grads).expect("mean gets a gradient");
    for g in mean_grad.into_data().to_vec::<f32>().unwrap() {
        assert!((g - 1.0).abs() < 1e-6, "d sample / d mean should be 1, got {}", g);
    }
    assert!(std.grad(&grads).is_some());
}

#[test]
fn test_one_hot_sample_has_straight_through_gradient() {
    let device = Default::default();
    let logits = Tensor::<AB, 2>::from_data(
        TensorData::new(vec![0.5, -0.5, 0.0, 1.0], [1, 4]),
        &device,
    )
    .require_grad();
    let weights = Tensor::<AB, 2>::from_data(
        TensorData::new(vec![1.0, 2.0, 3.0, 4.0], [1, 4]),
        &device,
    );
    let dist = Dist::one_hot(logits.clone(), 4);

    let grads = (dist.sample() * weights).sum().backward();
    let grad = logits.grad(&grads).expect("logits get a gradient");
    let total: f32 = grad
        .into_data()
        .to_vec::<f32>()
        .unwrap()
        .iter()
        .map(|g| g.abs())
        .sum();
    assert!(total > 1e-4, "straight-through gradient vanished");
}

#[test]
fn test_detach_blocks_gradient() {
    let device = Default::default();
    let mean = Tensor::<AB, 2>::zeros([2, 1], &device).require_grad();
    let dist = Dist::mse(mean.clone()).detach();
    let value = Tensor::<AB, 2>::ones([2, 1], &device).require_grad();

    let grads = dist.log_prob(value.clone()).sum().backward();
    assert!(mean.grad(&grads).is_none(), "detached parameters must not receive gradient");
    assert!(value.grad(&grads).is_some());
}

#[test]
fn test_kl_is_non_negative_for_random_normals() {
    let device = Default::default();
    let mp = Tensor::<B, 2>::random([64, 3], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
    let mq = Tensor::<B, 2>::random([64, 3], burn::tensor::Distribution::Normal(0.0, 1.0), &device);
    let sp = Tensor::<B, 2>::random([64, 3], burn::tensor::Distribution::Uniform(0.1, 2.0), &device);
    let sq = Tensor::<B, 2>::random([64, 3], burn::tensor::Distribution::Uniform(0.1, 2.0), &device);
    let kl = Dist::normal(mp, sp).kl(&Dist::normal(mq, sq));
    for v in kl.into_data().to_vec::<f32>().unwrap() {
        assert!(v >= -1e-5, "kl must be non-negative, got {}", v);
    }
}
