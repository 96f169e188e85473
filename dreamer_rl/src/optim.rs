//! Named Adam wrapper with clipping, weight decay and a scheduled learning rate.

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

use crate::metrics::{tensor_scalar, Metrics};
use crate::scheduling::Schedule;

/// Optimizer hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Learning rate as a function of the global step.
    pub lr: Schedule,
    /// Adam epsilon.
    pub eps: f32,
    /// Per-parameter gradient norm limit; 0 disables clipping.
    pub clip: f32,
    /// L2 penalty; 0 disables weight decay.
    pub wd: f32,
}

impl OptimizerConfig {
    /// Create a config with the given learning rate schedule.
    pub fn new(lr: Schedule) -> Self {
        Self {
            lr,
            eps: 1e-5,
            clip: 100.0,
            wd: 1e-6,
        }
    }

    /// Set the Adam epsilon.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set the clipping norm.
    pub fn with_clip(mut self, clip: f32) -> Self {
        self.clip = clip;
        self
    }

    /// Set the weight decay.
    pub fn with_wd(mut self, wd: f32) -> Self {
        self.wd = wd;
        self
    }

    fn adam(&self) -> AdamConfig {
        let mut config = AdamConfig::new().with_epsilon(self.eps);
        if self.clip > 0.0 {
            config = config.with_grad_clipping(Some(GradientClippingConfig::Norm(self.clip)));
        }
        if self.wd > 0.0 {
            config = config.with_weight_decay(Some(WeightDecayConfig::new(self.wd)));
        }
        config
    }
}

/// Adam state for one module plus the bookkeeping to report on it.
///
/// Metrics are keyed by the optimizer name: `{name}_loss`,
/// `{name}_grad_steps` and `{name}_lr`.
pub struct ModuleOptimizer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    name: String,
    config: OptimizerConfig,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    grad_steps: u64,
}

impl<B, M> ModuleOptimizer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    /// Create a fresh optimizer.
    pub fn new(name: impl Into<String>, config: OptimizerConfig) -> Self {
        let optimizer = config.adam().init();
        Self {
            name: name.into(),
            config,
            optimizer,
            grad_steps: 0,
        }
    }

    /// Name used as the metric prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of updates applied so far.
    pub fn grad_steps(&self) -> u64 {
        self.grad_steps
    }

    /// Learning rate at `step`.
    pub fn lr(&self, step: u64) -> f64 {
        self.config.lr.value(step)
    }

    /// Backpropagate `loss` and update `module`.
    ///
    /// # Arguments
    ///
    /// * `loss` - Scalar loss [1]
    /// * `module` - Module whose parameters receive the update
    /// * `step` - Global step used to evaluate the learning rate
    ///
    /// # Returns
    ///
    /// The updated module and the optimizer metrics
    pub fn apply(&mut self, loss: Tensor<B, 1>, module: M, step: u64) -> (M, Metrics) {
        let value = tensor_scalar(loss.clone());
        let grads = GradientsParams::from_grads(loss.backward(), &module);
        let lr = self.lr(step);
        let module = self.optimizer.step(lr, module, grads);
        self.grad_steps += 1;

        let mut metrics = Metrics::new();
        metrics.insert(format!("{}_loss", self.name), value);
        metrics.insert(format!("{}_grad_steps", self.name), self.grad_steps as f64);
        metrics.insert(format!("{}_lr", self.name), lr);
        (module, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};

    type B = Autodiff<NdArray<f32>>;

    #[test]
    fn test_apply_moves_parameters_and_reports() {
        let device = Default::default();
        let linear: Linear<B> = LinearConfig::new(3, 1).init(&device);
        let before = linear.weight.val().into_data();

        let mut opt = ModuleOptimizer::new("model", OptimizerConfig::new(Schedule::Constant(1e-2)));
        let x = Tensor::<B, 2>::ones([4, 3], &device);
        let loss = linear.forward(x).powf_scalar(2.0).mean();
        let (linear, metrics) = opt.apply(loss, linear, 0);

        assert_ne!(linear.weight.val().into_data(), before);
        assert_eq!(metrics.get("model_grad_steps"), Some(1.0));
        assert!(metrics.contains("model_loss"));
        assert!((metrics.get("model_lr").unwrap() - 1e-2).abs() < 1e-12);
        assert_eq!(opt.grad_steps(), 1);
    }

    #[test]
    fn test_scheduled_learning_rate() {
        let config = OptimizerConfig::new("linear(1e-3,0,10)".parse().unwrap());
        let opt: ModuleOptimizer<B, Linear<B>> = ModuleOptimizer::new("actor", config);
        assert!((opt.lr(0) - 1e-3).abs() < 1e-12);
        assert!((opt.lr(5) - 5e-4).abs() < 1e-12);
        assert!(opt.lr(20).abs() < 1e-12);
    }
}
