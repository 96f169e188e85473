//! Recurrent state-space model.
//!
//! The latent state combines a deterministic GRU path with a stochastic
//! component that is either a diagonal Gaussian or a set of categoricals:
//!
//! ```text
//! prior:      h_t = GRU(h_{t-1}, MLP([z_{t-1}, a_{t-1}]))     p(z_t | h_t)
//! posterior:  q(z_t | h_t, e_t)                               e_t = encode(o_t)
//! ```
//!
//! `img_step` advances with the prior only; `obs_step` additionally conditions
//! on an observation embedding. Both return fresh states and never modify
//! their inputs.

use std::fmt;
use std::str::FromStr;

use burn::module::{Ignored, Module};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation::{sigmoid, softplus};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::algorithms::Dist;
use crate::core::latent::row_keep_mask;
use crate::core::{GruCell, GruCellConfig, LatentLayout, LatentSequence, LatentState, StochParams};
use crate::error::{DreamerError, Result};
use crate::nn::Activation;

// ============================================================================
// Configuration
// ============================================================================

/// Squashing applied to the raw scale output of a Gaussian latent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdAct {
    /// `softplus(x)`.
    Softplus,
    /// `sigmoid(x)`.
    Sigmoid,
    /// `2 * sigmoid(x / 2)`.
    #[default]
    Sigmoid2,
}

impl StdAct {
    fn apply<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Self::Softplus => softplus(x, 1.0),
            Self::Sigmoid => sigmoid(x),
            Self::Sigmoid2 => sigmoid(x.div_scalar(2.0)).mul_scalar(2.0),
        }
    }
}

impl FromStr for StdAct {
    type Err = DreamerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "softplus" => Ok(Self::Softplus),
            "sigmoid" => Ok(Self::Sigmoid),
            "sigmoid2" => Ok(Self::Sigmoid2),
            other => Err(DreamerError::config(
                "rssm.std_act",
                format!("expected softplus, sigmoid or sigmoid2, got `{}`", other),
            )),
        }
    }
}

impl fmt::Display for StdAct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Softplus => "softplus",
            Self::Sigmoid => "sigmoid",
            Self::Sigmoid2 => "sigmoid2",
        })
    }
}

/// KL regulariser settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KlConfig {
    /// Free nats: per-term floor below which the loss gives no gradient.
    pub free: f32,
    /// Use `KL(prior ‖ post)` instead of `KL(post ‖ prior)`.
    pub forward: bool,
    /// Weight of the prior-training term; 0.5 disables balancing.
    pub balance: f32,
    /// Apply the floor to the batch mean instead of to every item.
    pub free_avg: bool,
    /// Multiplier on the final loss.
    pub scale: f32,
}

impl Default for KlConfig {
    fn default() -> Self {
        Self {
            free: 0.0,
            forward: false,
            balance: 0.8,
            free_avg: true,
            scale: 1.0,
        }
    }
}

/// Configuration for [`Rssm`].
#[derive(Debug, Clone)]
pub struct RssmConfig {
    /// Action width.
    pub action_dim: usize,
    /// Observation embedding width.
    pub embed_dim: usize,
    /// Deterministic state width.
    pub deter: usize,
    /// Stochastic dimensions (or categorical groups).
    pub stoch: usize,
    /// Classes per categorical group; 0 selects a Gaussian latent.
    pub discrete: usize,
    /// Width of the hidden dense layers.
    pub hidden: usize,
    /// Number of prior heads; one is picked at random per step.
    pub ensemble: usize,
    /// Hidden activation.
    pub act: Activation,
    /// Layer-normalise the hidden dense layers.
    pub norm: bool,
    /// Scale squashing for Gaussian latents.
    pub std_act: StdAct,
    /// Scale floor for Gaussian latents.
    pub min_std: f32,
}

impl RssmConfig {
    /// Create a config with the reference sizes.
    pub fn new(action_dim: usize, embed_dim: usize) -> Self {
        Self {
            action_dim,
            embed_dim,
            deter: 1024,
            stoch: 32,
            discrete: 32,
            hidden: 1024,
            ensemble: 1,
            act: Activation::Elu,
            norm: false,
            std_act: StdAct::Sigmoid2,
            min_std: 0.1,
        }
    }

    /// Set the deterministic width.
    pub fn with_deter(mut self, deter: usize) -> Self {
        self.deter = deter;
        self
    }

    /// Set the stochastic layout.
    pub fn with_stoch(mut self, stoch: usize, discrete: usize) -> Self {
        self.stoch = stoch;
        self.discrete = discrete;
        self
    }

    /// Set the hidden width.
    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden;
        self
    }

    /// Set the prior ensemble size.
    pub fn with_ensemble(mut self, ensemble: usize) -> Self {
        self.ensemble = ensemble;
        self
    }

    /// Set the hidden activation.
    pub fn with_act(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }

    /// Enable or disable layer normalisation of the dense layers.
    pub fn with_norm(mut self, norm: bool) -> Self {
        self.norm = norm;
        self
    }

    /// Set the Gaussian scale parameterisation.
    pub fn with_std(mut self, std_act: StdAct, min_std: f32) -> Self {
        self.std_act = std_act;
        self.min_std = min_std;
        self
    }

    /// Latent layout described by the config.
    pub fn layout(&self) -> LatentLayout {
        LatentLayout::new(self.stoch, self.discrete)
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Rssm<B> {
        assert!(self.ensemble > 0, "RssmConfig: ensemble must be at least 1");
        let layout = self.layout();
        let dense = |d_in: usize| -> Linear<B> { LinearConfig::new(d_in, self.hidden).init(device) };
        let norm = || -> Option<LayerNorm<B>> {
            self.norm
                .then(|| LayerNormConfig::new(self.hidden).init(device))
        };
        let stats = || -> Linear<B> { LinearConfig::new(self.hidden, layout.stats_size()).init(device) };

        Rssm {
            img_in: dense(layout.stoch_size() + self.action_dim),
            img_in_norm: norm(),
            cell: GruCellConfig::new(self.hidden, self.deter)
                .with_norm(true)
                .init(device),
            img_out: (0..self.ensemble).map(|_| dense(self.deter)).collect(),
            img_out_norm: (0..self.ensemble).filter_map(|_| norm()).collect(),
            img_dist: (0..self.ensemble).map(|_| stats()).collect(),
            obs_out: dense(self.deter + self.embed_dim),
            obs_out_norm: norm(),
            obs_dist: stats(),
            layout: Ignored(layout),
            deter: self.deter,
            action_dim: self.action_dim,
            act: Ignored(self.act),
            std_act: Ignored(self.std_act),
            min_std: self.min_std,
        }
    }
}

// ============================================================================
// Rssm
// ============================================================================

/// Recurrent state-space model.
#[derive(Module, Debug)]
pub struct Rssm<B: Backend> {
    img_in: Linear<B>,
    img_in_norm: Option<LayerNorm<B>>,
    cell: GruCell<B>,
    img_out: Vec<Linear<B>>,
    img_out_norm: Vec<LayerNorm<B>>,
    img_dist: Vec<Linear<B>>,
    obs_out: Linear<B>,
    obs_out_norm: Option<LayerNorm<B>>,
    obs_dist: Linear<B>,
    layout: Ignored<LatentLayout>,
    #[module(skip)]
    deter: usize,
    #[module(skip)]
    action_dim: usize,
    act: Ignored<Activation>,
    std_act: Ignored<StdAct>,
    #[module(skip)]
    min_std: f32,
}

impl<B: Backend> Rssm<B> {
    /// All-zero state for `batch_size` items.
    pub fn initial(&self, batch_size: usize) -> LatentState<B> {
        LatentState::zeros(self.layout.0, self.deter, batch_size, &self.device())
    }

    fn device(&self) -> B::Device {
        self.obs_dist.weight.val().device()
    }

    /// Stochastic layout.
    pub fn layout(&self) -> LatentLayout {
        self.layout.0
    }

    /// Deterministic state width.
    pub fn deter_size(&self) -> usize {
        self.deter
    }

    /// Action width.
    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Width of [`Rssm::get_feat`].
    pub fn feat_size(&self) -> usize {
        self.layout.0.feat_size(self.deter)
    }

    /// Feature vector of a state [rows, feat].
    pub fn get_feat(&self, state: &LatentState<B>) -> Tensor<B, 2> {
        state.feat()
    }

    /// Distribution of the stochastic component of a state.
    pub fn get_dist(&self, state: &LatentState<B>) -> Dist<B> {
        state.dist()
    }

    fn dense(&self, layer: &Linear<B>, norm: Option<&LayerNorm<B>>, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = layer.forward(x);
        if let Some(norm) = norm {
            x = norm.forward(x);
        }
        self.act.0.forward(x)
    }

    fn suff_stats(&self, layer: &Linear<B>, x: Tensor<B, 2>) -> StochParams<B> {
        let x = layer.forward(x);
        match self.layout.0 {
            LatentLayout::Discrete { classes, .. } => StochParams::Categorical { logits: x, classes },
            LatentLayout::Continuous { stoch } => {
                let [rows, _] = x.dims();
                let mean = x.clone().slice([0..rows, 0..stoch]);
                let std = x.slice([0..rows, stoch..2 * stoch]);
                let std = self.std_act.0.apply(std).add_scalar(self.min_std);
                StochParams::Gaussian { mean, std }
            }
        }
    }

    fn draw(stats: &StochParams<B>, sample: bool) -> Tensor<B, 2> {
        let dist = stats.dist();
        if sample {
            dist.sample()
        } else {
            dist.mode()
        }
    }

    /// Prediction-only transition.
    ///
    /// # Arguments
    ///
    /// * `prev` - State at the previous step
    /// * `action` - Action taken from `prev` [rows, action_dim]
    /// * `sample` - Sample the new stochastic state instead of taking the mode
    ///
    /// # Returns
    ///
    /// Prior state for the next step
    pub fn img_step(&self, prev: &LatentState<B>, action: Tensor<B, 2>, sample: bool) -> LatentState<B> {
        debug_assert_eq!(action.dims()[1], self.action_dim, "img_step: action width");
        let x = Tensor::cat(vec![prev.stoch.clone(), action], 1);
        let x = self.dense(&self.img_in, self.img_in_norm.as_ref(), x);
        let deter = self.cell.step(x, prev.deter.clone());

        let member = if self.img_out.len() > 1 {
            rand::rng().random_range(0..self.img_out.len())
        } else {
            0
        };
        let x = self.dense(
            &self.img_out[member],
            self.img_out_norm.get(member),
            deter.clone(),
        );
        let stats = self.suff_stats(&self.img_dist[member], x);
        let stoch = Self::draw(&stats, sample);

        LatentState { stats, stoch, deter }
    }

    /// Observation-conditioned transition.
    ///
    /// Items flagged in `is_first` start from the initial state and a zero
    /// action regardless of `prev` and `prev_action`.
    ///
    /// # Arguments
    ///
    /// * `prev` - Posterior at the previous step
    /// * `prev_action` - Action taken from `prev` [rows, action_dim]
    /// * `embed` - Embedding of the current observation [rows, embed]
    /// * `is_first` - Episode-start flags [rows]
    /// * `sample` - Sample the posterior instead of taking its mode
    ///
    /// # Returns
    ///
    /// `(posterior, prior)`, sharing the same deterministic state
    pub fn obs_step(
        &self,
        prev: &LatentState<B>,
        prev_action: Tensor<B, 2>,
        embed: Tensor<B, 2>,
        is_first: Tensor<B, 1, Bool>,
        sample: bool,
    ) -> (LatentState<B>, LatentState<B>) {
        let prev = prev.clone().reset_rows(is_first.clone());
        let keep = row_keep_mask(is_first).repeat_dim(1, self.action_dim);
        let prev_action = prev_action * keep;

        let prior = self.img_step(&prev, prev_action, sample);
        let x = Tensor::cat(vec![prior.deter.clone(), embed], 1);
        let x = self.dense(&self.obs_out, self.obs_out_norm.as_ref(), x);
        let stats = self.suff_stats(&self.obs_dist, x);
        let stoch = Self::draw(&stats, sample);

        let post = LatentState {
            stats,
            stoch,
            deter: prior.deter.clone(),
        };
        (post, prior)
    }

    /// Filter a sequence of observations.
    ///
    /// # Arguments
    ///
    /// * `embed` - Embeddings [T, N, embed]
    /// * `action` - Actions [T, N, action_dim]; `action[t]` led to step `t`
    /// * `is_first` - Episode-start flags [T, N]
    /// * `state` - State before step 0, zeros when `None`
    ///
    /// # Returns
    ///
    /// `(posteriors, priors)`, each `T` steps long
    pub fn observe(
        &self,
        embed: Tensor<B, 3>,
        action: Tensor<B, 3>,
        is_first: Tensor<B, 2, Bool>,
        state: Option<LatentState<B>>,
    ) -> (LatentSequence<B>, LatentSequence<B>) {
        let [steps, batch, e] = embed.dims();
        let [action_steps, action_batch, a] = action.dims();
        assert_eq!(
            [action_steps, action_batch],
            [steps, batch],
            "observe: action shape mismatch"
        );
        assert_eq!(is_first.dims(), [steps, batch], "observe: is_first shape mismatch");

        let mut state = state.unwrap_or_else(|| self.initial(batch));
        let mut posts = Vec::with_capacity(steps);
        let mut priors = Vec::with_capacity(steps);

        for t in 0..steps {
            let embed_t = embed.clone().slice([t..t + 1, 0..batch, 0..e]).reshape([batch, e]);
            let action_t = action.clone().slice([t..t + 1, 0..batch, 0..a]).reshape([batch, a]);
            let first_t = is_first.clone().slice([t..t + 1, 0..batch]).reshape([batch]);

            let (post, prior) = self.obs_step(&state, action_t, embed_t, first_t, true);
            posts.push(post.clone());
            priors.push(prior);
            state = post;
        }

        (LatentSequence::stack(posts), LatentSequence::stack(priors))
    }

    /// Roll the prior forward under a fixed action sequence.
    ///
    /// # Arguments
    ///
    /// * `action` - Actions [T, N, action_dim]
    /// * `state` - Starting state, zeros when `None`
    pub fn imagine(&self, action: Tensor<B, 3>, state: Option<LatentState<B>>) -> LatentSequence<B> {
        let [steps, batch, a] = action.dims();
        let mut state = state.unwrap_or_else(|| self.initial(batch));
        let mut priors = Vec::with_capacity(steps);

        for t in 0..steps {
            let action_t = action.clone().slice([t..t + 1, 0..batch, 0..a]).reshape([batch, a]);
            state = self.img_step(&state, action_t, true);
            priors.push(state.clone());
        }

        LatentSequence::stack(priors)
    }

    /// Balanced KL regulariser between posteriors and priors.
    ///
    /// # Returns
    ///
    /// `(loss, value)`: the scalar loss [1] and the per-item divergence
    /// `KL(lhs ‖ rhs)` [T, N]
    pub fn kl_loss(
        &self,
        post: &LatentSequence<B>,
        prior: &LatentSequence<B>,
        config: &KlConfig,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let (steps, batch) = (post.steps(), post.batch());
        let post_dist = post.flat().dist();
        let prior_dist = prior.flat().dist();

        let (lhs, rhs) = if config.forward {
            (prior_dist, post_dist)
        } else {
            (post_dist, prior_dist)
        };
        let mix = if config.forward {
            config.balance
        } else {
            1.0 - config.balance
        };

        let (loss, value) = if config.balance == 0.5 {
            let value = lhs.kl(&rhs);
            let loss = value.clone().clamp_min(config.free).mean();
            (loss, value)
        } else {
            let value_lhs = lhs.kl(&rhs.clone().detach());
            let value_rhs = lhs.detach().kl(&rhs);
            let floor = |term: Tensor<B, 1>| {
                if config.free_avg {
                    term.mean().clamp_min(config.free)
                } else {
                    term.clamp_min(config.free).mean()
                }
            };
            let loss = floor(value_lhs.clone()).mul_scalar(mix)
                + floor(value_rhs).mul_scalar(1.0 - mix);
            (loss, value_lhs)
        };

        let loss = loss.mul_scalar(config.scale);
        assert_eq!(loss.dims(), [1], "kl_loss: loss must be a scalar");
        (loss, value.reshape([steps, batch]))
    }
}
