//! World model: encoder, RSSM and prediction heads trained jointly.
//!
//! ```text
//! batch ──preprocess──► encode ──► observe ──► post/prior ──► kl_loss
//!                                     │
//!                                     └─ feat ──► decoder / reward / discount ──► -log p(data)
//!                                                     └─► isometry term
//! ```
//!
//! Heads not listed in `grad_heads` see detached features, so their losses
//! only train the heads themselves.

use std::collections::BTreeMap;

use burn::module::{AutodiffModule, Ignored, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Bool, Tensor};

use super::batch::{Batch, ClipRewards, Prepared};
use super::isometry::{isometry_loss, IsoConfig};
use super::rssm::{KlConfig, Rssm};
use crate::algorithms::{discount_weights, Dist};
use crate::core::{LatentSequence, LatentState};
use crate::error::{DreamerError, Result};
use crate::metrics::{tensor_scalar, Metrics};
use crate::nn::{Decoder, Encoder, MlpHead, PredictionHead};
use crate::optim::ModuleOptimizer;

/// Registered head names.
pub const HEAD_NAMES: [&str; 3] = ["decoder", "reward", "discount"];

// ============================================================================
// Settings
// ============================================================================

/// Loss and preprocessing settings of the world model.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldModelSettings {
    /// KL regulariser.
    pub kl: KlConfig,
    /// Isometry regulariser.
    pub iso: IsoConfig,
    /// Multiplier per loss term; missing terms weigh 1.
    pub loss_scales: BTreeMap<String, f32>,
    /// Heads whose losses train the representation.
    pub grad_heads: Vec<String>,
    /// Reward transformation before it becomes a target.
    pub clip_rewards: ClipRewards,
    /// Discount of non-terminal steps.
    pub discount: f32,
}

impl Default for WorldModelSettings {
    fn default() -> Self {
        Self {
            kl: KlConfig::default(),
            iso: IsoConfig::default(),
            loss_scales: BTreeMap::new(),
            grad_heads: HEAD_NAMES.iter().map(|h| h.to_string()).collect(),
            clip_rewards: ClipRewards::Tanh,
            discount: 0.99,
        }
    }
}

impl WorldModelSettings {
    /// Weight of the loss term `name`.
    pub fn loss_scale(&self, name: &str) -> f32 {
        self.loss_scales.get(name).copied().unwrap_or(1.0)
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Intermediate results of [`WorldModel::loss`].
#[derive(Debug, Clone)]
pub struct WorldModelOutput<B: Backend> {
    /// Observation embeddings [T, N, embed].
    pub embed: Tensor<B, 3>,
    /// Posterior features [T * N, feat].
    pub feat: Tensor<B, 2>,
    /// Posterior states.
    pub post: LatentSequence<B>,
    /// Prior states.
    pub prior: LatentSequence<B>,
    /// Log-likelihood per predicted field [T * N].
    pub likes: BTreeMap<String, Tensor<B, 1>>,
    /// Per-item KL divergence [T, N].
    pub kl: Tensor<B, 2>,
    /// Scaled isometry term, when enabled.
    pub iso: Option<Tensor<B, 1>>,
}

/// Rollout of the prior under a policy.
///
/// Every per-step field holds `horizon + 1` steps; step 0 is the start state.
#[derive(Debug, Clone)]
pub struct ImaginedTrajectory<B: Backend> {
    /// States, time-major.
    pub states: LatentSequence<B>,
    /// Features [(H + 1) * R, feat].
    pub feat: Tensor<B, 2>,
    /// Actions that led to each step; zero at step 0 [H + 1, R, A].
    pub action: Tensor<B, 3>,
    /// Discounts [H + 1, R].
    pub discount: Tensor<B, 2>,
    /// Detached cumulative discounts [H + 1, R].
    pub weight: Tensor<B, 2>,
    /// Rewards, filled in by the caller [H + 1, R].
    pub reward: Option<Tensor<B, 2>>,
}

impl<B: Backend> ImaginedTrajectory<B> {
    /// Number of steps, `horizon + 1`.
    pub fn steps(&self) -> usize {
        self.states.steps()
    }

    /// Number of parallel rollouts.
    pub fn rows(&self) -> usize {
        self.states.batch()
    }

    /// Features of steps `start..end` [(end - start) * R, feat].
    pub fn feat_steps(&self, start: usize, end: usize) -> Tensor<B, 2> {
        let rows = self.rows();
        let [_, width] = self.feat.dims();
        self.feat.clone().slice([start * rows..end * rows, 0..width])
    }

    /// Actions of steps `start..end` [(end - start) * R, A].
    pub fn action_steps(&self, start: usize, end: usize) -> Tensor<B, 2> {
        let [_, rows, a] = self.action.dims();
        self.action
            .clone()
            .slice([start..end, 0..rows, 0..a])
            .reshape([(end - start) * rows, a])
    }
}

/// Reconstruction of a sequence from a short observed context.
#[derive(Debug, Clone)]
pub struct OpenLoopPrediction<B: Backend> {
    /// Recorded observation [T, N, F].
    pub truth: Tensor<B, 3>,
    /// Posterior reconstructions for the context, prior predictions after it
    /// [T, N, F].
    pub model: Tensor<B, 3>,
    /// Number of observed steps.
    pub context: usize,
}

impl<B: Backend> OpenLoopPrediction<B> {
    /// Mean squared error per step [T].
    pub fn error(&self) -> Tensor<B, 1> {
        let [steps, _, _] = self.truth.dims();
        (self.model.clone() - self.truth.clone())
            .powf_scalar(2.0)
            .mean_dim(2)
            .mean_dim(1)
            .reshape([steps])
    }
}

// ============================================================================
// WorldModel
// ============================================================================

/// Latent dynamics model with its observation-side networks.
#[derive(Module, Debug)]
pub struct WorldModel<B: Backend, E, D> {
    /// Observation encoder.
    pub encoder: E,
    /// Latent dynamics.
    pub rssm: Rssm<B>,
    /// Observation decoder.
    pub decoder: D,
    /// Reward predictor.
    pub reward: MlpHead<B>,
    /// Continuation predictor.
    pub discount: Option<MlpHead<B>>,
    settings: Ignored<WorldModelSettings>,
}

impl<B, E, D> WorldModel<B, E, D>
where
    B: Backend,
    E: Encoder<B>,
    D: Decoder<B>,
{
    /// Assemble a world model.
    ///
    /// # Errors
    ///
    /// [`DreamerError::UnknownHead`] when `grad_heads` names a head that is
    /// not registered.
    pub fn new(
        encoder: E,
        rssm: Rssm<B>,
        decoder: D,
        reward: MlpHead<B>,
        discount: Option<MlpHead<B>>,
        settings: WorldModelSettings,
    ) -> Result<Self> {
        for name in &settings.grad_heads {
            let registered = match name.as_str() {
                "decoder" | "reward" => true,
                "discount" => discount.is_some(),
                _ => false,
            };
            if !registered {
                return Err(DreamerError::UnknownHead(name.clone()));
            }
        }

        Ok(Self {
            encoder,
            rssm,
            decoder,
            reward,
            discount,
            settings: Ignored(settings),
        })
    }

    /// Loss and preprocessing settings.
    pub fn settings(&self) -> &WorldModelSettings {
        &self.settings.0
    }

    fn heads(&self) -> Vec<(&'static str, &dyn PredictionHead<B>)> {
        let mut heads: Vec<(&'static str, &dyn PredictionHead<B>)> =
            vec![("decoder", &self.decoder), ("reward", &self.reward)];
        if let Some(discount) = &self.discount {
            heads.push(("discount", discount));
        }
        heads
    }

    /// Clip rewards and derive discounts from terminal flags.
    pub fn preprocess(&self, batch: &Batch<B>) -> Prepared<B> {
        Prepared::new(batch.clone(), self.settings.clip_rewards, self.settings.discount)
    }

    /// Representation loss on a batch of sequences.
    ///
    /// # Arguments
    ///
    /// * `batch` - Time-major training sequences
    /// * `state` - Posterior preceding the first step, zeros when `None`
    ///
    /// # Returns
    ///
    /// `(loss, last_state, outputs, metrics)`; `last_state` is the detached
    /// posterior of the final step, ready to seed the next call.
    pub fn loss(
        &self,
        batch: &Batch<B>,
        state: Option<LatentState<B>>,
    ) -> Result<(Tensor<B, 1>, LatentState<B>, WorldModelOutput<B>, Metrics)> {
        let data = self.preprocess(batch);
        let embed = self.encoder.encode(&data.obs)?;
        let (post, prior) = self.rssm.observe(
            embed.clone(),
            data.action.clone(),
            data.is_first.clone(),
            state,
        );
        let (kl_loss, kl_value) = self.rssm.kl_loss(&post, &prior, &self.settings.kl);

        let feat = post.feat();
        let mut losses: BTreeMap<String, Tensor<B, 1>> = BTreeMap::new();
        losses.insert("kl".to_string(), kl_loss);

        let mut likes = BTreeMap::new();
        for (name, head) in self.heads() {
            let trains_repr = self.settings.grad_heads.iter().any(|h| h == name);
            let input = if trains_repr {
                feat.clone()
            } else {
                feat.clone().detach()
            };
            for (key, dist) in head.predict(input).into_named(name) {
                let like = dist.log_prob(data.field(&key)?);
                losses.insert(key.clone(), like.clone().mean().neg());
                likes.insert(key, like);
            }
        }

        let iso = self.settings.iso.enabled.then(|| {
            isometry_loss(
                |z| self.decoder.decode_mean(z),
                feat.clone(),
                &self.settings.iso,
            )
        });
        if let Some(iso) = &iso {
            losses.insert("iso".to_string(), iso.clone());
        }

        let mut metrics = Metrics::new();
        let mut total: Option<Tensor<B, 1>> = None;
        for (name, term) in &losses {
            metrics.insert(format!("{}_loss", name), tensor_scalar(term.clone()));
            let scaled = term.clone().mul_scalar(self.settings.loss_scale(name));
            total = Some(match total {
                Some(acc) => acc + scaled,
                None => scaled,
            });
        }
        // "kl" is always present
        let total = total.unwrap_or_else(|| Tensor::zeros([1], &feat.device()));

        metrics.insert("model_kl", tensor_scalar(kl_value.clone().mean()));
        metrics.insert("prior_ent", tensor_scalar(prior.flat().dist().entropy().mean()));
        metrics.insert("post_ent", tensor_scalar(post.flat().dist().entropy().mean()));
        tracing::debug!(terms = losses.len(), "world model loss computed");

        let last_state = post.last().detach();
        let outputs = WorldModelOutput {
            embed,
            feat,
            post,
            prior,
            likes,
            kl: kl_value,
            iso,
        };
        Ok((total, last_state, outputs, metrics))
    }

    /// Roll the prior forward from `start` under `policy`.
    ///
    /// # Arguments
    ///
    /// * `policy` - Maps detached features [R, feat] to an action distribution
    /// * `start` - Start states, one per rollout; detached before use
    /// * `is_terminal` - Terminal flags of the start states [R]
    /// * `horizon` - Number of imagined steps
    pub fn imagine<P>(
        &self,
        mut policy: P,
        start: &LatentState<B>,
        is_terminal: Option<Tensor<B, 1, Bool>>,
        horizon: usize,
    ) -> ImaginedTrajectory<B>
    where
        P: FnMut(Tensor<B, 2>) -> Dist<B>,
    {
        let rows = start.rows();
        let device = start.deter.device();
        let mut state = start.clone().detach();
        let mut states = Vec::with_capacity(horizon + 1);
        let mut actions = Vec::with_capacity(horizon + 1);
        states.push(state.clone());
        actions.push(Tensor::<B, 2>::zeros([rows, self.rssm.action_dim()], &device));

        for _ in 0..horizon {
            let action = policy(state.feat().detach()).sample();
            state = self.rssm.img_step(&state, action.clone(), true);
            states.push(state.clone());
            actions.push(action);
        }

        let steps = horizon + 1;
        let states = LatentSequence::stack(states);
        let feat = states.feat();
        let action = Tensor::stack::<3>(actions, 0);

        let discount = match &self.discount {
            Some(head) => {
                let predicted = head.forward(feat.clone()).mean().reshape([steps, rows]);
                match is_terminal {
                    Some(terminal) => {
                        let first = terminal
                            .bool_not()
                            .float()
                            .mul_scalar(self.settings.discount)
                            .reshape([1, rows]);
                        if steps > 1 {
                            Tensor::cat(vec![first, predicted.slice([1..steps, 0..rows])], 0)
                        } else {
                            first
                        }
                    }
                    None => predicted,
                }
            }
            None => Tensor::ones([steps, rows], &device).mul_scalar(self.settings.discount),
        };
        let weight = discount_weights(discount.clone().detach()).detach();

        ImaginedTrajectory {
            states,
            feat,
            action,
            discount,
            weight,
            reward: None,
        }
    }

    /// Observe the first `context` steps, then predict the rest open-loop
    /// from the recorded actions.
    ///
    /// # Errors
    ///
    /// [`DreamerError::MissingField`] when neither the batch nor the decoder
    /// provides `key`.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < context < T`.
    pub fn open_loop(
        &self,
        batch: &Batch<B>,
        context: usize,
        key: &str,
    ) -> Result<OpenLoopPrediction<B>> {
        let data = self.preprocess(batch);
        let (steps, n) = (data.steps(), data.batch());
        assert!(
            context > 0 && context < steps,
            "open_loop: context {} must lie in 1..{}",
            context,
            steps
        );
        let truth = data
            .obs
            .get(key)
            .cloned()
            .ok_or_else(|| DreamerError::MissingField(key.to_string()))?;

        let embed = self.encoder.encode(&data.obs)?;
        let [_, _, e] = embed.dims();
        let [_, _, a] = data.action.dims();
        let (post, _) = self.rssm.observe(
            embed.slice([0..context, 0..n, 0..e]),
            data.action.clone().slice([0..context, 0..n, 0..a]),
            data.is_first.clone().slice([0..context, 0..n]),
            None,
        );
        let prior = self.rssm.imagine(
            data.action.clone().slice([context..steps, 0..n, 0..a]),
            Some(post.last()),
        );

        let recon = self.decode_field(post.feat(), key)?;
        let openl = self.decode_field(prior.feat(), key)?;
        let [_, f] = recon.dims();
        let model = Tensor::cat(vec![recon, openl], 0).reshape([steps, n, f]);

        Ok(OpenLoopPrediction {
            truth,
            model,
            context,
        })
    }

    fn decode_field(&self, feat: Tensor<B, 2>, key: &str) -> Result<Tensor<B, 2>> {
        self.decoder
            .predict(feat)
            .into_named("decoder")
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, dist)| dist.mode())
            .ok_or_else(|| DreamerError::MissingField(key.to_string()))
    }
}

impl<B, E, D> WorldModel<B, E, D>
where
    B: AutodiffBackend,
    E: Encoder<B>,
    D: Decoder<B>,
    Self: AutodiffModule<B>,
{
    /// One gradient step on the representation loss.
    ///
    /// # Returns
    ///
    /// `(model, last_state, outputs, metrics)` with the optimizer metrics
    /// (`model_loss`, `model_grad_steps`, `model_lr`) merged in.
    pub fn train(
        self,
        batch: &Batch<B>,
        state: Option<LatentState<B>>,
        optimizer: &mut ModuleOptimizer<B, Self>,
        step: u64,
    ) -> Result<(Self, LatentState<B>, WorldModelOutput<B>, Metrics)> {
        let (loss, last_state, outputs, mut metrics) = self.loss(batch, state)?;
        let (model, opt_metrics) = optimizer.apply(loss, self, step);
        metrics.extend(opt_metrics);
        Ok((model, last_state, outputs, metrics))
    }
}
