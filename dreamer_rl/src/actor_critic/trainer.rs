//! Actor-critic trained on imagined trajectories.
//!
//! Index alignment over an imagined trajectory of `H + 1` steps:
//!
//! ```text
//! Actions:      0   [a1]  [a2]   a3
//! States:     [z0]->[z1]-> z2 -> z3
//! Targets:     t0   [t1]  [t2]
//! Baselines:  [v0]  [v1]   v2    v3
//! Weights:    [ 1]  [w1]   w2    w3
//! Actor loss:        l1    l2
//! Critic loss: l0    l1    l2
//! ```
//!
//! The actor loses two states at the end (bootstrap value, dangling action)
//! and one target at the start (the start state was not imagined).

use burn::module::Module;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Bool, Tensor};
use tracing::debug;

use crate::algorithms::lambda_return;
use crate::config::ActorGrad;
use crate::core::{LatentState, SlowTarget, SlowTargetConfig, StreamNorm, StreamNormConfig};
use crate::metrics::{tensor_scalar, Metrics};
use crate::nn::{Decoder, Encoder, MlpHead};
use crate::optim::{ModuleOptimizer, OptimizerConfig};
use crate::scheduling::Schedule;
use crate::world_model::{ImaginedTrajectory, WorldModel};

/// Behaviour-learning settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorCriticSettings {
    /// λ of the λ-return.
    pub lambda: f32,
    /// Imagined steps per start state.
    pub horizon: usize,
    /// Actor gradient estimator.
    pub actor_grad: ActorGrad,
    /// Weight of the dynamics objective when `actor_grad` is `Both`.
    pub actor_grad_mix: Schedule,
    /// Entropy bonus scale.
    pub actor_ent: Schedule,
    /// Target critic cadence.
    pub slow_target: SlowTargetConfig,
    /// Imagined reward normalisation.
    pub reward_norm: StreamNormConfig,
}

impl Default for ActorCriticSettings {
    fn default() -> Self {
        Self {
            lambda: 0.95,
            horizon: 15,
            actor_grad: ActorGrad::Dynamics,
            actor_grad_mix: Schedule::Constant(0.1),
            actor_ent: Schedule::Constant(2e-3),
            slow_target: SlowTargetConfig::default(),
            reward_norm: StreamNormConfig::default(),
        }
    }
}

/// Policy and value function with their optimizers and target critic.
pub struct ActorCritic<B: AutodiffBackend> {
    /// Policy over actions given features.
    pub actor: MlpHead<B>,
    /// State-value estimate given features.
    pub critic: MlpHead<B>,
    target_critic: SlowTarget<MlpHead<B>>,
    actor_opt: ModuleOptimizer<B, MlpHead<B>>,
    critic_opt: ModuleOptimizer<B, MlpHead<B>>,
    reward_norm: StreamNorm,
    settings: ActorCriticSettings,
}

impl<B: AutodiffBackend> ActorCritic<B> {
    /// Wrap freshly initialised networks.
    ///
    /// The target critic starts as a copy of `critic`.
    pub fn new(
        actor: MlpHead<B>,
        critic: MlpHead<B>,
        settings: ActorCriticSettings,
        actor_opt: OptimizerConfig,
        critic_opt: OptimizerConfig,
    ) -> Self {
        let target_critic = SlowTarget::new(settings.slow_target, critic.clone().no_grad());
        Self {
            actor,
            critic,
            target_critic,
            actor_opt: ModuleOptimizer::new("actor", actor_opt),
            critic_opt: ModuleOptimizer::new("critic", critic_opt),
            reward_norm: StreamNorm::new(settings.reward_norm),
            settings,
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &ActorCriticSettings {
        &self.settings
    }

    /// Module that produces value targets.
    pub fn target_critic(&self) -> &MlpHead<B> {
        self.target_critic.get(&self.critic)
    }

    /// Magnitude estimate of the reward normaliser.
    pub fn reward_magnitude(&self) -> f64 {
        self.reward_norm.magnitude()
    }

    /// One update of actor and critic on trajectories imagined from `start`.
    ///
    /// # Arguments
    ///
    /// * `world_model` - Model to imagine with; its parameters are not updated
    /// * `start` - Start states, one per trajectory
    /// * `is_terminal` - Terminal flags of the start states
    /// * `reward_fn` - Rewards of an imagined trajectory [H + 1, R]
    /// * `step` - Global step for schedules and learning rates
    pub fn train<E, D, F>(
        &mut self,
        world_model: &WorldModel<B, E, D>,
        start: &LatentState<B>,
        is_terminal: Option<Tensor<B, 1, Bool>>,
        reward_fn: F,
        step: u64,
    ) -> Metrics
    where
        E: Encoder<B>,
        D: Decoder<B>,
        F: FnOnce(&ImaginedTrajectory<B>) -> Tensor<B, 2>,
    {
        let actor = &self.actor;
        let mut seq = world_model.imagine(
            |feat| actor.forward(feat),
            start,
            is_terminal,
            self.settings.horizon,
        );

        let (reward, norm_metrics) = self.reward_norm.normalize(reward_fn(&seq));
        seq.reward = Some(reward);
        let (target, target_metrics) = self.target(&seq);
        let (actor_loss, actor_metrics) = self.actor_loss(&seq, target.clone(), step);
        let (critic_loss, critic_metrics) = self.critic_loss(&seq, target);
        debug!(step, "actor-critic losses computed");

        let mut metrics = Metrics::new();
        let (actor, opt_metrics) = self.actor_opt.apply(actor_loss, self.actor.clone(), step);
        self.actor = actor;
        metrics.extend(opt_metrics);
        let (critic, opt_metrics) = self.critic_opt.apply(critic_loss, self.critic.clone(), step);
        self.critic = critic;
        metrics.extend(opt_metrics);

        metrics.extend(norm_metrics.with_prefix("reward"));
        metrics.extend(target_metrics);
        metrics.extend(actor_metrics);
        metrics.extend(critic_metrics);
        self.update_slow_target();
        metrics
    }

    /// λ-return targets of a trajectory with rewards.
    ///
    /// # Returns
    ///
    /// Targets for steps `0..H` [H, R] and `critic_slow`, `critic_target`.
    ///
    /// # Panics
    ///
    /// Panics when the trajectory carries no rewards.
    pub fn target(&self, seq: &ImaginedTrajectory<B>) -> (Tensor<B, 2>, Metrics) {
        let Some(reward) = seq.reward.clone() else {
            panic!("target: imagined trajectory has no rewards");
        };
        let (steps, rows) = (seq.steps(), seq.rows());
        let value = self
            .target_critic()
            .forward(seq.feat.clone())
            .mode()
            .reshape([steps, rows]);

        let head = |x: Tensor<B, 2>| x.slice([0..steps - 1, 0..rows]);
        let bootstrap = value.clone().slice([steps - 1..steps, 0..rows]).reshape([rows]);
        let target = lambda_return(
            head(reward),
            head(value.clone()),
            head(seq.discount.clone()),
            bootstrap,
            self.settings.lambda,
        );

        let mut metrics = Metrics::new();
        metrics.insert("critic_slow", tensor_scalar(value.mean()));
        metrics.insert("critic_target", tensor_scalar(target.clone().mean()));
        (target, metrics)
    }

    /// Policy loss over imagined steps `1..H`.
    ///
    /// # Arguments
    ///
    /// * `seq` - Imagined trajectory of `H + 1` steps, `H >= 2`
    /// * `target` - λ-returns [H, R]
    /// * `step` - Global step for the schedules
    pub fn actor_loss(
        &self,
        seq: &ImaginedTrajectory<B>,
        target: Tensor<B, 2>,
        step: u64,
    ) -> (Tensor<B, 1>, Metrics) {
        let (steps, rows) = (seq.steps(), seq.rows());
        assert!(steps >= 3, "actor_loss: need a horizon of at least 2, got {}", steps - 1);
        let n = steps - 2;
        let mut metrics = Metrics::new();

        let policy = self.actor.forward(seq.feat_steps(0, n).detach());
        let dynamics = target.clone().slice([1..n + 1, 0..rows]);
        let reinforce = || {
            let baseline = self
                .target_critic()
                .forward(seq.feat_steps(0, n))
                .mode()
                .reshape([n, rows]);
            let advantage = (dynamics.clone() - baseline).detach();
            let action = seq.action_steps(1, n + 1).detach();
            policy.log_prob(action).reshape([n, rows]) * advantage
        };

        let objective = match self.settings.actor_grad {
            ActorGrad::Dynamics => dynamics.clone(),
            ActorGrad::Reinforce => reinforce(),
            ActorGrad::Both => {
                let mix = self.settings.actor_grad_mix.value(step) as f32;
                metrics.insert("actor_grad_mix", mix as f64);
                dynamics.clone().mul_scalar(mix) + reinforce().mul_scalar(1.0 - mix)
            }
        };

        let ent = policy.entropy().reshape([n, rows]);
        let ent_scale = self.settings.actor_ent.value(step);
        let objective = objective + ent.clone().mul_scalar(ent_scale as f32);
        let weight = seq.weight.clone().detach().slice([0..n, 0..rows]);
        let loss = (weight * objective).mean().neg();

        metrics.insert("actor_ent", tensor_scalar(ent.mean()));
        metrics.insert("actor_ent_scale", ent_scale);
        (loss, metrics)
    }

    /// Value regression towards the detached targets over steps `0..H`.
    pub fn critic_loss(&self, seq: &ImaginedTrajectory<B>, target: Tensor<B, 2>) -> (Tensor<B, 1>, Metrics) {
        let [horizon, rows] = target.dims();
        let dist = self.critic.forward(seq.feat_steps(0, horizon).detach());
        let target = target.detach().reshape([horizon * rows, 1]);
        let weight = seq
            .weight
            .clone()
            .detach()
            .slice([0..horizon, 0..rows])
            .reshape([horizon * rows]);
        let loss = (dist.log_prob(target) * weight).mean().neg();

        let mut metrics = Metrics::new();
        metrics.insert("critic", tensor_scalar(dist.mode().mean()));
        (loss, metrics)
    }

    /// Blend the critic into the target critic when the cadence is due.
    pub fn update_slow_target(&mut self) {
        self.target_critic.update::<B>(&self.critic);
    }
}
