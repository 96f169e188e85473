//! Agent: acts in the environment and trains its components on replayed data.
//!
//! ```text
//!   env step ──► policy(obs, state, mode) ──► action, state'
//!
//!   replay batch ──► WorldModel::train ──► posterior ──► ActorCritic::train
//!                          │                                   │
//!                          └────────────── metrics ◄───────────┘
//! ```
//!
//! The agent owns the global step counter: it reads the counter for every
//! schedule and advances it once per [`Agent::train`] call.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Bool, Distribution, Tensor};
use tracing::debug;

use crate::actor_critic::ActorCritic;
use crate::algorithms::Dist;
use crate::config::{ActionSpace, ResolvedConfig};
use crate::core::{LatentState, StepCounter};
use crate::error::Result;
use crate::metrics::{tensor_scalar, Metrics};
use crate::nn::{DenseDecoder, DenseEncoder, Encoder};
use crate::optim::ModuleOptimizer;
use crate::world_model::{Batch, ImaginedTrajectory, Observations, WorldModel};

/// World model over flat vector observations.
pub type DenseWorldModel<B> = WorldModel<B, DenseEncoder<B>, DenseDecoder<B>>;

/// Recurrent policy state: the posterior and the action taken from it.
pub type PolicyState<B> = (LatentState<B>, Tensor<B, 2>);

/// Acting options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AgentSettings {
    /// Use the posterior mean instead of a sample when evaluating.
    pub eval_state_mean: bool,
    /// Action noise while training and exploring.
    pub expl_noise: f32,
    /// Action noise while evaluating.
    pub eval_noise: f32,
}

/// How [`Agent::policy`] picks actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Sample the actor, add exploration noise.
    Train,
    /// Take the actor's mode, add evaluation noise.
    Eval,
    /// Sample the actor, add exploration noise.
    Explore,
}

impl PolicyMode {
    fn noise(self, settings: &AgentSettings) -> f32 {
        match self {
            Self::Eval => settings.eval_noise,
            Self::Train | Self::Explore => settings.expl_noise,
        }
    }
}

/// World model, actor-critic and the step counter wired together.
pub struct Agent<B>
where
    B: AutodiffBackend,
    DenseWorldModel<B>: AutodiffModule<B>,
{
    world_model: DenseWorldModel<B>,
    model_opt: ModuleOptimizer<B, DenseWorldModel<B>>,
    actor_critic: ActorCritic<B>,
    action_space: ActionSpace,
    settings: AgentSettings,
    step: StepCounter,
}

impl<B> Agent<B>
where
    B: AutodiffBackend,
    DenseWorldModel<B>: AutodiffModule<B>,
{
    /// Build every network from a resolved configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Resolved configuration
    /// * `obs_keys` - `(name, width)` of each vector observation
    /// * `device` - Device to allocate parameters on
    ///
    /// # Errors
    ///
    /// [`crate::DreamerError::UnknownHead`] when `grad_heads` names a head
    /// the configuration does not build.
    pub fn new(config: &ResolvedConfig, obs_keys: Vec<(String, usize)>, device: &B::Device) -> Result<Self> {
        let encoder = config.encoder.encoder(obs_keys.clone()).init(device);
        let rssm = config.rssm.init(device);
        let feat = rssm.feat_size();
        let decoder = config.decoder.decoder(feat, obs_keys).init(device);
        let reward = config.reward_head.config(feat, 1).init(device);
        let discount = config
            .discount_head
            .map(|head| head.config(feat, 1).init(device));
        let world_model = WorldModel::new(
            encoder,
            rssm,
            decoder,
            reward,
            discount,
            config.world_model.clone(),
        )?;

        let actor = config
            .actor
            .config(feat, config.action_space.dim())
            .init(device);
        let critic = config.critic.config(feat, 1).init(device);
        let actor_critic = ActorCritic::new(
            actor,
            critic,
            config.actor_critic.clone(),
            config.actor_opt.clone(),
            config.critic_opt.clone(),
        );

        debug!(feat, action_dim = config.action_space.dim(), "agent built");
        Ok(Self {
            world_model,
            model_opt: ModuleOptimizer::new("model", config.model_opt.clone()),
            actor_critic,
            action_space: config.action_space,
            settings: config.agent,
            step: StepCounter::new(),
        })
    }

    pub fn world_model(&self) -> &DenseWorldModel<B> {
        &self.world_model
    }

    pub fn actor_critic(&self) -> &ActorCritic<B> {
        &self.actor_critic
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Handle to the global step counter.
    pub fn step_counter(&self) -> StepCounter {
        self.step.clone()
    }

    /// Pick actions for one environment step.
    ///
    /// # Arguments
    ///
    /// * `obs` - Current observations, each `[1, N, width]`
    /// * `is_first` - Rows starting a new episode [N]
    /// * `state` - State returned by the previous call, `None` at the start
    /// * `mode` - Sampling and noise regime
    ///
    /// # Returns
    ///
    /// Actions [N, A] and the state to pass to the next call. Both are
    /// detached from any graph.
    ///
    /// # Errors
    ///
    /// [`crate::DreamerError::MissingField`] when an encoder key is absent.
    pub fn policy(
        &self,
        obs: &Observations<B>,
        is_first: Tensor<B, 1, Bool>,
        state: Option<PolicyState<B>>,
        mode: PolicyMode,
    ) -> Result<(Tensor<B, 2>, PolicyState<B>)> {
        let [rows] = is_first.dims();
        let rssm = &self.world_model.rssm;
        let (latent, prev_action) = state.unwrap_or_else(|| {
            let device = is_first.device();
            (rssm.initial(rows), Tensor::zeros([rows, rssm.action_dim()], &device))
        });

        let embed = self.world_model.encoder.encode(obs)?;
        let embed = embed.reshape([rows, self.world_model.encoder.embed_size()]);
        let sample = mode == PolicyMode::Train || !self.settings.eval_state_mean;
        let (post, _) = rssm.obs_step(&latent, prev_action, embed, is_first, sample);

        let dist = self.actor_critic.actor.forward(rssm.get_feat(&post).detach());
        let action = match mode {
            PolicyMode::Eval => dist.mode(),
            PolicyMode::Train | PolicyMode::Explore => dist.sample(),
        };
        let action = self.add_noise(action.detach(), mode.noise(&self.settings));
        Ok((action.clone(), (post.detach(), action)))
    }

    /// Perturb actions: Gaussian noise clipped to [-1, 1] for continuous
    /// spaces, a uniformly random one-hot with probability `amount` for
    /// discrete ones.
    fn add_noise(&self, action: Tensor<B, 2>, amount: f32) -> Tensor<B, 2> {
        if amount <= 0.0 {
            return action;
        }
        let [rows, dim] = action.dims();
        match self.action_space {
            ActionSpace::Continuous(_) => {
                let noise = Tensor::random(
                    [rows, dim],
                    Distribution::Normal(0.0, amount as f64),
                    &action.device(),
                );
                (action + noise).clamp(-1.0, 1.0)
            }
            ActionSpace::Discrete(_) => {
                let random = Dist::one_hot(action.zeros_like(), dim).sample();
                let replace = Tensor::<B, 2>::random([rows, 1], Distribution::Default, &action.device())
                    .lower_elem(amount)
                    .repeat_dim(1, dim);
                action.mask_where(replace, random)
            }
        }
    }

    /// One training step on a replayed batch.
    ///
    /// Updates the world model, then trains the actor-critic on trajectories
    /// imagined from every posterior state of the batch. Rewards of imagined
    /// states are the mode of the reward head.
    ///
    /// # Returns
    ///
    /// The detached posterior of the last step and the merged metrics.
    pub fn train(
        &mut self,
        batch: &Batch<B>,
        state: Option<LatentState<B>>,
    ) -> Result<(LatentState<B>, Metrics)> {
        let step = self.step.get();
        let (world_model, last_state, outputs, mut metrics) =
            self.world_model
                .clone()
                .train(batch, state, &mut self.model_opt, step)?;
        self.world_model = world_model;

        let start = outputs.post.into_flat().detach();
        let [steps, batch_size] = batch.is_terminal.dims();
        let is_terminal = batch.is_terminal.clone().reshape([steps * batch_size]);
        let reward_head = self.world_model.reward.clone();
        let reward_fn = |seq: &ImaginedTrajectory<B>| {
            reward_head
                .forward(seq.feat.clone())
                .mode()
                .reshape([seq.steps(), seq.rows()])
        };
        metrics.extend(self.actor_critic.train(
            &self.world_model,
            &start,
            Some(is_terminal),
            reward_fn,
            step,
        ));

        let step = self.step.increment();
        debug!(step, "agent train step done");
        Ok((last_state, metrics))
    }

    /// Open-loop prediction error of observation `key`.
    ///
    /// Observes the first `context` steps of `batch`, imagines the rest with
    /// the recorded actions and reports `openl_{key}_error`, the mean squared
    /// error of the decoded means over the imagined steps.
    pub fn report(&self, batch: &Batch<B>, context: usize, key: &str) -> Result<Metrics> {
        let prediction = self.world_model.open_loop(batch, context, key)?;
        let error = prediction.error();
        let imagined = error.dims()[0] - context;
        let error = error.slice([context..context + imagined]).mean();

        let mut metrics = Metrics::new();
        metrics.insert(format!("openl_{}_error", key), tensor_scalar(error));
        Ok(metrics)
    }
}
