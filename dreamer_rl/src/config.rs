//! Two-phase configuration.
//!
//! [`DreamerConfig`] mirrors the JSON document: every section carries serde
//! defaults, so a file only needs the keys it changes. [`DreamerConfig::resolve`]
//! turns it into a [`ResolvedConfig`] once, replacing every string option with
//! an enum and every schedule string with a [`Schedule`]. Nothing downstream
//! parses strings again.
//!
//! ```json
//! {
//!   "rssm": { "deter": 200, "stoch": 32, "discrete": 0 },
//!   "actor_grad": "both",
//!   "actor_grad_mix": "linear(0.1, 0, 2.5e6)",
//!   "model_opt": { "lr": 3e-4 }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::actor_critic::ActorCriticSettings;
use crate::agent::AgentSettings;
use crate::core::{SlowTargetConfig, StreamNormConfig};
use crate::error::{DreamerError, Result};
use crate::nn::{Activation, DenseDecoderConfig, DenseEncoderConfig, HeadDist, MlpHeadConfig};
use crate::optim::OptimizerConfig;
use crate::scheduling::Schedule;
use crate::world_model::{ClipRewards, IsoConfig, KlConfig, RssmConfig, StdAct, WorldModelSettings};

// ============================================================================
// Enums resolved from strings
// ============================================================================

/// Action space of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSpace {
    /// One-hot actions with this many choices.
    Discrete(usize),
    /// Actions in `[-1, 1]^n`.
    Continuous(usize),
}

impl ActionSpace {
    /// Width of an action vector.
    pub fn dim(&self) -> usize {
        match *self {
            Self::Discrete(n) | Self::Continuous(n) => n,
        }
    }

    /// Whether actions are one-hot.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete(_))
    }
}

/// Gradient estimator for the actor objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorGrad {
    /// Backpropagate through the learned dynamics.
    Dynamics,
    /// Score-function estimator with the critic as baseline.
    Reinforce,
    /// Scheduled mix of both.
    Both,
}

impl ActorGrad {
    /// Resolve a configured name; `auto` depends on the action space.
    pub fn resolve(name: &str, space: ActionSpace) -> Result<Self> {
        match name {
            "auto" if space.is_discrete() => Ok(Self::Reinforce),
            "auto" => Ok(Self::Dynamics),
            other => other.parse(),
        }
    }
}

impl FromStr for ActorGrad {
    type Err = DreamerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dynamics" => Ok(Self::Dynamics),
            "reinforce" => Ok(Self::Reinforce),
            "both" => Ok(Self::Both),
            other => Err(DreamerError::config(
                "actor_grad",
                format!("expected auto, dynamics, reinforce or both, got `{}`", other),
            )),
        }
    }
}

impl fmt::Display for ActorGrad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dynamics => "dynamics",
            Self::Reinforce => "reinforce",
            Self::Both => "both",
        })
    }
}

/// A schedule written either as a bare number or as a schedule string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    /// `0.1`
    Value(f64),
    /// `"linear(0.1, 0, 1e5)"`
    Text(String),
}

impl ScheduleSpec {
    /// Parse into a [`Schedule`].
    pub fn resolve(&self) -> Result<Schedule> {
        match self {
            Self::Value(v) => Ok(Schedule::Constant(*v)),
            Self::Text(s) => s.parse(),
        }
    }
}

impl From<f64> for ScheduleSpec {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for ScheduleSpec {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// ============================================================================
// Raw document
// ============================================================================

/// `rssm` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RssmSection {
    pub deter: usize,
    pub stoch: usize,
    /// Classes per group; 0 selects Gaussian latents.
    pub discrete: usize,
    pub hidden: usize,
    pub ensemble: usize,
    pub act: Activation,
    pub norm: bool,
    pub std_act: String,
    pub min_std: f32,
}

impl Default for RssmSection {
    fn default() -> Self {
        Self {
            deter: 1024,
            stoch: 32,
            discrete: 32,
            hidden: 1024,
            ensemble: 1,
            act: Activation::Elu,
            norm: false,
            std_act: "sigmoid2".to_string(),
            min_std: 0.1,
        }
    }
}

/// Dense network section shared by encoder, decoder, heads, actor and critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpSection {
    pub layers: usize,
    pub units: usize,
    pub act: Activation,
    pub norm: bool,
    /// Output distribution; `None` picks the section's default.
    pub dist: Option<String>,
    pub min_std: f32,
    pub init_std: f32,
}

impl Default for MlpSection {
    fn default() -> Self {
        Self {
            layers: 4,
            units: 400,
            act: Activation::Elu,
            norm: false,
            dist: None,
            min_std: 0.1,
            init_std: 0.0,
        }
    }
}

/// Optimizer section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptSection {
    /// Learning rate; `None` picks the section's default.
    pub lr: Option<ScheduleSpec>,
    pub eps: f32,
    pub clip: f32,
    pub wd: f32,
}

impl Default for OptSection {
    fn default() -> Self {
        Self {
            lr: None,
            eps: 1e-5,
            clip: 100.0,
            wd: 1e-6,
        }
    }
}

/// Raw configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DreamerConfig {
    pub rssm: RssmSection,
    pub encoder: MlpSection,
    pub decoder: MlpSection,
    pub reward_head: MlpSection,
    pub discount_head: MlpSection,
    pub kl: KlConfig,
    pub loss_scales: BTreeMap<String, f32>,
    pub iso: IsoConfig,
    pub model_opt: OptSection,

    pub actor: MlpSection,
    pub critic: MlpSection,
    pub actor_opt: OptSection,
    pub critic_opt: OptSection,
    pub discount: f32,
    pub discount_lambda: f32,
    pub imag_horizon: usize,
    pub actor_grad: String,
    pub actor_grad_mix: ScheduleSpec,
    pub actor_ent: ScheduleSpec,
    pub slow_target: bool,
    pub slow_target_update: u64,
    pub slow_target_fraction: f32,
    pub reward_norm: StreamNormConfig,
    pub clip_rewards: String,
    pub pred_discount: bool,
    pub grad_heads: Vec<String>,

    pub eval_state_mean: bool,
    pub expl_noise: f32,
    pub eval_noise: f32,
}

impl Default for DreamerConfig {
    fn default() -> Self {
        let loss_scales = ["kl", "reward", "discount", "proprio"]
            .iter()
            .map(|k| (k.to_string(), 1.0))
            .collect();

        Self {
            rssm: RssmSection::default(),
            encoder: MlpSection::default(),
            decoder: MlpSection::default(),
            reward_head: MlpSection::default(),
            discount_head: MlpSection::default(),
            kl: KlConfig::default(),
            loss_scales,
            iso: IsoConfig::default(),
            model_opt: OptSection::default(),

            actor: MlpSection::default(),
            critic: MlpSection::default(),
            actor_opt: OptSection::default(),
            critic_opt: OptSection::default(),
            discount: 0.99,
            discount_lambda: 0.95,
            imag_horizon: 15,
            actor_grad: "auto".to_string(),
            actor_grad_mix: "0.1".into(),
            actor_ent: "2e-3".into(),
            slow_target: true,
            slow_target_update: 100,
            slow_target_fraction: 1.0,
            reward_norm: StreamNormConfig::default(),
            clip_rewards: "tanh".to_string(),
            pred_discount: true,
            grad_heads: vec!["decoder".into(), "reward".into(), "discount".into()],

            eval_state_mean: false,
            expl_noise: 0.0,
            eval_noise: 0.0,
        }
    }
}

impl DreamerConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate and resolve every option for the given action space.
    ///
    /// # Errors
    ///
    /// [`DreamerError::Config`] for unknown option names or out-of-range
    /// values, [`DreamerError::InvalidSchedule`] for malformed schedules.
    pub fn resolve(&self, action_space: ActionSpace) -> Result<ResolvedConfig> {
        self.validate()?;
        if self.kl.free_avg && self.kl.balance == 0.5 && self.kl.free > 0.0 {
            warn!("kl.free_avg has no effect when kl.balance is 0.5");
        }

        let std_act: StdAct = self.rssm.std_act.parse()?;
        let rssm = RssmConfig::new(action_space.dim(), self.encoder.units)
            .with_deter(self.rssm.deter)
            .with_stoch(self.rssm.stoch, self.rssm.discrete)
            .with_hidden(self.rssm.hidden)
            .with_ensemble(self.rssm.ensemble)
            .with_act(self.rssm.act)
            .with_norm(self.rssm.norm)
            .with_std(std_act, self.rssm.min_std);

        let actor_dist = match self.actor.dist.as_deref() {
            None | Some("auto") if action_space.is_discrete() => HeadDist::OneHot,
            None | Some("auto") => HeadDist::TruncNormal {
                min_std: self.actor.min_std,
                init_std: self.actor.init_std,
            },
            Some(name) => HeadDist::parse("actor.dist", name, self.actor.min_std, self.actor.init_std)?,
        };

        let world_model = WorldModelSettings {
            kl: self.kl,
            iso: self.iso,
            loss_scales: self.loss_scales.clone(),
            grad_heads: self.grad_heads.clone(),
            clip_rewards: self.clip_rewards.parse::<ClipRewards>()?,
            discount: self.discount,
        };

        let actor_critic = ActorCriticSettings {
            lambda: self.discount_lambda,
            horizon: self.imag_horizon,
            actor_grad: ActorGrad::resolve(&self.actor_grad, action_space)?,
            actor_grad_mix: self.actor_grad_mix.resolve()?,
            actor_ent: self.actor_ent.resolve()?,
            slow_target: SlowTargetConfig {
                enabled: self.slow_target,
                every: self.slow_target_update,
                fraction: self.slow_target_fraction,
            },
            reward_norm: self.reward_norm,
        };

        let resolved = ResolvedConfig {
            action_space,
            rssm,
            encoder: MlpSpec::from(&self.encoder),
            decoder: MlpSpec::from(&self.decoder),
            reward_head: head_spec("reward_head", &self.reward_head, "mse")?,
            discount_head: if self.pred_discount {
                Some(head_spec("discount_head", &self.discount_head, "binary")?)
            } else {
                None
            },
            world_model,
            model_opt: opt_config(&self.model_opt, 1e-4)?,
            actor: HeadSpec {
                mlp: MlpSpec::from(&self.actor),
                dist: actor_dist,
            },
            critic: head_spec("critic", &self.critic, "mse")?,
            actor_opt: opt_config(&self.actor_opt, 8e-5)?,
            critic_opt: opt_config(&self.critic_opt, 2e-4)?,
            actor_critic,
            agent: AgentSettings {
                eval_state_mean: self.eval_state_mean,
                expl_noise: self.expl_noise,
                eval_noise: self.eval_noise,
            },
        };

        tracing::debug!(
            actor_grad = %resolved.actor_critic.actor_grad,
            actor_dist = %resolved.actor.dist,
            "configuration resolved"
        );
        Ok(resolved)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("rssm.deter", self.rssm.deter),
            ("rssm.stoch", self.rssm.stoch),
            ("rssm.hidden", self.rssm.hidden),
            ("rssm.ensemble", self.rssm.ensemble),
            ("slow_target_update", self.slow_target_update as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(DreamerError::config(key, "must be greater than 0"));
            }
        }

        if self.imag_horizon < 2 {
            return Err(DreamerError::config(
                "imag_horizon",
                format!("must be at least 2, got {}", self.imag_horizon),
            ));
        }

        let unit = [
            ("discount", self.discount),
            ("discount_lambda", self.discount_lambda),
            ("kl.balance", self.kl.balance),
            ("slow_target_fraction", self.slow_target_fraction),
        ];
        for (key, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(DreamerError::config(
                    key,
                    format!("must lie in [0, 1], got {}", value),
                ));
            }
        }
        Ok(())
    }
}

fn head_spec(key: &str, section: &MlpSection, default: &str) -> Result<HeadSpec> {
    let name = section.dist.as_deref().unwrap_or(default);
    let dist = HeadDist::parse(&format!("{}.dist", key), name, section.min_std, section.init_std)?;
    Ok(HeadSpec {
        mlp: MlpSpec::from(section),
        dist,
    })
}

fn opt_config(section: &OptSection, default_lr: f64) -> Result<OptimizerConfig> {
    let lr = match &section.lr {
        Some(spec) => spec.resolve()?,
        None => Schedule::Constant(default_lr),
    };
    Ok(OptimizerConfig::new(lr)
        .with_eps(section.eps)
        .with_clip(section.clip)
        .with_wd(section.wd))
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Shape of a dense network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlpSpec {
    pub layers: usize,
    pub units: usize,
    pub act: Activation,
    pub norm: bool,
}

impl From<&MlpSection> for MlpSpec {
    fn from(section: &MlpSection) -> Self {
        Self {
            layers: section.layers,
            units: section.units,
            act: section.act,
            norm: section.norm,
        }
    }
}

impl MlpSpec {
    /// Dense encoder over `(key, width)` observations.
    pub fn encoder(&self, keys: Vec<(String, usize)>) -> DenseEncoderConfig {
        DenseEncoderConfig::new(keys)
            .with_layers(self.layers)
            .with_units(self.units)
            .with_act(self.act)
            .with_norm(self.norm)
    }

    /// Dense decoder from features of width `d_input`.
    pub fn decoder(&self, d_input: usize, keys: Vec<(String, usize)>) -> DenseDecoderConfig {
        DenseDecoderConfig::new(d_input, keys)
            .with_layers(self.layers)
            .with_units(self.units)
            .with_act(self.act)
            .with_norm(self.norm)
    }
}

/// Dense network with an output distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadSpec {
    pub mlp: MlpSpec,
    pub dist: HeadDist,
}

impl HeadSpec {
    /// Head config for the given input and event sizes.
    pub fn config(&self, d_input: usize, d_output: usize) -> MlpHeadConfig {
        MlpHeadConfig::new(d_input, d_output, self.dist)
            .with_layers(self.mlp.layers)
            .with_units(self.mlp.units)
            .with_act(self.mlp.act)
            .with_norm(self.mlp.norm)
    }
}

/// Immutable, fully typed configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub action_space: ActionSpace,
    /// RSSM sizes; `embed_dim` matches the dense encoder.
    pub rssm: RssmConfig,
    pub encoder: MlpSpec,
    pub decoder: MlpSpec,
    pub reward_head: HeadSpec,
    /// `None` when `pred_discount` is off.
    pub discount_head: Option<HeadSpec>,
    pub world_model: WorldModelSettings,
    pub model_opt: OptimizerConfig,
    pub actor: HeadSpec,
    pub critic: HeadSpec,
    pub actor_opt: OptimizerConfig,
    pub critic_opt: OptimizerConfig,
    pub actor_critic: ActorCriticSettings,
    pub agent: AgentSettings,
}
