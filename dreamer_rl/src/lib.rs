//! # Dreamer RL: Latent Imagination for Model-Based RL
//!
//! A recurrent state-space world model learned from replayed sequences, plus
//! an actor-critic trained purely on trajectories imagined by that model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Agent                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────┐      ┌───────────────────────────┐  │
//! │  │        WorldModel          │      │       ActorCritic         │  │
//! │  │  encoder ─► RSSM ─► heads  │─────►│ actor  critic  target     │  │
//! │  │  (decoder/reward/discount) │ feat │ λ-returns, StreamNorm     │  │
//! │  └─────────────┬──────────────┘      └─────────────┬─────────────┘  │
//! │                │ model optimizer                   │ actor/critic   │
//! │                ▼                                   ▼ optimizers     │
//! │        representation loss                imagined trajectories     │
//! │        (likelihoods + KL)                 (policy in latent space)  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! World model, actor and critic are three independent gradient scopes.
//! Every scheduled coefficient is a pure function of the global step, which
//! the [`Agent`] owns and advances.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dreamer_rl::{ActionSpace, Agent, DreamerConfig, PolicyMode};
//!
//! let config = DreamerConfig::from_file("dreamer.json")?
//!     .resolve(ActionSpace::Continuous(2))?;
//! let mut agent: Agent<Autodiff<NdArray>> =
//!     Agent::new(&config, vec![("position".into(), 4)], &device)?;
//!
//! let (action, state) = agent.policy(&obs, is_first, None, PolicyMode::Train)?;
//! let (last, metrics) = agent.train(&batch, None)?;
//! ```

pub mod actor_critic;
pub mod agent;
pub mod algorithms;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod nn;
pub mod optim;
pub mod scheduling;
pub mod world_model;

pub use error::{DreamerError, Result};

// Configuration
pub use config::{ActionSpace, ActorGrad, DreamerConfig, ResolvedConfig};

// Orchestration
pub use agent::{Agent, AgentSettings, DenseWorldModel, PolicyMode, PolicyState};

// Model and behaviour learning
pub use actor_critic::{ActorCritic, ActorCriticSettings};
pub use world_model::{
    Batch, ClipRewards, ImaginedTrajectory, IsoConfig, KlConfig, Observations, Rssm, RssmConfig,
    WorldModel, WorldModelOutput, WorldModelSettings,
};

// Building blocks
pub use algorithms::{discount_weights, lambda_return, Dist};
pub use core::{LatentLayout, LatentSequence, LatentState, StepCounter, StreamNorm, StreamNormConfig};
pub use nn::{Activation, DenseDecoder, DenseEncoder, HeadDist, MlpHead, MlpHeadConfig};
pub use optim::{ModuleOptimizer, OptimizerConfig};
pub use scheduling::Schedule;

pub use metrics::{ConsoleLogger, CsvLogger, Metrics, MetricsLogger, MultiLogger};
