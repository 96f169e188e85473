//! Behaviour learning inside the world model.
//!
//! The actor is trained on trajectories imagined by the RSSM, against
//! λ-return targets from a slowly updated critic. Three gradient estimators
//! are available for the actor objective:
//!
//! | `actor_grad` | Objective                                            |
//! |--------------|------------------------------------------------------|
//! | `dynamics`   | `V^λ` backpropagated through the learned dynamics    |
//! | `reinforce`  | `log π(a) · sg(V^λ - v(s))`                          |
//! | `both`       | `mix · dynamics + (1 - mix) · reinforce`             |
//!
//! Each variant adds a scheduled entropy bonus.

pub mod trainer;

#[cfg(test)]
mod tests;

pub use crate::config::ActorGrad;
pub use trainer::{ActorCritic, ActorCriticSettings};
