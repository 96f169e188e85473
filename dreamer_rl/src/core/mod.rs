//! Core state types and stateful helpers shared by the world model and the
//! actor-critic.

pub mod latent;
pub mod recurrent;
pub mod running_stats;
pub mod step_counter;
pub mod target_network;

pub use latent::{LatentLayout, LatentSequence, LatentState, StochParams};
pub use recurrent::{GruCell, GruCellConfig};
pub use running_stats::{StreamNorm, StreamNormConfig};
pub use step_counter::StepCounter;
pub use target_network::{soft_update, SlowTarget, SlowTargetConfig};
