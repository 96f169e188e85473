//! Latent dynamics model learned from observed sequences.
//!
//! # Modules
//!
//! - [`batch`]: training batches, reward clipping and discount targets
//! - [`rssm`]: recurrent state-space model and its KL regulariser
//! - [`isometry`]: decoder isometry regulariser
//! - [`model`]: the assembled world model with its losses and imagination

pub mod batch;
pub mod isometry;
pub mod model;
pub mod rssm;


pub use batch::{Batch, ClipRewards, Observations, Prepared};
pub use isometry::{distortion, isometry_loss, IsoConfig};
pub use model::{
    ImaginedTrajectory, OpenLoopPrediction, WorldModel, WorldModelOutput, WorldModelSettings,
    HEAD_NAMES,
};
pub use rssm::{KlConfig, Rssm, RssmConfig, StdAct};
