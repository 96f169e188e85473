//! Numeric building blocks shared by the world model and the actor-critic.
//!
//! - `distributions`: closed [`Dist`] enum (normal, truncated normal,
//!   grouped one-hot, Bernoulli)
//! - `lambda_return`: λ-return recursion and trajectory importance weights

pub mod distributions;
pub mod lambda_return;

#[cfg(test)]
mod tests;

pub use distributions::{erfinv, Dist};
pub use lambda_return::{discount_weights, lambda_return};
