//! Behavioural tests for the algorithms module.
//!
//! # Test Organization
//!
//! - `lambda_return_tests`: λ-return recursion and trajectory weights
//! - `distribution_tests`: sampling statistics and gradient paths of [`Dist`](crate::algorithms::Dist)

pub mod distribution_tests;
