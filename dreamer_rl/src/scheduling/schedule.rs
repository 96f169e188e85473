//! Schedule parsing and evaluation.
//!
//! A [`Schedule`] is parsed once from its string form and then evaluated as
//! a pure function of the step. Every interpolating form clamps its progress
//! to [0, 1], so values stay at the final setting after the duration elapses.
//!
//! # Data Validation
//!
//! Parsing rejects unknown forms, wrong arities and non-numeric arguments with
//! [`DreamerError::InvalidSchedule`]. Durations and half-lives must be positive.

use std::fmt;
use std::str::FromStr;

use crate::error::{DreamerError, Result};

/// Parsed schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    /// Fixed value.
    Constant(f64),
    /// `(1 - p) * initial + p * last`, `p = clamp(step / duration, 0, 1)`.
    Linear {
        /// Value at step 0.
        initial: f64,
        /// Value once `duration` steps have passed.
        last: f64,
        /// Interpolation length in steps.
        duration: f64,
    },
    /// `clamp(step / warmup, 0, 1) * value`.
    Warmup {
        /// Ramp length in steps.
        warmup: f64,
        /// Value after the ramp.
        value: f64,
    },
    /// `(initial - last) * 0.5^(step / halflife) + last`.
    Exp {
        /// Value at step 0.
        initial: f64,
        /// Asymptotic value.
        last: f64,
        /// Steps until the gap halves.
        halflife: f64,
    },
    /// `1 - 1 / h` with `h` interpolated linearly like [`Schedule::Linear`].
    Horizon {
        /// Horizon at step 0.
        initial: f64,
        /// Horizon after `duration` steps.
        last: f64,
        /// Interpolation length in steps.
        duration: f64,
    },
}

impl Schedule {
    /// Value at `step`.
    pub fn value(&self, step: u64) -> f64 {
        let step = step as f64;
        match *self {
            Self::Constant(v) => v,
            Self::Linear {
                initial,
                last,
                duration,
            } => lerp(initial, last, progress(step, duration)),
            Self::Warmup { warmup, value } => progress(step, warmup) * value,
            Self::Exp {
                initial,
                last,
                halflife,
            } => (initial - last) * 0.5f64.powf(step / halflife) + last,
            Self::Horizon {
                initial,
                last,
                duration,
            } => {
                let horizon = lerp(initial, last, progress(step, duration));
                1.0 - 1.0 / horizon
            }
        }
    }

    /// Whether the value never changes.
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

fn progress(step: f64, duration: f64) -> f64 {
    (step / duration).clamp(0.0, 1.0)
}

fn lerp(initial: f64, last: f64, mix: f64) -> f64 {
    (1.0 - mix) * initial + mix * last
}

impl FromStr for Schedule {
    type Err = DreamerError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if let Ok(v) = text.parse::<f64>() {
            return Ok(Self::Constant(v));
        }

        let invalid = || DreamerError::InvalidSchedule(s.to_string());
        let open = text.find('(').ok_or_else(invalid)?;
        let body = text[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
        let args = body
            .split(',')
            .map(|a| a.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        let schedule = match (text[..open].trim(), args.as_slice()) {
            ("linear", &[initial, last, duration]) => Self::Linear {
                initial,
                last,
                duration,
            },
            ("warmup", &[warmup, value]) => Self::Warmup { warmup, value },
            ("exp", &[initial, last, halflife]) => Self::Exp {
                initial,
                last,
                halflife,
            },
            ("horizon", &[initial, last, duration]) => Self::Horizon {
                initial,
                last,
                duration,
            },
            _ => return Err(invalid()),
        };

        let length = match schedule {
            Self::Linear { duration, .. } | Self::Horizon { duration, .. } => duration,
            Self::Warmup { warmup, .. } => warmup,
            Self::Exp { halflife, .. } => halflife,
            Self::Constant(_) => 1.0,
        };
        if !(length > 0.0) {
            return Err(invalid());
        }
        Ok(schedule)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Constant(v) => write!(f, "{}", v),
            Self::Linear {
                initial,
                last,
                duration,
            } => write!(f, "linear({},{},{})", initial, last, duration),
            Self::Warmup { warmup, value } => write!(f, "warmup({},{})", warmup, value),
            Self::Exp {
                initial,
                last,
                halflife,
            } => write!(f, "exp({},{},{})", initial, last, halflife),
            Self::Horizon {
                initial,
                last,
                duration,
            } => write!(f, "horizon({},{},{})", initial, last, duration),
        }
    }
}

/// Parse `spec` and evaluate it at `step`.
///
/// Prefer parsing once into a [`Schedule`] when the same spec is evaluated
/// repeatedly.
pub fn schedule(spec: &str, step: u64) -> Result<f64> {
    Ok(spec.parse::<Schedule>()?.value(step))
}
