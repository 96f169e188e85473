//! Latent state of the recurrent state-space model.
//!
//! A [`LatentState`] holds one row per batch item: the parameters of the
//! stochastic component, its sample and the deterministic recurrent vector.
//! Sequences are stored flat and time-major in a [`LatentSequence`] so that
//! heads can be applied to every step with a single forward pass.

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

use crate::algorithms::Dist;

// ============================================================================
// Layout
// ============================================================================

/// Shape of the stochastic component, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentLayout {
    /// `stoch` independent Gaussians.
    Continuous {
        /// Number of latent dimensions.
        stoch: usize,
    },
    /// `stoch` categorical groups of `classes` one-hot classes each.
    Discrete {
        /// Number of categorical groups.
        stoch: usize,
        /// Classes per group.
        classes: usize,
    },
}

impl LatentLayout {
    /// Build from the `discrete` setting (0 = continuous).
    pub fn new(stoch: usize, discrete: usize) -> Self {
        if discrete == 0 {
            Self::Continuous { stoch }
        } else {
            Self::Discrete {
                stoch,
                classes: discrete,
            }
        }
    }

    /// Width of the flattened stochastic sample.
    pub fn stoch_size(&self) -> usize {
        match *self {
            Self::Continuous { stoch } => stoch,
            Self::Discrete { stoch, classes } => stoch * classes,
        }
    }

    /// Width of the stats layer output.
    pub fn stats_size(&self) -> usize {
        match *self {
            Self::Continuous { stoch } => 2 * stoch,
            Self::Discrete { stoch, classes } => stoch * classes,
        }
    }

    /// Width of the feature vector for a given deterministic size.
    pub fn feat_size(&self, deter: usize) -> usize {
        self.stoch_size() + deter
    }

    /// Whether the latent is categorical.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

// ============================================================================
// Stochastic parameters
// ============================================================================

/// Parameters of the stochastic component, one row per item.
#[derive(Debug, Clone)]
pub enum StochParams<B: Backend> {
    /// Diagonal Gaussian `[rows, stoch]`.
    Gaussian {
        /// Mean.
        mean: Tensor<B, 2>,
        /// Standard deviation.
        std: Tensor<B, 2>,
    },
    /// Grouped categorical logits `[rows, stoch * classes]`.
    Categorical {
        /// Unnormalised log-probabilities.
        logits: Tensor<B, 2>,
        /// Classes per group.
        classes: usize,
    },
}

impl<B: Backend> StochParams<B> {
    /// All-zero parameters for `rows` items.
    pub fn zeros(layout: LatentLayout, rows: usize, device: &B::Device) -> Self {
        match layout {
            LatentLayout::Continuous { stoch } => Self::Gaussian {
                mean: Tensor::zeros([rows, stoch], device),
                std: Tensor::zeros([rows, stoch], device),
            },
            LatentLayout::Discrete { stoch, classes } => Self::Categorical {
                logits: Tensor::zeros([rows, stoch * classes], device),
                classes,
            },
        }
    }

    /// Distribution described by the parameters.
    pub fn dist(&self) -> Dist<B> {
        match self {
            Self::Gaussian { mean, std } => Dist::normal(mean.clone(), std.clone()),
            Self::Categorical { logits, classes } => Dist::one_hot(logits.clone(), *classes),
        }
    }

    fn map(self, f: impl Fn(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        match self {
            Self::Gaussian { mean, std } => Self::Gaussian {
                mean: f(mean),
                std: f(std),
            },
            Self::Categorical { logits, classes } => Self::Categorical {
                logits: f(logits),
                classes,
            },
        }
    }

    fn cat(parts: Vec<Self>) -> Self {
        let mut means = Vec::with_capacity(parts.len());
        let mut stds = Vec::with_capacity(parts.len());
        let mut logits = Vec::with_capacity(parts.len());
        let mut groups = 0;

        for part in parts {
            match part {
                Self::Gaussian { mean, std } => {
                    means.push(mean);
                    stds.push(std);
                }
                Self::Categorical { logits: l, classes } => {
                    logits.push(l);
                    groups = classes;
                }
            }
        }

        assert!(
            means.is_empty() || logits.is_empty(),
            "StochParams::cat: mixed latent layouts"
        );
        if logits.is_empty() {
            Self::Gaussian {
                mean: Tensor::cat(means, 0),
                std: Tensor::cat(stds, 0),
            }
        } else {
            Self::Categorical {
                logits: Tensor::cat(logits, 0),
                classes: groups,
            }
        }
    }
}

// ============================================================================
// LatentState
// ============================================================================

/// Batch of latent states.
#[derive(Debug, Clone)]
pub struct LatentState<B: Backend> {
    /// Parameters of the stochastic component.
    pub stats: StochParams<B>,
    /// Flattened stochastic sample `[rows, stoch_size]`.
    pub stoch: Tensor<B, 2>,
    /// Deterministic recurrent state `[rows, deter]`.
    pub deter: Tensor<B, 2>,
}

impl<B: Backend> LatentState<B> {
    /// All-zero state.
    pub fn zeros(layout: LatentLayout, deter: usize, rows: usize, device: &B::Device) -> Self {
        Self {
            stats: StochParams::zeros(layout, rows, device),
            stoch: Tensor::zeros([rows, layout.stoch_size()], device),
            deter: Tensor::zeros([rows, deter], device),
        }
    }

    /// Number of items.
    pub fn rows(&self) -> usize {
        self.deter.dims()[0]
    }

    /// Feature vector `concat(stoch, deter)` [rows, feat].
    pub fn feat(&self) -> Tensor<B, 2> {
        Tensor::cat(vec![self.stoch.clone(), self.deter.clone()], 1)
    }

    /// Distribution of the stochastic component.
    pub fn dist(&self) -> Dist<B> {
        self.stats.dist()
    }

    /// Cut the state out of the autodiff graph.
    pub fn detach(self) -> Self {
        self.map(|t| t.detach())
    }

    /// Zero the rows where `reset` is set.
    ///
    /// # Arguments
    ///
    /// * `reset` - Boolean flags [rows]
    pub fn reset_rows(self, reset: Tensor<B, 1, Bool>) -> Self {
        let keep = row_keep_mask(reset);
        self.map(|t| {
            let [_, width] = t.dims();
            let mask = keep.clone().repeat_dim(1, width);
            t * mask
        })
    }

    /// Rows `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        self.clone().map(|t| {
            let [_, width] = t.dims();
            t.slice([start..end, 0..width])
        })
    }

    /// Concatenate along the row axis.
    pub fn cat(states: Vec<Self>) -> Self {
        let mut stats = Vec::with_capacity(states.len());
        let mut stoch = Vec::with_capacity(states.len());
        let mut deter = Vec::with_capacity(states.len());
        for state in states {
            stats.push(state.stats);
            stoch.push(state.stoch);
            deter.push(state.deter);
        }
        Self {
            stats: StochParams::cat(stats),
            stoch: Tensor::cat(stoch, 0),
            deter: Tensor::cat(deter, 0),
        }
    }

    fn map(self, f: impl Fn(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        Self {
            stats: self.stats.map(&f),
            stoch: f(self.stoch),
            deter: f(self.deter),
        }
    }
}

/// `1 - reset` as a float column [rows, 1].
pub(crate) fn row_keep_mask<B: Backend>(reset: Tensor<B, 1, Bool>) -> Tensor<B, 2> {
    let [rows] = reset.dims();
    reset.bool_not().float().reshape([rows, 1])
}

// ============================================================================
// LatentSequence
// ============================================================================

/// Time-major sequence of latent states.
///
/// Row `t * batch + n` holds step `t` of item `n`.
#[derive(Debug, Clone)]
pub struct LatentSequence<B: Backend> {
    states: LatentState<B>,
    steps: usize,
}

impl<B: Backend> LatentSequence<B> {
    /// Stack per-step states with identical batch size.
    pub fn stack(states: Vec<LatentState<B>>) -> Self {
        assert!(!states.is_empty(), "LatentSequence::stack: empty sequence");
        let batch = states[0].rows();
        debug_assert!(
            states.iter().all(|s| s.rows() == batch),
            "LatentSequence::stack: batch size changes over time"
        );
        let steps = states.len();
        Self {
            states: LatentState::cat(states),
            steps,
        }
    }

    /// Wrap flat time-major rows.
    pub fn from_flat(states: LatentState<B>, steps: usize) -> Self {
        assert!(
            steps > 0 && states.rows() % steps == 0,
            "LatentSequence::from_flat: {} rows do not split into {} steps",
            states.rows(),
            steps
        );
        Self { states, steps }
    }

    /// Sequence length `T`.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Batch size `N`.
    pub fn batch(&self) -> usize {
        self.states.rows() / self.steps
    }

    /// State at step `t`.
    pub fn step(&self, t: usize) -> LatentState<B> {
        let n = self.batch();
        self.states.slice_rows(t * n, (t + 1) * n)
    }

    /// State at the final step.
    pub fn last(&self) -> LatentState<B> {
        self.step(self.steps - 1)
    }

    /// All `T * N` states as one batch.
    pub fn flat(&self) -> &LatentState<B> {
        &self.states
    }

    /// Consume into the flat batch.
    pub fn into_flat(self) -> LatentState<B> {
        self.states
    }

    /// Features of every step [T * N, feat].
    pub fn feat(&self) -> Tensor<B, 2> {
        self.states.feat()
    }

    /// Cut the sequence out of the autodiff graph.
    pub fn detach(self) -> Self {
        Self {
            states: self.states.detach(),
            steps: self.steps,
        }
    }
}
