//! Action, latent and prediction distributions.
//!
//! Every distribution is batched over rows and independent over the last
//! (event) axis, so parameters are `[rows, event]` tensors and reductions
//! (`log_prob`, `entropy`, `kl`) return one value per row.
//!
//! | Variant       | Used for                                  | Sample            |
//! |---------------|-------------------------------------------|-------------------|
//! | `Normal`      | continuous latents, `mse`/`normal` heads  | reparameterised   |
//! | `TruncNormal` | bounded continuous actions                | inverse CDF       |
//! | `OneHot`      | categorical latents, discrete actions     | straight-through  |
//! | `Bernoulli`   | discount head                             | not differentiable|
//!
//! The family is chosen once when a head or latent layout is built; callers
//! only see [`Dist`].

use burn::tensor::activation::{log_softmax, sigmoid, softmax, softplus};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor};

const SQRT_2: f32 = std::f32::consts::SQRT_2;

/// Closed set of distribution families behind one capability surface.
#[derive(Debug, Clone)]
pub enum Dist<B: Backend> {
    /// Independent diagonal Gaussian.
    Normal {
        /// Location `[rows, event]`.
        mean: Tensor<B, 2>,
        /// Scale `[rows, event]`, strictly positive.
        std: Tensor<B, 2>,
    },
    /// Gaussian truncated to `[low, high]` per dimension.
    TruncNormal {
        /// Location of the untruncated Gaussian.
        loc: Tensor<B, 2>,
        /// Scale of the untruncated Gaussian.
        scale: Tensor<B, 2>,
        /// Lower bound of the support.
        low: f32,
        /// Upper bound of the support.
        high: f32,
    },
    /// `event / classes` independent categoricals, one-hot encoded.
    OneHot {
        /// Unnormalised log-probabilities `[rows, groups * classes]`.
        logits: Tensor<B, 2>,
        /// Classes per group.
        classes: usize,
    },
    /// Independent Bernoulli variables parameterised by logits.
    Bernoulli {
        /// Logits `[rows, event]`.
        logits: Tensor<B, 2>,
    },
}

impl<B: Backend> Dist<B> {
    /// Gaussian with learned scale.
    pub fn normal(mean: Tensor<B, 2>, std: Tensor<B, 2>) -> Self {
        Self::Normal { mean, std }
    }

    /// Unit-variance Gaussian; its log-likelihood is a shifted squared error.
    pub fn mse(mean: Tensor<B, 2>) -> Self {
        let std = mean.ones_like();
        Self::Normal { mean, std }
    }

    /// Truncated Gaussian on `[low, high]`.
    pub fn trunc_normal(loc: Tensor<B, 2>, scale: Tensor<B, 2>, low: f32, high: f32) -> Self {
        debug_assert!(low < high, "TruncNormal: low ({}) must be below high ({})", low, high);
        Self::TruncNormal {
            loc,
            scale,
            low,
            high,
        }
    }

    /// Grouped one-hot categorical.
    ///
    /// # Panics
    ///
    /// Panics if the logit width is not a multiple of `classes`.
    pub fn one_hot(logits: Tensor<B, 2>, classes: usize) -> Self {
        let width = logits.dims()[1];
        assert!(
            classes > 0 && width % classes == 0,
            "OneHot: logit width {} is not a multiple of {} classes",
            width,
            classes
        );
        Self::OneHot { logits, classes }
    }

    /// Bernoulli from logits.
    pub fn bernoulli(logits: Tensor<B, 2>) -> Self {
        Self::Bernoulli { logits }
    }

    /// Number of independent rows.
    pub fn rows(&self) -> usize {
        self.param().dims()[0]
    }

    /// Width of one sample.
    pub fn event_size(&self) -> usize {
        self.param().dims()[1]
    }

    fn param(&self) -> &Tensor<B, 2> {
        match self {
            Self::Normal { mean, .. } => mean,
            Self::TruncNormal { loc, .. } => loc,
            Self::OneHot { logits, .. } => logits,
            Self::Bernoulli { logits } => logits,
        }
    }

    /// Draw one sample per row.
    ///
    /// Normal and truncated-normal samples are pathwise differentiable with
    /// respect to the parameters; one-hot samples carry straight-through
    /// gradients of the class probabilities.
    pub fn sample(&self) -> Tensor<B, 2> {
        match self {
            Self::Normal { mean, std } => {
                let noise = Tensor::random(mean.dims(), Distribution::Normal(0.0, 1.0), &mean.device());
                mean.clone() + std.clone() * noise
            }
            Self::TruncNormal {
                loc,
                scale,
                low,
                high,
            } => {
                let (alpha, beta) = standardized_bounds(loc, scale, *low, *high);
                let cdf_low = normal_cdf(alpha);
                let mass = normal_cdf(beta) - cdf_low.clone();
                let uniform = Tensor::random(loc.dims(), Distribution::Uniform(0.0, 1.0), &loc.device());
                let quantile = (cdf_low + uniform * mass).clamp(1e-6, 1.0 - 1e-6);
                let event = loc.clone() + scale.clone() * erfinv(quantile * 2.0 - 1.0) * SQRT_2;
                // Keep samples strictly inside the support while passing the
                // unclipped gradient through.
                let clipped = event.clone().clamp(*low + 1e-6, *high - 1e-6);
                event.clone() - event.detach() + clipped.detach()
            }
            Self::OneHot { logits, classes } => {
                let grouped = group(logits.clone(), *classes);
                let uniform = Tensor::random(grouped.dims(), Distribution::Uniform(0.0, 1.0), &logits.device())
                    .clamp(1e-10, 1.0 - 1e-7);
                let gumbel = uniform.log().neg().log().neg();
                let index = one_hot_argmax(grouped.clone().detach() + gumbel);
                let probs = softmax(grouped, 2);
                ungroup(index + probs.clone() - probs.detach())
            }
            Self::Bernoulli { logits } => {
                let uniform = Tensor::random(logits.dims(), Distribution::Uniform(0.0, 1.0), &logits.device());
                uniform.lower(sigmoid(logits.clone())).float()
            }
        }
    }

    /// Most likely value.
    ///
    /// The one-hot mode carries straight-through gradients like the sample.
    pub fn mode(&self) -> Tensor<B, 2> {
        match self {
            Self::Normal { mean, .. } => mean.clone(),
            Self::TruncNormal { loc, low, high, .. } => loc.clone().clamp(*low, *high),
            Self::OneHot { logits, classes } => {
                let grouped = group(logits.clone(), *classes);
                let index = one_hot_argmax(grouped.clone().detach());
                let probs = softmax(grouped, 2);
                ungroup(index + probs.clone() - probs.detach())
            }
            Self::Bernoulli { logits } => logits.clone().greater_elem(0.0).float(),
        }
    }

    /// Expected value.
    pub fn mean(&self) -> Tensor<B, 2> {
        match self {
            Self::Normal { mean, .. } => mean.clone(),
            Self::TruncNormal {
                loc,
                scale,
                low,
                high,
            } => {
                let (alpha, beta) = standardized_bounds(loc, scale, *low, *high);
                let mass = normal_cdf(beta.clone()) - normal_cdf(alpha.clone());
                loc.clone() + scale.clone() * (normal_pdf(alpha) - normal_pdf(beta)) / mass
            }
            Self::OneHot { logits, classes } => ungroup(softmax(group(logits.clone(), *classes), 2)),
            Self::Bernoulli { logits } => sigmoid(logits.clone()),
        }
    }

    /// Log-density (or log-mass) of `value`, summed over the event axis.
    pub fn log_prob(&self, value: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Self::Normal { mean, std } => {
                let z = (value - mean.clone()) / std.clone();
                let per_dim = z.powf_scalar(2.0) * -0.5 - std.clone().log() - 0.5 * log_2pi();
                sum_event(per_dim)
            }
            Self::TruncNormal {
                loc,
                scale,
                low,
                high,
            } => {
                let (alpha, beta) = standardized_bounds(loc, scale, *low, *high);
                let mass = normal_cdf(beta) - normal_cdf(alpha);
                let z = (value - loc.clone()) / scale.clone();
                let per_dim =
                    z.powf_scalar(2.0) * -0.5 - 0.5 * log_2pi() - scale.clone().log() - mass.log();
                sum_event(per_dim)
            }
            Self::OneHot { logits, classes } => {
                let log_probs = log_softmax(group(logits.clone(), *classes), 2);
                let value = group(value, *classes);
                sum_event(ungroup(value * log_probs))
            }
            Self::Bernoulli { logits } => {
                let per_dim = value.clone() * log_sigmoid(logits.clone())
                    + value.neg().add_scalar(1.0) * log_sigmoid(logits.clone().neg());
                sum_event(per_dim)
            }
        }
    }

    /// Differential (or discrete) entropy per row.
    pub fn entropy(&self) -> Tensor<B, 1> {
        match self {
            Self::Normal { std, .. } => {
                let per_dim = std.clone().log() + 0.5 * (1.0 + log_2pi());
                sum_event(per_dim)
            }
            Self::TruncNormal {
                loc,
                scale,
                low,
                high,
            } => {
                let (alpha, beta) = standardized_bounds(loc, scale, *low, *high);
                let mass = normal_cdf(beta.clone()) - normal_cdf(alpha.clone());
                let tails = (alpha.clone() * normal_pdf(alpha) - beta.clone() * normal_pdf(beta))
                    / (mass.clone() * 2.0);
                let per_dim = scale.clone().log() + mass.log() + 0.5 * (1.0 + log_2pi()) + tails;
                sum_event(per_dim)
            }
            Self::OneHot { logits, classes } => {
                let grouped = group(logits.clone(), *classes);
                let log_probs = log_softmax(grouped.clone(), 2);
                let probs = softmax(grouped, 2);
                sum_event(ungroup(probs * log_probs)).neg()
            }
            Self::Bernoulli { logits } => {
                let probs = sigmoid(logits.clone());
                let per_dim = probs.clone() * log_sigmoid(logits.clone())
                    + probs.neg().add_scalar(1.0) * log_sigmoid(logits.clone().neg());
                sum_event(per_dim).neg()
            }
        }
    }

    /// `KL(self ‖ other)` per row.
    ///
    /// # Panics
    ///
    /// Panics unless both sides are `Normal` or both are `OneHot` with the
    /// same group layout.
    pub fn kl(&self, other: &Self) -> Tensor<B, 1> {
        match (self, other) {
            (Self::Normal { mean: mp, std: sp }, Self::Normal { mean: mq, std: sq }) => {
                let var_ratio = (sp.clone() / sq.clone()).powf_scalar(2.0);
                let shift = ((mp.clone() - mq.clone()) / sq.clone()).powf_scalar(2.0);
                let per_dim = (var_ratio.clone() + shift) * 0.5 - 0.5 - var_ratio.log() * 0.5;
                sum_event(per_dim)
            }
            (
                Self::OneHot {
                    logits: lp,
                    classes: cp,
                },
                Self::OneHot {
                    logits: lq,
                    classes: cq,
                },
            ) => {
                assert_eq!(cp, cq, "kl: one-hot class counts differ ({} vs {})", cp, cq);
                let log_p = log_softmax(group(lp.clone(), *cp), 2);
                let log_q = log_softmax(group(lq.clone(), *cq), 2);
                let probs = log_p.clone().exp();
                sum_event(ungroup(probs * (log_p - log_q)))
            }
            _ => panic!("kl: unsupported pair of distribution families"),
        }
    }

    /// Same distribution with parameters cut from the autodiff graph.
    pub fn detach(self) -> Self {
        match self {
            Self::Normal { mean, std } => Self::Normal {
                mean: mean.detach(),
                std: std.detach(),
            },
            Self::TruncNormal {
                loc,
                scale,
                low,
                high,
            } => Self::TruncNormal {
                loc: loc.detach(),
                scale: scale.detach(),
                low,
                high,
            },
            Self::OneHot { logits, classes } => Self::OneHot {
                logits: logits.detach(),
                classes,
            },
            Self::Bernoulli { logits } => Self::Bernoulli {
                logits: logits.detach(),
            },
        }
    }
}

// ============================================================================
// Numeric helpers
// ============================================================================

fn log_2pi() -> f32 {
    (2.0 * std::f32::consts::PI).ln()
}

fn sum_event<B: Backend>(per_dim: Tensor<B, 2>) -> Tensor<B, 1> {
    let rows = per_dim.dims()[0];
    per_dim.sum_dim(1).reshape([rows])
}

fn group<B: Backend>(flat: Tensor<B, 2>, classes: usize) -> Tensor<B, 3> {
    let [rows, width] = flat.dims();
    flat.reshape([rows, width / classes, classes])
}

fn ungroup<B: Backend>(grouped: Tensor<B, 3>) -> Tensor<B, 2> {
    let [rows, groups, classes] = grouped.dims();
    grouped.reshape([rows, groups * classes])
}

/// One-hot encoding of the arg-max over the last axis.
pub(crate) fn one_hot_argmax<B: Backend>(scores: Tensor<B, 3>) -> Tensor<B, 3> {
    let [rows, groups, classes] = scores.dims();
    let device = scores.device();
    let index = scores.argmax(2).repeat_dim(2, classes);
    let range = Tensor::<B, 1, Int>::arange(0..classes as i64, &device)
        .reshape([1, 1, classes])
        .repeat_dim(0, rows)
        .repeat_dim(1, groups);
    index.equal(range).float()
}

/// `log σ(x) = -softplus(-x)`.
fn log_sigmoid<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2> {
    softplus(logits.neg(), 1.0).neg()
}

fn standardized_bounds<B: Backend>(
    loc: &Tensor<B, 2>,
    scale: &Tensor<B, 2>,
    low: f32,
    high: f32,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let alpha = (loc.clone().neg().add_scalar(low)) / scale.clone();
    let beta = (loc.clone().neg().add_scalar(high)) / scale.clone();
    (alpha, beta)
}

fn normal_pdf<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    (x.powf_scalar(2.0) * -0.5).exp() / (2.0 * std::f32::consts::PI).sqrt()
}

fn normal_cdf<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    ((x / SQRT_2).erf() + 1.0) * 0.5
}

/// Inverse error function on `(-1, 1)`.
///
/// Single-precision rational approximation (M. Giles, 2010), evaluated with
/// both branches and selected per element.
pub fn erfinv<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    const CENTRAL: [f32; 9] = [
        2.810_226_4e-8,
        3.432_739_4e-7,
        -3.523_387_7e-6,
        -4.391_506_5e-6,
        2.185_808_7e-4,
        -1.253_725e-3,
        -4.177_681_6e-3,
        0.246_640_73,
        1.501_409_4,
    ];
    const TAIL: [f32; 9] = [
        -2.002_142_6e-4,
        1.009_505_6e-4,
        1.349_343_2e-3,
        -3.673_428_4e-3,
        5.739_507_7e-3,
        -7.622_461_3e-3,
        9.438_870_5e-3,
        1.001_674_1,
        2.832_976_8,
    ];

    let w = (x.clone().neg().add_scalar(1.0) * x.clone().add_scalar(1.0)).log().neg();
    let central = horner(w.clone().sub_scalar(2.5), &CENTRAL);
    let tail = horner(w.clone().sqrt().sub_scalar(3.0), &TAIL);
    let poly = tail.mask_where(w.lower_elem(5.0), central);
    poly * x
}

fn horner<B: Backend, const D: usize>(w: Tensor<B, D>, coefficients: &[f32]) -> Tensor<B, D> {
    let mut acc = w.zeros_like().add_scalar(coefficients[0]);
    for &c in &coefficients[1..] {
        acc = acc * w.clone() + c;
    }
    acc
}
