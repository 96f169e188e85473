//! Bootstrapped λ-returns over imagined trajectories.
//!
//! The λ-return interpolates between one-step TD targets and Monte Carlo
//! returns:
//! - λ = 0: `r_t + d_t V(s_{t+1})`
//! - λ = 1: discounted sum of rewards with the bootstrap value as tail
//!
//! ## Recursion
//!
//! ```text
//! G_T     = bootstrap
//! G_t     = r_t + d_t * ((1 - λ) V(s_{t+1}) + λ G_{t+1})
//! ```
//!
//! All tensors are time-major `[T, N]`; the recursion runs backwards over the
//! time axis and stays differentiable with respect to every input.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Compute λ-returns for a batch of trajectories.
///
/// # Arguments
///
/// * `reward` - rewards `r_t` [T, N]
/// * `value` - value estimates `V(s_t)` [T, N]; only `value[1..]` is read
/// * `discount` - per-step discounts `d_t` [T, N]
/// * `bootstrap` - `V(s_T)` used past the last step [N]
/// * `lambda` - interpolation parameter in [0, 1]
///
/// # Returns
///
/// Returns `G_t` [T, N]
pub fn lambda_return<B: Backend>(
    reward: Tensor<B, 2>,
    value: Tensor<B, 2>,
    discount: Tensor<B, 2>,
    bootstrap: Tensor<B, 1>,
    lambda: f32,
) -> Tensor<B, 2> {
    let [steps, rows] = reward.dims();
    assert_eq!(value.dims(), [steps, rows], "lambda_return: value shape mismatch");
    assert_eq!(discount.dims(), [steps, rows], "lambda_return: discount shape mismatch");
    assert_eq!(bootstrap.dims(), [rows], "lambda_return: bootstrap shape mismatch");
    debug_assert!(
        (0.0..=1.0).contains(&lambda),
        "lambda_return: lambda must lie in [0, 1], got {}",
        lambda
    );

    let bootstrap = bootstrap.reshape([1, rows]);
    let mut next_return = bootstrap.clone();
    let mut returns = Vec::with_capacity(steps);

    for t in (0..steps).rev() {
        let next_value = if t + 1 < steps {
            value.clone().slice([t + 1..t + 2, 0..rows])
        } else {
            bootstrap.clone()
        };
        let r = reward.clone().slice([t..t + 1, 0..rows]);
        let d = discount.clone().slice([t..t + 1, 0..rows]);

        let g = r + d * (next_value * (1.0 - lambda) + next_return * lambda);
        returns.push(g.clone());
        next_return = g;
    }

    returns.reverse();
    Tensor::cat(returns, 0)
}

/// Importance weights of an imagined trajectory.
///
/// `weight[0] = 1` and `weight[t] = weight[t-1] * discount[t-1]`: a state
/// only counts as much as the probability of the episode reaching it.
///
/// # Arguments
///
/// * `discount` - per-step discounts [T, N]
///
/// # Returns
///
/// Cumulative product of the shifted discounts [T, N]
pub fn discount_weights<B: Backend>(discount: Tensor<B, 2>) -> Tensor<B, 2> {
    let [steps, rows] = discount.dims();
    let mut weight = Tensor::ones([1, rows], &discount.device());
    let mut weights = Vec::with_capacity(steps);
    weights.push(weight.clone());

    for t in 1..steps {
        weight = weight * discount.clone().slice([t - 1..t, 0..rows]);
        weights.push(weight.clone());
    }

    Tensor::cat(weights, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_single_step_is_td_target() {
        let device = Default::default();
        let reward = Tensor::<B, 2>::from_floats([[1.0, 2.0]], &device);
        let value = Tensor::<B, 2>::from_floats([[0.0, 0.0]], &device);
        let discount = Tensor::<B, 2>::from_floats([[0.5, 1.0]], &device);
        let bootstrap = Tensor::<B, 1>::from_floats([4.0, -2.0], &device);

        let ret = lambda_return(reward, value, discount, bootstrap, 0.7);
        let data = ret.into_data();
        let out = data.as_slice::<f32>().unwrap();

        // Last step: both branches of the interpolation use the bootstrap.
        assert!((out[0] - 3.0).abs() < 1e-6, "got {}", out[0]);
        assert!((out[1] - 0.0).abs() < 1e-6, "got {}", out[1]);
    }

    #[test]
    fn test_zero_discount_returns_reward() {
        let device = Default::default();
        let reward = Tensor::<B, 2>::from_floats([[1.0], [2.0], [3.0]], &device);
        let value = Tensor::<B, 2>::from_floats([[9.0], [9.0], [9.0]], &device);
        let discount = Tensor::<B, 2>::zeros([3, 1], &device);
        let bootstrap = Tensor::<B, 1>::from_floats([9.0], &device);

        let ret = lambda_return(reward, value, discount, bootstrap, 0.95);
        let data = ret.into_data();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_weights_start_at_one() {
        let device = Default::default();
        let discount = Tensor::<B, 2>::from_floats([[0.5, 0.0], [0.5, 1.0], [0.5, 1.0]], &device);
        let weight = discount_weights(discount);
        let data = weight.into_data();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1.0, 1.0, 0.5, 0.0, 0.25, 0.0]);
    }
}
