//! Slow-moving copy of the critic.
//!
//! The critic's regression targets are computed with a delayed copy whose
//! parameters only change through an exponential moving average:
//!
//! ```text
//! θ_target = mix * θ_critic + (1 - mix) * θ_target
//! ```
//!
//! The first update uses `mix = 1` (exact copy); afterwards the configured
//! fraction is applied every `every` calls. When slow targets are disabled the
//! critic itself serves as its own target.

use burn::module::{Module, ModuleMapper, Param};
use burn::prelude::*;

// ============================================================================
// Parameter blending via ModuleMapper
// ============================================================================

/// Collects every float parameter of a module, flattened, in traversal order.
///
/// Two modules built from the same config traverse their parameters in the
/// same order, so positions can be matched without comparing ids.
struct ParamCollector<B: Backend> {
    params: Vec<Tensor<B, 1>>,
}

impl<B: Backend> ModuleMapper<B> for ParamCollector<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let val = param.val();
        let numel: usize = val.dims().iter().product();
        self.params.push(val.detach().reshape([numel]));
        param
    }
}

/// Moves each parameter of the target towards the collected source values.
struct BlendMapper<B: Backend> {
    source: Vec<Tensor<B, 1>>,
    mix: f32,
    index: usize,
}

impl<B: Backend> ModuleMapper<B> for BlendMapper<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let idx = self.index;
        self.index += 1;

        let Some(source) = self.source.get(idx) else {
            return param;
        };

        let target = param.val();
        let shape = target.dims();
        let numel: usize = shape.iter().product();
        debug_assert_eq!(
            source.dims()[0],
            numel,
            "blend: parameter {} has mismatched size",
            idx
        );

        let blended = source.clone().mul_scalar(self.mix)
            + target.detach().reshape([numel]).mul_scalar(1.0 - self.mix);
        Param::initialized(param.id.clone(), blended.reshape(shape))
    }
}

/// Polyak-average `source` into `target`.
///
/// # Arguments
///
/// * `source` - Module whose parameters are blended in
/// * `target` - Module to update, same architecture as `source`
/// * `mix` - Weight of the source parameters in [0, 1]
///
/// # Returns
///
/// Updated target; its parameters never require gradients.
pub fn soft_update<B, M>(source: &M, target: M, mix: f32) -> M
where
    B: Backend,
    M: Module<B>,
{
    debug_assert!(
        (0.0..=1.0).contains(&mix),
        "soft_update: mix must lie in [0, 1], got {}",
        mix
    );

    if (mix - 1.0).abs() < 1e-6 {
        return source.clone().no_grad();
    }
    if mix.abs() < 1e-6 {
        return target;
    }

    let mut collector = ParamCollector { params: Vec::new() };
    let _ = source.clone().map(&mut collector);

    let mut blender = BlendMapper {
        source: collector.params,
        mix,
        index: 0,
    };
    target.map(&mut blender).no_grad()
}

// ============================================================================
// SlowTarget
// ============================================================================

/// Cadence and strength of the target update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowTargetConfig {
    /// Whether a separate target network is kept at all.
    pub enabled: bool,
    /// Update every this many calls.
    pub every: u64,
    /// Mixing fraction after the initial copy.
    pub fraction: f32,
}

impl Default for SlowTargetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: 100,
            fraction: 1.0,
        }
    }
}

/// Delayed copy of a module, updated by EMA on a fixed cadence.
#[derive(Debug, Clone)]
pub struct SlowTarget<M> {
    target: Option<M>,
    config: SlowTargetConfig,
    updates: u64,
}

impl<M> SlowTarget<M> {
    /// Wrap `initial` as the target network.
    ///
    /// `initial` is discarded when slow targets are disabled.
    pub fn new(config: SlowTargetConfig, initial: M) -> Self {
        debug_assert!(config.every > 0, "SlowTarget: every must be > 0");
        Self {
            target: config.enabled.then_some(initial),
            config,
            updates: 0,
        }
    }

    /// Module to evaluate targets with: the slow copy, or `online` itself when
    /// slow targets are disabled.
    pub fn get<'a>(&'a self, online: &'a M) -> &'a M {
        self.target.as_ref().unwrap_or(online)
    }

    /// Number of update calls seen while enabled.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Configuration in use.
    pub fn config(&self) -> &SlowTargetConfig {
        &self.config
    }

    /// Advance the cadence and blend `online` in when it is due.
    ///
    /// # Returns
    ///
    /// Whether the target parameters changed.
    pub fn update<B>(&mut self, online: &M) -> bool
    where
        B: Backend,
        M: Module<B>,
    {
        let Some(target) = self.target.take() else {
            return false;
        };

        let due = self.updates % self.config.every.max(1) == 0;
        let target = if due {
            let mix = if self.updates == 0 {
                1.0
            } else {
                self.config.fraction
            };
            tracing::debug!(updates = self.updates, mix, "updating slow target");
            soft_update::<B, M>(online, target, mix)
        } else {
            target
        };

        self.target = Some(target);
        self.updates += 1;
        due
    }
}
