//! Behavioural tests for the actor-critic.
//!
//! # Test Categories
//!
//! 1. **Targets**: λ-returns from a constant critic
//! 2. **Actor loss**: objective per gradient estimator
//! 3. **Critic loss**: weighted regression value
//! 4. **Slow target**: aliasing and initial copy
//! 5. **Training**: end-to-end update through imagination

use burn::backend::{Autodiff, NdArray};
use burn::module::{Module, ModuleMapper, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Distribution, Tensor, TensorData};

use super::*;
use crate::config::ActorGrad;
use crate::core::{LatentLayout, LatentSequence, LatentState, SlowTargetConfig};
use crate::nn::{DenseDecoderConfig, DenseEncoderConfig, HeadDist, MlpHead, MlpHeadConfig};
use crate::optim::OptimizerConfig;
use crate::scheduling::Schedule;
use crate::world_model::{ImaginedTrajectory, RssmConfig, WorldModel, WorldModelSettings};

type AB = Autodiff<NdArray<f32>>;

const FEAT: usize = 4;
const ACTION: usize = 2;

/// Sets every parameter to zero.
struct Zero;

impl<Bk: Backend> ModuleMapper<Bk> for Zero {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<Bk, D>>) -> Param<Tensor<Bk, D>> {
        let zeros = param.val().zeros_like();
        Param::initialized(param.id.clone(), zeros)
    }
}

/// Flattens every parameter value, leaving the module unchanged.
#[derive(Default)]
struct Flatten(Vec<f32>);

impl<Bk: Backend> ModuleMapper<Bk> for Flatten {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<Bk, D>>) -> Param<Tensor<Bk, D>> {
        self.0.extend(param.val().into_data().to_vec::<f32>().unwrap());
        param
    }
}

fn params<M: Module<AB>>(module: &M) -> Vec<f32> {
    let mut flat = Flatten::default();
    let _ = module.clone().map(&mut flat);
    flat.0
}

fn to_vec<Bk: Backend, const D: usize>(t: Tensor<Bk, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}

fn scalar<Bk: Backend>(t: Tensor<Bk, 1>) -> f32 {
    to_vec(t)[0]
}

fn head(d_output: usize, dist: HeadDist) -> MlpHead<AB> {
    MlpHeadConfig::new(FEAT, d_output, dist)
        .with_layers(1)
        .with_units(8)
        .init(&Default::default())
}

fn continuous_actor() -> MlpHead<AB> {
    head(
        ACTION,
        HeadDist::TruncNormal {
            min_std: 0.1,
            init_std: 0.0,
        },
    )
}

fn settings(actor_grad: ActorGrad) -> ActorCriticSettings {
    ActorCriticSettings {
        horizon: 3,
        actor_grad,
        actor_grad_mix: Schedule::Constant(0.25),
        actor_ent: Schedule::Constant(0.0),
        ..ActorCriticSettings::default()
    }
}

/// Actor-critic whose critic (and target) predict exactly zero.
fn zero_critic_agent(settings: ActorCriticSettings) -> ActorCritic<AB> {
    with_actor(continuous_actor(), settings)
}

fn with_actor(actor: MlpHead<AB>, settings: ActorCriticSettings) -> ActorCritic<AB> {
    let critic = head(1, HeadDist::Mse).map(&mut Zero);
    let opt = OptimizerConfig::new(Schedule::Constant(1e-3));
    ActorCritic::new(actor, critic, settings, opt.clone(), opt)
}

/// Hand-built trajectory of `steps` steps with unit discount weights.
fn trajectory(steps: usize, rows: usize, discount: f32) -> ImaginedTrajectory<AB> {
    let device = Default::default();
    let layout = LatentLayout::new(2, 0);
    let states = LatentSequence::stack(vec![LatentState::zeros(layout, 2, rows, &device); steps]);
    ImaginedTrajectory {
        states,
        feat: Tensor::random([steps * rows, FEAT], Distribution::Normal(0.0, 1.0), &device),
        action: Tensor::zeros([steps, rows, ACTION], &device),
        discount: Tensor::ones([steps, rows], &device).mul_scalar(discount),
        weight: Tensor::ones([steps, rows], &device),
        reward: Some(Tensor::ones([steps, rows], &device)),
    }
}

// ============================================================================
// TARGET TESTS
// ============================================================================

mod target_tests {
    use super::*;

    #[test]
    fn lambda_returns_from_a_zero_critic() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let seq = trajectory(4, 2, 0.9);
        let (target, metrics) = ac.target(&seq);

        assert_eq!(target.dims(), [3, 2]);
        // t2 = 1, t1 = 1 + 0.9 * 0.95 * t2, t0 = 1 + 0.9 * 0.95 * t1
        let t1 = 1.0 + 0.855;
        let t0 = 1.0 + 0.855 * t1;
        let values = to_vec(target);
        for (got, want) in values.iter().zip([t0, t0, t1, t1, 1.0, 1.0]) {
            assert!((got - want).abs() < 1e-5, "targets {:?}", values);
        }
        assert_eq!(metrics.get("critic_slow"), Some(0.0));
        let mean = (t0 + t1 + 1.0) / 3.0;
        assert!((metrics.get("critic_target").unwrap() - mean as f64).abs() < 1e-5);
    }

    #[test]
    #[should_panic(expected = "no rewards")]
    fn target_requires_rewards() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let mut seq = trajectory(4, 2, 0.9);
        seq.reward = None;
        let _ = ac.target(&seq);
    }
}

// ============================================================================
// ACTOR LOSS TESTS
// ============================================================================

mod actor_loss_tests {
    use super::*;

    fn constant_target(value: f32) -> Tensor<AB, 2> {
        Tensor::ones([3, 2], &Default::default()).mul_scalar(value)
    }

    #[test]
    fn dynamics_objective_is_the_weighted_target() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let seq = trajectory(4, 2, 0.9);
        let (loss, metrics) = ac.actor_loss(&seq, constant_target(2.0), 0);

        assert_eq!(loss.dims(), [1]);
        assert!((scalar(loss) + 2.0).abs() < 1e-6);
        assert_eq!(metrics.get("actor_ent_scale"), Some(0.0));
        assert!(metrics.contains("actor_ent"));
        assert!(!metrics.contains("actor_grad_mix"));
    }

    #[test]
    fn reinforce_with_zero_advantage_is_zero() {
        let ac = zero_critic_agent(settings(ActorGrad::Reinforce));
        let seq = trajectory(4, 2, 0.9);
        let (loss, _) = ac.actor_loss(&seq, constant_target(0.0), 0);
        assert!(scalar(loss).abs() < 1e-6);
    }

    #[test]
    fn both_reports_the_mix() {
        let ac = zero_critic_agent(settings(ActorGrad::Both));
        let seq = trajectory(4, 2, 0.9);
        let (loss, metrics) = ac.actor_loss(&seq, constant_target(1.0), 7);
        assert!(scalar(loss).is_finite());
        assert_eq!(metrics.get("actor_grad_mix"), Some(0.25));
    }

    #[test]
    fn entropy_bonus_lowers_the_loss() {
        let seq = trajectory(4, 2, 0.9);
        let actor = continuous_actor();
        let plain = with_actor(actor.clone(), settings(ActorGrad::Dynamics));
        let base = scalar(plain.actor_loss(&seq, constant_target(1.0), 0).0);

        let mut config = settings(ActorGrad::Dynamics);
        config.actor_ent = Schedule::Constant(1.0);
        let with_ent = with_actor(actor, config);
        let (loss, metrics) = with_ent.actor_loss(&seq, constant_target(1.0), 0);
        let ent = metrics.get("actor_ent").unwrap() as f32;
        assert!((scalar(loss) - (base - ent)).abs() < 1e-4);
    }

    #[test]
    fn dynamics_gradient_flows_through_the_target_only() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let seq = trajectory(4, 2, 0.9);
        let target = constant_target(1.0).require_grad();
        let (loss, _) = ac.actor_loss(&seq, target.clone(), 0);
        let grads = loss.backward();
        let grad = to_vec(target.grad(&grads).unwrap());
        // d(-mean(target[1:])) / d target: zero for t0, -1/4 for t1, t2
        for (got, want) in grad.iter().zip([0.0, 0.0, -0.25, -0.25, -0.25, -0.25]) {
            assert!((got - want).abs() < 1e-6, "grad {:?}", grad);
        }
    }
}

// ============================================================================
// CRITIC LOSS TESTS
// ============================================================================

mod critic_loss_tests {
    use super::*;

    #[test]
    fn unit_gaussian_regression_value() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let seq = trajectory(4, 2, 0.9);
        let target = Tensor::<AB, 2>::ones([3, 2], &Default::default());
        let (loss, metrics) = ac.critic_loss(&seq, target);

        let expected = 0.5 + 0.5 * (2.0 * std::f32::consts::PI).ln();
        assert!((scalar(loss) - expected).abs() < 1e-5);
        assert_eq!(metrics.get("critic"), Some(0.0));
    }

    #[test]
    fn zero_weights_silence_the_loss() {
        let ac = zero_critic_agent(settings(ActorGrad::Dynamics));
        let mut seq = trajectory(4, 2, 0.9);
        seq.weight = seq.weight.clone().zeros_like();
        let target = Tensor::<AB, 2>::ones([3, 2], &Default::default());
        assert_eq!(scalar(ac.critic_loss(&seq, target).0), 0.0);
    }
}

// ============================================================================
// SLOW TARGET TESTS
// ============================================================================

mod slow_target_tests {
    use super::*;

    #[test]
    fn disabled_target_is_the_critic() {
        let mut config = settings(ActorGrad::Dynamics);
        config.slow_target = SlowTargetConfig {
            enabled: false,
            ..SlowTargetConfig::default()
        };
        let mut ac = zero_critic_agent(config);
        assert!(std::ptr::eq(ac.target_critic(), &ac.critic));
        ac.update_slow_target();
        assert!(std::ptr::eq(ac.target_critic(), &ac.critic));
    }

    #[test]
    fn first_update_copies_the_critic() {
        let opt = OptimizerConfig::new(Schedule::Constant(1e-3));
        let mut ac = ActorCritic::new(
            continuous_actor(),
            head(1, HeadDist::Mse),
            settings(ActorGrad::Dynamics),
            opt.clone(),
            opt,
        );
        ac.critic = ac.critic.clone().map(&mut Zero);
        let x = Tensor::<AB, 2>::random([5, FEAT], Distribution::Normal(0.0, 1.0), &Default::default());
        assert!(to_vec(ac.target_critic().forward(x.clone()).mode()).iter().any(|v| *v != 0.0));

        ac.update_slow_target();
        assert!(to_vec(ac.target_critic().forward(x).mode()).iter().all(|v| *v == 0.0));
    }
}

// ============================================================================
// TRAINING TESTS
// ============================================================================

mod train_tests {
    use super::*;

    fn world_model(action: usize) -> WorldModel<AB, crate::nn::DenseEncoder<AB>, crate::nn::DenseDecoder<AB>> {
        let device = Default::default();
        let encoder = DenseEncoderConfig::new(vec![("obs".to_string(), 3)])
            .with_layers(1)
            .with_units(5)
            .init(&device);
        let rssm = RssmConfig::new(action, 5)
            .with_deter(FEAT / 2)
            .with_stoch(FEAT / 2, 0)
            .with_hidden(8)
            .init(&device);
        let decoder = DenseDecoderConfig::new(FEAT, vec![("obs".to_string(), 3)])
            .with_layers(1)
            .with_units(8)
            .init(&device);
        let reward = head(1, HeadDist::Mse);
        let discount = Some(head(1, HeadDist::Binary));
        WorldModel::new(encoder, rssm, decoder, reward, discount, WorldModelSettings::default()).unwrap()
    }

    fn run(actor_grad: ActorGrad, actor: MlpHead<AB>, action: usize) {
        let device = Default::default();
        let wm = world_model(action);
        let opt = OptimizerConfig::new(Schedule::Constant(1e-2));
        let mut ac = ActorCritic::new(actor, head(1, HeadDist::Mse), settings(actor_grad), opt.clone(), opt);
        let before = params(&ac.actor);

        let start = wm.rssm.initial(6);
        let terminal = Tensor::<AB, 1, Bool>::from_data(TensorData::new(vec![false; 6], [6]), &device);
        let reward_head = wm.reward.clone();
        let metrics = ac.train(
            &wm,
            &start,
            Some(terminal),
            |seq| {
                reward_head
                    .forward(seq.feat.clone())
                    .mode()
                    .reshape([seq.steps(), seq.rows()])
            },
            0,
        );

        for key in [
            "actor_loss",
            "critic_loss",
            "actor_grad_steps",
            "critic_grad_steps",
            "reward_mean",
            "reward_std",
            "reward_normed_mean",
            "reward_normed_std",
            "critic_slow",
            "critic_target",
            "actor_ent",
            "actor_ent_scale",
            "critic",
        ] {
            assert!(metrics.contains(key), "{}: missing metric {}", actor_grad, key);
        }
        assert!(metrics.get("actor_loss").unwrap().is_finite());

        let after = params(&ac.actor);
        assert_eq!(before.len(), after.len());
        let moved = before
            .iter()
            .zip(&after)
            .map(|(b, a)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(moved > 1e-4, "{}: actor did not move ({})", actor_grad, moved);
    }

    #[test]
    fn trains_with_every_estimator() {
        run(ActorGrad::Dynamics, continuous_actor(), ACTION);
        run(ActorGrad::Reinforce, head(3, HeadDist::OneHot), 3);
        run(ActorGrad::Both, continuous_actor(), ACTION);
    }
}
