//! Dreamer on the point-mass environment (NdArray backend).
//!
//! # Loop
//!
//! 1. Prefill the replay with random actions
//! 2. Act with the agent for `train_every` steps per environment
//! 3. Train on one sampled batch, log metrics to the console and
//!    `dreamer_point_mass.csv`, repeat
//!
//! Run with: `cargo run --release -- point-mass [config.json]`
//! (`point-mass-discrete` for the 5-way discrete action variant).

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Bool, Tensor, TensorData};
use rand::Rng;
use tracing::{info, warn};

use dreamer_rl::{
    ActionSpace, Agent, ConsoleLogger, CsvLogger, DreamerConfig, MetricsLogger, MultiLogger, Observations,
    PolicyMode, PolicyState,
};

use crate::point_mass::{PointMass, OBS_KEYS};
use crate::replay::{Replay, ReplayConfig, Step};

type B = Autodiff<NdArray>;

const N_ENVS: usize = 8;
const EPISODE_STEPS: usize = 100;
const PREFILL_STEPS: usize = 2_000;
const TRAIN_EVERY: usize = 5;
const ITERATIONS: usize = 2_000;
const BATCH: usize = 16;
const SEQUENCE: usize = 32;
const REPORT_CONTEXT: usize = 5;
const METRICS_CSV: &str = "dreamer_point_mass.csv";

/// Small network sizes that train on a CPU in minutes.
fn demo_config() -> DreamerConfig {
    let mut config = DreamerConfig::default();
    config.rssm.deter = 64;
    config.rssm.hidden = 64;
    config.rssm.stoch = 8;
    config.rssm.discrete = 8;
    for section in [
        &mut config.encoder,
        &mut config.decoder,
        &mut config.reward_head,
        &mut config.discount_head,
        &mut config.actor,
        &mut config.critic,
    ] {
        section.layers = 2;
        section.units = 64;
    }
    config.slow_target_update = 20;
    config.expl_noise = 0.1;
    config.loss_scales.remove("proprio");
    config
}

fn load_config(path: Option<&str>) -> dreamer_rl::Result<DreamerConfig> {
    match path {
        Some(path) => DreamerConfig::from_file(path),
        None => Ok(demo_config()),
    }
}

fn to_tensors(obs: &[Vec<f32>], device: &NdArrayDevice) -> Observations<B> {
    OBS_KEYS
        .iter()
        .zip(obs)
        .map(|((key, width), values)| {
            let tensor = Tensor::from_data(TensorData::new(values.clone(), [1, N_ENVS, *width]), device);
            (key.to_string(), tensor)
        })
        .collect()
}

fn split_rows(obs: &[Vec<f32>], env: usize) -> Vec<Vec<f32>> {
    OBS_KEYS
        .iter()
        .zip(obs)
        .map(|((_, width), values)| values[env * width..(env + 1) * width].to_vec())
        .collect()
}

fn random_actions(space: ActionSpace) -> Vec<f32> {
    let mut rng = rand::rng();
    let dim = space.dim();
    (0..N_ENVS)
        .flat_map(|_| match space {
            ActionSpace::Continuous(_) => (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect::<Vec<f32>>(),
            ActionSpace::Discrete(_) => {
                let hot = rng.random_range(0..dim);
                (0..dim).map(|i| if i == hot { 1.0 } else { 0.0 }).collect()
            }
        })
        .collect()
}

/// Records one vectorized step; returns the per-row `is_first` flags of the
/// next step.
fn record(replay: &mut Replay, result: crate::point_mass::StepResult, actions: &[f32], dim: usize) -> Vec<bool> {
    let dones = result.dones();
    for env in 0..N_ENVS {
        let step = Step {
            obs: split_rows(&result.observations, env),
            action: actions[env * dim..(env + 1) * dim].to_vec(),
            reward: result.rewards[env],
            is_first: false,
            is_terminal: result.terminals[env],
        };
        replay.add(env, step, dones[env]);
    }
    dones
}

fn first_step(obs: &[Vec<f32>], env: usize, dim: usize) -> Step {
    Step {
        obs: split_rows(obs, env),
        action: vec![0.0; dim],
        reward: 0.0,
        is_first: true,
        is_terminal: false,
    }
}

pub fn run(space: ActionSpace, config_path: Option<&str>) -> dreamer_rl::Result<()> {
    info!(?space, "=== Dreamer point mass ===");
    let config = load_config(config_path)?.resolve(space)?;
    let device = NdArrayDevice::default();
    let obs_keys: Vec<(String, usize)> = OBS_KEYS.iter().map(|(k, w)| (k.to_string(), *w)).collect();

    let mut agent: Agent<B> = Agent::new(&config, obs_keys.clone(), &device)?;
    let mut env = PointMass::new(N_ENVS, space, EPISODE_STEPS, 0);
    let mut replay = Replay::new(
        ReplayConfig {
            obs_keys,
            action_dim: space.dim(),
            capacity: 1_000,
        },
        N_ENVS,
    );
    let mut logger = MultiLogger::new()
        .add(ConsoleLogger::new(50))
        .add(CsvLogger::new(METRICS_CSV)?);
    let dim = space.dim();

    // Episodes open with the reset observation and a zero action.
    let mut obs = env.reset();
    for i in 0..N_ENVS {
        replay.add(i, first_step(&obs, i, dim), false);
    }
    let mut is_first = vec![true; N_ENVS];
    let mut episode_return = vec![0.0f32; N_ENVS];
    let mut finished = Vec::new();

    while replay.total_steps() < PREFILL_STEPS {
        let actions = random_actions(space);
        let result = env.step(&actions);
        for (ret, r) in episode_return.iter_mut().zip(&result.rewards) {
            *ret += r;
        }
        let dones = record(&mut replay, result, &actions, dim);
        obs = env.observations();
        for (i, done) in dones.iter().enumerate() {
            if *done {
                replay.add(i, first_step(&obs, i, dim), false);
                finished.push(std::mem::take(&mut episode_return[i]));
            }
        }
        is_first = dones;
    }
    info!(steps = replay.total_steps(), episodes = replay.len(), "prefill done");

    let mut state: Option<PolicyState<B>> = None;
    for iteration in 0..ITERATIONS {
        for _ in 0..TRAIN_EVERY {
            let first = Tensor::<B, 1, Bool>::from_data(TensorData::new(is_first.clone(), [N_ENVS]), &device);
            let (action, next_state) = agent.policy(&to_tensors(&obs, &device), first, state, PolicyMode::Train)?;
            state = Some(next_state);
            let actions = action.into_data().to_vec::<f32>().unwrap_or_default();

            let result = env.step(&actions);
            for (ret, r) in episode_return.iter_mut().zip(&result.rewards) {
                *ret += r;
            }
            let dones = record(&mut replay, result, &actions, dim);
            obs = env.observations();
            for (i, done) in dones.iter().enumerate() {
                if *done {
                    replay.add(i, first_step(&obs, i, dim), false);
                    finished.push(std::mem::take(&mut episode_return[i]));
                }
            }
            is_first = dones;
        }

        let Some(batch) = replay.sample::<B>(BATCH, SEQUENCE, &device) else {
            warn!(iteration, "no episode long enough to sample yet");
            continue;
        };
        let (_, mut metrics) = agent.train(&batch, None)?;
        if iteration % 100 == 0 {
            metrics.extend(agent.report(&batch, REPORT_CONTEXT, "position")?);
        }
        if !finished.is_empty() {
            let returns = Tensor::<B, 1>::from_data(TensorData::new(finished.clone(), [finished.len()]), &device);
            metrics.insert_mean("episode_return", returns);
            finished.clear();
        }
        logger.log(agent.step_counter().get(), &metrics);
    }

    logger.flush();
    info!(path = METRICS_CSV, "training finished");
    Ok(())
}
