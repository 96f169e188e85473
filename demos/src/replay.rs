//! Episode replay for world-model training.
//!
//! Collects per-environment transitions into episodes and samples
//! fixed-length windows from them as time-major [`Batch`]es.

use std::collections::VecDeque;

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, TensorData};
use rand::Rng;

use dreamer_rl::{Batch, Observations};

/// One recorded step.
///
/// `action` led to `obs`; `reward` was received on arrival.
#[derive(Debug, Clone)]
pub struct Step {
    pub obs: Vec<Vec<f32>>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub is_first: bool,
    pub is_terminal: bool,
}

/// Configuration for the replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// `(key, width)` of each observation.
    pub obs_keys: Vec<(String, usize)>,
    /// Action width.
    pub action_dim: usize,
    /// Maximum stored episodes before the oldest are discarded.
    pub capacity: usize,
}

/// Finished and in-progress episodes.
pub struct Replay {
    config: ReplayConfig,
    ongoing: Vec<Vec<Step>>,
    episodes: VecDeque<Vec<Step>>,
    total_steps: usize,
}

impl Replay {
    pub fn new(config: ReplayConfig, n_envs: usize) -> Self {
        Self {
            config,
            ongoing: vec![Vec::new(); n_envs],
            episodes: VecDeque::new(),
            total_steps: 0,
        }
    }

    /// Number of recorded steps.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Number of stored finished episodes.
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Append a step for environment `env`; `done` closes the episode.
    pub fn add(&mut self, env: usize, step: Step, done: bool) {
        self.ongoing[env].push(step);
        self.total_steps += 1;
        if done {
            let episode = std::mem::take(&mut self.ongoing[env]);
            self.episodes.push_back(episode);
            while self.episodes.len() > self.config.capacity {
                self.episodes.pop_front();
            }
        }
    }

    /// Sample `batch` windows of `length` steps.
    ///
    /// Returns `None` until some finished episode is at least `length` long.
    pub fn sample<B: Backend>(
        &self,
        batch: usize,
        length: usize,
        device: &B::Device,
    ) -> Option<Batch<B>> {
        let eligible: Vec<&Vec<Step>> = self.episodes.iter().filter(|e| e.len() >= length).collect();
        if eligible.is_empty() {
            return None;
        }

        let mut rng = rand::rng();
        let windows: Vec<&[Step]> = (0..batch)
            .map(|_| {
                let episode = eligible[rng.random_range(0..eligible.len())];
                let start = rng.random_range(0..=episode.len() - length);
                &episode[start..start + length]
            })
            .collect();

        // Time-major: row t * batch + n.
        let at = |t: usize, n: usize| &windows[n][t];
        let mut obs = Observations::new();
        for (k, (key, width)) in self.config.obs_keys.iter().enumerate() {
            let mut values = Vec::with_capacity(length * batch * width);
            for t in 0..length {
                for n in 0..batch {
                    values.extend_from_slice(&at(t, n).obs[k]);
                }
            }
            obs.insert(
                key.clone(),
                Tensor::from_data(TensorData::new(values, [length, batch, *width]), device),
            );
        }

        let dim = self.config.action_dim;
        let mut action = Vec::with_capacity(length * batch * dim);
        let mut reward = Vec::with_capacity(length * batch);
        let mut is_first = Vec::with_capacity(length * batch);
        let mut is_terminal = Vec::with_capacity(length * batch);
        for t in 0..length {
            for n in 0..batch {
                let step = at(t, n);
                action.extend_from_slice(&step.action);
                reward.push(step.reward);
                is_first.push(step.is_first);
                is_terminal.push(step.is_terminal);
            }
        }

        let flags = |values: Vec<bool>| -> Tensor<B, 2, Bool> {
            Tensor::from_data(TensorData::new(values, [length, batch]), device)
        };
        Some(Batch {
            obs,
            action: Tensor::from_data(TensorData::new(action, [length, batch, dim]), device),
            reward: Tensor::from_data(TensorData::new(reward, [length, batch]), device),
            is_first: flags(is_first),
            is_terminal: flags(is_terminal),
        })
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    fn replay() -> Replay {
        let config = ReplayConfig {
            obs_keys: vec![("x".to_string(), 2)],
            action_dim: 1,
            capacity: 2,
        };
        Replay::new(config, 1)
    }

    fn step(i: usize) -> Step {
        Step {
            obs: vec![vec![i as f32, -(i as f32)]],
            action: vec![i as f32],
            reward: i as f32,
            is_first: i == 0,
            is_terminal: false,
        }
    }

    #[test]
    fn test_sample_needs_a_long_enough_episode() {
        let mut replay = replay();
        for i in 0..3 {
            replay.add(0, step(i), i == 2);
        }
        assert!(replay.sample::<NdArray>(2, 4, &Default::default()).is_none());
        assert!(replay.sample::<NdArray>(2, 3, &Default::default()).is_some());
    }

    #[test]
    fn test_windows_are_time_major_and_contiguous() {
        let mut replay = replay();
        for i in 0..6 {
            replay.add(0, step(i), i == 5);
        }
        let batch = replay.sample::<NdArray>(3, 4, &Default::default()).unwrap();
        batch.check_shapes();
        let reward = batch.reward.into_data().to_vec::<f32>().unwrap();
        for n in 0..3 {
            for t in 1..4 {
                assert_eq!(reward[t * 3 + n], reward[(t - 1) * 3 + n] + 1.0);
            }
        }
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut replay = replay();
        for _ in 0..3 {
            for i in 0..2 {
                replay.add(0, step(i), i == 1);
            }
        }
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.total_steps(), 6);
    }
}
