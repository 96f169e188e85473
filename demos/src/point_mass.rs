//! Vectorized 2-D point-mass environment.
//!
//! A unit mass slides on the plane under damped dynamics and has to reach a
//! goal. Observations are split into two keys:
//!
//! - `position`: `[x, y, vx, vy]`
//! - `goal`: goal offset `[gx - x, gy - y]`
//!
//! Reward is the negative distance to the goal. Reaching the goal ends the
//! episode as terminal; running out of time truncates it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dreamer_rl::ActionSpace;

const DT: f32 = 0.1;
const DAMPING: f32 = 0.9;
const GOAL_RADIUS: f32 = 0.05;
const ARENA: f32 = 1.0;

/// Observation widths by key.
pub const OBS_KEYS: [(&str, usize); 2] = [("position", 4), ("goal", 2)];

/// Result from stepping all environments.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Observations after the step, per key [n_envs * width].
    pub observations: Vec<Vec<f32>>,
    /// Rewards received [n_envs].
    pub rewards: Vec<f32>,
    /// Goal reached [n_envs].
    pub terminals: Vec<bool>,
    /// Time limit hit [n_envs].
    pub truncations: Vec<bool>,
}

impl StepResult {
    /// Terminal or truncated.
    pub fn dones(&self) -> Vec<bool> {
        self.terminals
            .iter()
            .zip(&self.truncations)
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Body {
    pos: [f32; 2],
    vel: [f32; 2],
    goal: [f32; 2],
    steps: usize,
}

/// `n_envs` independent point masses.
pub struct PointMass {
    bodies: Vec<Body>,
    action_space: ActionSpace,
    max_steps: usize,
    rng: StdRng,
}

impl PointMass {
    /// Create the environments.
    ///
    /// `ActionSpace::Discrete(5)` maps to {stay, +x, -x, +y, -y};
    /// `ActionSpace::Continuous(2)` is a force in [-1, 1]^2.
    pub fn new(n_envs: usize, action_space: ActionSpace, max_steps: usize, seed: u64) -> Self {
        Self {
            bodies: vec![Body::default(); n_envs],
            action_space,
            max_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn n_envs(&self) -> usize {
        self.bodies.len()
    }

    /// Reset every environment and return the first observations.
    pub fn reset(&mut self) -> Vec<Vec<f32>> {
        for i in 0..self.bodies.len() {
            self.reset_env(i);
        }
        self.observations()
    }

    fn reset_env(&mut self, i: usize) {
        let mut sample = || self.rng.random_range(-ARENA..ARENA);
        self.bodies[i] = Body {
            pos: [sample(), sample()],
            vel: [0.0, 0.0],
            goal: [sample(), sample()],
            steps: 0,
        };
    }

    fn force(&self, action: &[f32]) -> [f32; 2] {
        match self.action_space {
            ActionSpace::Continuous(_) => [action[0].clamp(-1.0, 1.0), action[1].clamp(-1.0, 1.0)],
            ActionSpace::Discrete(_) => {
                let index = action
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                match index {
                    1 => [1.0, 0.0],
                    2 => [-1.0, 0.0],
                    3 => [0.0, 1.0],
                    4 => [0.0, -1.0],
                    _ => [0.0, 0.0],
                }
            }
        }
    }

    /// Advance all environments by one step.
    ///
    /// # Arguments
    ///
    /// * `actions` - Flattened actions [n_envs * action_dim]
    ///
    /// Finished environments are reset in place; the returned observations
    /// of those rows are the final ones of the finished episode.
    pub fn step(&mut self, actions: &[f32]) -> StepResult {
        let dim = self.action_space.dim();
        let n = self.bodies.len();
        let mut rewards = Vec::with_capacity(n);
        let mut terminals = Vec::with_capacity(n);
        let mut truncations = Vec::with_capacity(n);

        for i in 0..n {
            let force = self.force(&actions[i * dim..(i + 1) * dim]);
            let body = &mut self.bodies[i];
            for d in 0..2 {
                body.vel[d] = DAMPING * body.vel[d] + DT * force[d];
                body.pos[d] = (body.pos[d] + DT * body.vel[d]).clamp(-ARENA, ARENA);
            }
            body.steps += 1;

            let dist = distance(body.pos, body.goal);
            rewards.push(-dist);
            terminals.push(dist < GOAL_RADIUS);
            truncations.push(body.steps >= self.max_steps);
        }

        let observations = self.observations();
        let result = StepResult {
            observations,
            rewards,
            terminals,
            truncations,
        };
        for (i, done) in result.dones().into_iter().enumerate() {
            if done {
                self.reset_env(i);
            }
        }
        result
    }

    /// Current observations per key [n_envs * width].
    pub fn observations(&self) -> Vec<Vec<f32>> {
        let position = self
            .bodies
            .iter()
            .flat_map(|b| [b.pos[0], b.pos[1], b.vel[0], b.vel[1]])
            .collect();
        let goal = self
            .bodies
            .iter()
            .flat_map(|b| [b.goal[0] - b.pos[0], b.goal[1] - b.pos[1]])
            .collect();
        vec![position, goal]
    }
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_shapes() {
        let mut env = PointMass::new(3, ActionSpace::Continuous(2), 10, 0);
        let obs = env.reset();
        assert_eq!(obs.len(), OBS_KEYS.len());
        for ((_, width), values) in OBS_KEYS.iter().zip(&obs) {
            assert_eq!(values.len(), 3 * width);
        }
    }

    #[test]
    fn test_time_limit_truncates() {
        let mut env = PointMass::new(2, ActionSpace::Discrete(5), 3, 1);
        env.reset();
        let stay = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        for _ in 0..2 {
            assert!(env.step(&stay).truncations.iter().all(|t| !t));
        }
        let last = env.step(&stay);
        assert!(last.truncations.iter().all(|&t| t));
        assert!(last.rewards.iter().all(|r| *r <= 0.0));
    }
}
