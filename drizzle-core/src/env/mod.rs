pub mod thread_env_pool;
pub mod vec_env_pool;

use crate::rng::RNG;
use anyhow::Result;
use candle_core::Tensor;
use enum_dispatch::enum_dispatch;
use rand::Rng;
use thread_env_pool::ThreadEnvPool;
use vec_env_pool::VecEnvPool;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    MultiBinary(usize),
    Continuous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        size: usize,
    },
}

impl Space {
    pub fn continuous_from_dims(dims: &[usize]) -> Self {
        Self::Continuous {
            min: None,
            max: None,
            size: dims.iter().product(),
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) | Self::MultiBinary(size) => *size,
            Self::Continuous { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

pub struct SnapShot {
    pub state: Tensor,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

/// A single simulator instance. Observations are flat tensors.
pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Tensor>;
    fn step(&mut self, action: &Tensor) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeResult {
    pub reward: f32,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Set when the worker finished an episode on this step.
    pub episode: Option<EpisodeResult>,
}

/// Result of one synchronous step of every worker.
#[derive(Debug, Clone)]
pub struct ParallelStep {
    pub states: Vec<Tensor>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub infos: Vec<StepInfo>,
}

impl FromIterator<WorkerStep> for ParallelStep {
    fn from_iter<I: IntoIterator<Item = WorkerStep>>(iter: I) -> Self {
        let mut step = ParallelStep {
            states: vec![],
            rewards: vec![],
            dones: vec![],
            infos: vec![],
        };
        for WorkerStep {
            state,
            reward,
            done,
            info,
        } in iter
        {
            step.states.push(state);
            step.rewards.push(reward);
            step.dones.push(done);
            step.infos.push(info);
        }
        step
    }
}

/// A batch of environments stepped in lockstep. Finished workers are reset automatically, the
/// returned state is then the first state of the new episode.
#[enum_dispatch]
pub trait ParallelEnv {
    fn num_envs(&self) -> usize;

    /// Seeds the next `reset`. Worker `i` gets `seed + i`.
    fn seed(&mut self, seed: u64);

    fn reset(&mut self) -> Result<Vec<Tensor>>;

    /// `actions` is batched along the first dimension, one row per worker.
    fn step(&mut self, actions: &Tensor) -> Result<ParallelStep>;

    fn states_to_array(&self, states: &[Tensor]) -> Result<Tensor> {
        Ok(Tensor::stack(states, 0)?)
    }

    fn env_description(&self) -> EnvironmentDescription;

    fn close(&mut self) -> Result<()>;
}

#[enum_dispatch(ParallelEnv)]
pub enum EnvPoolKind<E: Env + Send + 'static> {
    Vec(VecEnvPool<E>),
    Thread(ThreadEnvPool<E>),
}

pub struct WorkerStep {
    pub state: Tensor,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EpisodeTracker {
    reward: f32,
    length: usize,
}

impl EpisodeTracker {
    fn track(&mut self, reward: f32, done: bool) -> Option<EpisodeResult> {
        self.reward += reward;
        self.length += 1;
        if done {
            let result = EpisodeResult {
                reward: self.reward,
                length: self.length,
            };
            *self = Self::default();
            Some(result)
        } else {
            None
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Steps a single worker, resetting it with `reset_seed` when the episode ends.
pub(crate) fn step_env<E: Env>(
    env: &mut E,
    tracker: &mut EpisodeTracker,
    action: &Tensor,
    reset_seed: u64,
) -> Result<WorkerStep> {
    let SnapShot {
        mut state,
        reward,
        terminated,
        truncated,
    } = env.step(action)?;
    let done = terminated || truncated;
    let episode = tracker.track(reward, done);
    if done {
        state = env.reset(reset_seed)?;
    }
    Ok(WorkerStep {
        state,
        reward,
        done,
        info: StepInfo { episode },
    })
}

pub(crate) fn draw_seeds(n: usize) -> Vec<u64> {
    RNG.with_borrow_mut(|rng| (0..n).map(|_| rng.random::<u64>()).collect())
}

pub(crate) fn reset_seeds(seed: Option<u64>, n: usize) -> Vec<u64> {
    match seed {
        Some(seed) => (0..n as u64).map(|i| seed.wrapping_add(i)).collect(),
        None => draw_seeds(n),
    }
}
