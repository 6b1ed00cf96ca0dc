use anyhow::Result;
use candle_core::{Device, Tensor};
use drizzle_core::env::{Env, EnvironmentDescription, SnapShot, Space};

/// Episodes last exactly `EPISODE_LENGTH` steps and pay a reward of 1 per step, whatever the
/// action. The observation is `[offset, t / EPISODE_LENGTH]` where the offset comes from the reset
/// seed.
pub struct DummyEnvDeterministic {
    t: usize,
    offset: f32,
    action_space: Space,
    device: Device,
}

pub const EPISODE_LENGTH: usize = 3;

impl DummyEnvDeterministic {
    pub fn new(action_space: Space, device: &Device) -> Self {
        Self {
            t: 0,
            offset: 0.,
            action_space,
            device: device.clone(),
        }
    }

    pub fn discrete(device: &Device) -> Self {
        Self::new(Space::Discrete(2), device)
    }

    fn observation(&self) -> Result<Tensor> {
        let progress = self.t as f32 / EPISODE_LENGTH as f32;
        Ok(Tensor::new(&[self.offset, progress], &self.device)?)
    }
}

impl Env for DummyEnvDeterministic {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.t = 0;
        self.offset = (seed % 100) as f32 / 100.;
        self.observation()
    }

    fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
        self.t += 1;
        Ok(SnapShot {
            state: self.observation()?,
            reward: 1.,
            terminated: self.t >= EPISODE_LENGTH,
            truncated: false,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::continuous_from_dims(&[2]), self.action_space.clone())
    }
}

/// One dimensional continuous control: the reward is `-(a - target)²` with the target given by
/// the observation. Actions are bounded to `[-2, 2]`, episodes are truncated after `horizon` steps.
pub struct ContinuousDummyEnv {
    t: usize,
    horizon: usize,
    target: f32,
    device: Device,
}

impl ContinuousDummyEnv {
    pub fn new(horizon: usize, device: &Device) -> Self {
        Self {
            t: 0,
            horizon,
            target: 0.,
            device: device.clone(),
        }
    }

    fn observation(&self) -> Result<Tensor> {
        Ok(Tensor::new(&[self.target, self.t as f32 / self.horizon as f32], &self.device)?)
    }
}

impl Env for ContinuousDummyEnv {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.t = 0;
        self.target = (seed % 3) as f32 - 1.;
        self.observation()
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action = action.flatten_all()?.to_vec1::<f32>()?;
        let error = action.first().copied().unwrap_or_default() - self.target;
        self.t += 1;
        Ok(SnapShot {
            state: self.observation()?,
            reward: -error * error,
            terminated: false,
            truncated: self.t >= self.horizon,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        let action_space = Space::Continuous {
            min: Some(vec![-2.]),
            max: Some(vec![2.]),
            size: 1,
        };
        EnvironmentDescription::new(Space::continuous_from_dims(&[2]), action_space)
    }
}
