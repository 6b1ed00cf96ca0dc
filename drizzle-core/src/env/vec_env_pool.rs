use super::{
    Env, EnvironmentDescription, EpisodeTracker, ParallelEnv, ParallelStep, draw_seeds,
    reset_seeds, step_env,
};
use crate::error::DrizzleError;
use anyhow::Result;
use candle_core::Tensor;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

/// Environments owned by the calling thread, stepped with rayon.
pub struct VecEnvPool<E: Env> {
    envs: Vec<E>,
    trackers: Vec<EpisodeTracker>,
    seed: Option<u64>,
    env_description: EnvironmentDescription,
}

impl<E: Env> VecEnvPool<E> {
    pub fn new(envs: Vec<E>) -> Result<Self> {
        let Some(first) = envs.first() else {
            return Err(DrizzleError::config("an env pool needs at least one environment").into());
        };
        let env_description = first.env_description();
        let trackers = vec![EpisodeTracker::default(); envs.len()];
        Ok(Self {
            envs,
            trackers,
            seed: None,
            env_description,
        })
    }
}

impl<E: Env + Send> ParallelEnv for VecEnvPool<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    fn reset(&mut self) -> Result<Vec<Tensor>> {
        let seeds = reset_seeds(self.seed, self.envs.len());
        self.trackers.iter_mut().for_each(EpisodeTracker::clear);
        self.envs
            .iter_mut()
            .zip(seeds)
            .map(|(env, seed)| env.reset(seed))
            .collect()
    }

    fn step(&mut self, actions: &Tensor) -> Result<ParallelStep> {
        let num_envs = self.envs.len();
        if actions.dim(0)? != num_envs {
            return Err(DrizzleError::contract(format!(
                "got {} actions for {num_envs} environments",
                actions.dim(0)?
            ))
            .into());
        }
        let actions = (0..num_envs)
            .map(|env_idx| actions.get(env_idx))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let seeds = draw_seeds(num_envs);
        let steps = self
            .envs
            .par_iter_mut()
            .zip(self.trackers.par_iter_mut())
            .enumerate()
            .map(|(env_idx, (env, tracker))| {
                step_env(env, tracker, &actions[env_idx], seeds[env_idx])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(steps.into_iter().collect())
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.env_description.clone()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
