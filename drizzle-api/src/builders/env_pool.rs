use anyhow::Result;
use candle_core::Device;
use drizzle_core::{
    env::{Env, EnvPoolKind, thread_env_pool::ThreadEnvPool, vec_env_pool::VecEnvPool},
    error::DrizzleError,
};

pub trait EnvBuilderTrait {
    type Env: Env + Send + 'static;

    fn build_env(&self, device: &Device) -> Result<Self::Env>;
}

impl<E: Env + Send + 'static, F: Fn(&Device) -> Result<E>> EnvBuilderTrait for F {
    type Env = E;

    fn build_env(&self, device: &Device) -> Result<Self::Env> {
        self(device)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvPoolType {
    /// All envs stepped in the calling process with rayon.
    #[default]
    Vec,
    /// One worker thread per env.
    Thread,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvPoolBuilder {
    pub pool_type: EnvPoolType,
    pub n_envs: usize,
}

impl EnvPoolBuilder {
    pub fn new(pool_type: EnvPoolType, n_envs: usize) -> Self {
        Self { pool_type, n_envs }
    }

    pub fn build<EB: EnvBuilderTrait>(
        &self,
        builder: &EB,
        device: &Device,
    ) -> Result<EnvPoolKind<EB::Env>> {
        if self.n_envs == 0 {
            return Err(DrizzleError::config("an env pool needs at least one env").into());
        }
        let envs = (0..self.n_envs)
            .map(|_| builder.build_env(device))
            .collect::<Result<Vec<_>>>()?;
        let pool: EnvPoolKind<EB::Env> = match self.pool_type {
            EnvPoolType::Vec => VecEnvPool::new(envs)?.into(),
            EnvPoolType::Thread => ThreadEnvPool::new(envs)?.into(),
        };
        Ok(pool)
    }
}
