use crate::{
    Algorithm,
    agents::{LossReport, NStepLearner, StepOutput},
    config::Config,
    env::{EpisodeResult, ParallelEnv, ParallelStep},
    error::DrizzleError,
    storage::{ReturnEstimator, RolloutStorage, StepRecord},
};
use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::{debug, info};

/// What the hooks see after every update.
#[derive(Debug, Clone, Copy)]
pub struct UpdateStats<'a> {
    pub update: usize,
    pub total_steps: usize,
    /// Episodes finished since the previous update.
    pub episodes: &'a [EpisodeResult],
    pub losses: LossReport,
}

/// Callbacks around the training loop. Returning `true` from a hook stops training.
pub trait TrainingHooks {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_update_hook(&mut self, stats: &UpdateStats) -> bool;

    fn shutdown_hook(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs episode and loss statistics every `log_freq` updates.
#[derive(Debug, Clone)]
pub struct DefaultTrainingHooks {
    log_freq: usize,
    episodes: Vec<EpisodeResult>,
}

impl DefaultTrainingHooks {
    pub fn new(log_freq: usize) -> Self {
        Self {
            log_freq: log_freq.max(1),
            episodes: vec![],
        }
    }

    /// Mean and best reward of the episodes gathered since the last log line.
    fn reward_stats(&self) -> Option<(f32, f32)> {
        if self.episodes.is_empty() {
            return None;
        }
        let rewards = self.episodes.iter().map(|episode| episode.reward);
        Some((
            rewards.clone().sum::<f32>() / self.episodes.len() as f32,
            rewards.fold(f32::MIN, f32::max),
        ))
    }
}

impl TrainingHooks for DefaultTrainingHooks {
    fn post_update_hook(&mut self, stats: &UpdateStats) -> bool {
        self.episodes.extend_from_slice(stats.episodes);
        if stats.update % self.log_freq != 0 {
            return false;
        }
        let episodes = self.episodes.len();
        let losses = &stats.losses;
        match self.reward_stats() {
            Some((avg_reward, max_reward)) => info!(
                update = stats.update,
                total_steps = stats.total_steps,
                episodes,
                avg_reward,
                max_reward,
                policy_loss = losses.policy_loss,
                value_loss = losses.value_loss,
                entropy_loss = losses.entropy_loss,
                grad_norm = losses.grad_norm,
                "training progress"
            ),
            None => info!(
                update = stats.update,
                total_steps = stats.total_steps,
                episodes,
                policy_loss = losses.policy_loss,
                value_loss = losses.value_loss,
                entropy_loss = losses.entropy_loss,
                grad_norm = losses.grad_norm,
                "training progress"
            ),
        }
        self.episodes.clear();
        false
    }
}

/// Owns the parallel environment and the rollout storage, and runs the "collect `nsteps`, then
/// learn" cycle for any [`NStepLearner`].
pub struct RolloutDriver<E: ParallelEnv> {
    env: E,
    storage: RolloutStorage,
    return_estimator: ReturnEstimator,
    seed: Option<u64>,
    total_steps: usize,
    update_steps: usize,
    episode_results: Vec<EpisodeResult>,
}

impl<E: ParallelEnv> RolloutDriver<E> {
    pub fn new(env: E, config: &Config, device: Device) -> Result<Self> {
        if env.num_envs() != config.nworkers {
            return Err(DrizzleError::config(format!(
                "the env pool has {} workers, nworkers is {}",
                env.num_envs(),
                config.nworkers
            ))
            .into());
        }
        Ok(Self {
            env,
            storage: RolloutStorage::new(config.nsteps, config.nworkers, device),
            return_estimator: config.return_estimator(),
            seed: config.seed,
            total_steps: 0,
            update_steps: 0,
            episode_results: vec![],
        })
    }

    /// Resets every worker and returns the batched first states.
    pub fn initial_states(&mut self) -> Result<Tensor> {
        if let Some(seed) = self.seed {
            self.env.seed(seed);
        }
        let states = self.env.reset()?;
        self.env.states_to_array(&states)
    }

    pub fn one_step<L: NStepLearner>(
        &mut self,
        learner: &mut L,
        states: &Tensor,
    ) -> Result<Tensor> {
        let StepOutput {
            actions,
            log_probs,
            values,
            rnn_state,
        } = learner.act(states)?;
        let ParallelStep {
            states: next_states,
            rewards,
            dones,
            infos,
        } = self.env.step(&actions)?;
        learner.observe(&dones)?;
        self.episode_results
            .extend(infos.iter().filter_map(|info| info.episode));
        self.storage.append(StepRecord {
            states: states.clone(),
            actions,
            log_probs,
            values,
            rewards,
            dones,
            rnn_state,
        })?;
        self.total_steps += self.env.num_envs();
        self.env.states_to_array(&next_states)
    }

    fn collect<L: NStepLearner>(&mut self, learner: &mut L, states: Tensor) -> Result<Tensor> {
        let mut states = states;
        for _ in 0..self.storage.nsteps() {
            states = self.one_step(learner, &states)?;
        }
        Ok(states)
    }

    /// Collects `nsteps` steps, computes the returns, lets the learner update and empties the
    /// storage. Returns the states to continue from. The storage is emptied on failure too, the
    /// caller has to restart from freshly reset envs.
    pub fn nstep<L: NStepLearner>(
        &mut self,
        learner: &mut L,
        states: Tensor,
    ) -> Result<(Tensor, LossReport)> {
        let learned = self.collect(learner, states).and_then(|states| {
            let next_value = learner.bootstrap_value(&states)?;
            self.return_estimator.compute(&mut self.storage, &next_value)?;
            let report = learner.learn(&self.storage)?;
            Ok((states, report))
        });
        self.storage.reset();
        let (states, report) = learned?;
        let report = report.ensure_finite()?;
        self.update_steps += 1;
        Ok((states, report))
    }

    /// Episode results collected since the last call.
    pub fn take_episode_results(&mut self) -> Vec<EpisodeResult> {
        std::mem::take(&mut self.episode_results)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn update_steps(&self) -> usize {
        self.update_steps
    }

    pub fn storage(&self) -> &RolloutStorage {
        &self.storage
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn close(&mut self) -> Result<()> {
        self.env.close()
    }
}

/// Rolls out the actions chosen by `act` on `env` until `n` episodes finished. The env has to end
/// its episodes on its own.
pub fn eval_parallel<P: ParallelEnv>(
    env: &mut P,
    n: usize,
    mut act: impl FnMut(&Tensor) -> Result<Tensor>,
) -> Result<Vec<EpisodeResult>> {
    let mut results = Vec::with_capacity(n);
    if n == 0 {
        return Ok(results);
    }
    let reset = env.reset()?;
    let mut states = env.states_to_array(&reset)?;
    while results.len() < n {
        let actions = act(&states)?;
        let step = env.step(&actions)?;
        results.extend(step.infos.iter().filter_map(|info| info.episode));
        states = env.states_to_array(&step.states)?;
    }
    results.truncate(n);
    Ok(results)
}

/// An on-policy agent: a rollout driver, a learner and the training hooks.
pub struct OnPolicyAgent<E, L, H = DefaultTrainingHooks>
where
    E: ParallelEnv,
    L: NStepLearner,
    H: TrainingHooks,
{
    pub driver: RolloutDriver<E>,
    pub learner: L,
    pub hooks: H,
    eval_env: Option<E>,
    max_steps: usize,
    states: Option<Tensor>,
}

impl<E: ParallelEnv, L: NStepLearner, H: TrainingHooks> OnPolicyAgent<E, L, H> {
    pub fn new(driver: RolloutDriver<E>, learner: L, hooks: H, max_steps: usize) -> Self {
        Self {
            driver,
            learner,
            hooks,
            eval_env: None,
            max_steps,
            states: None,
        }
    }

    pub fn with_eval_env(mut self, eval_env: E) -> Self {
        self.eval_env = Some(eval_env);
        self
    }

    /// Runs a single update cycle. After a failed cycle the next one starts from reset envs.
    pub fn nstep(&mut self) -> Result<LossReport> {
        let states = match self.states.take() {
            Some(states) => states,
            None => {
                self.learner.reset()?;
                self.driver.initial_states()?
            }
        };
        let (states, report) = self.driver.nstep(&mut self.learner, states)?;
        self.states = Some(states);
        Ok(report)
    }

    /// Exactly `n` episode results of the greedy policy on the evaluation env.
    pub fn eval_parallel(&mut self, n: usize) -> Result<Vec<EpisodeResult>> {
        let env = self
            .eval_env
            .as_mut()
            .ok_or(DrizzleError::MissingFactory("eval_env"))?;
        let learner = &mut self.learner;
        eval_parallel(env, n, |states| learner.eval_action(states))
    }

    pub fn update_steps(&self) -> usize {
        self.driver.update_steps()
    }

    pub fn total_steps(&self) -> usize {
        self.driver.total_steps()
    }

    pub fn close(&mut self) -> Result<()> {
        self.driver.close()?;
        if let Some(eval_env) = self.eval_env.as_mut() {
            eval_env.close()?;
        }
        Ok(())
    }
}

impl<E: ParallelEnv, L: NStepLearner, H: TrainingHooks> Algorithm for OnPolicyAgent<E, L, H> {
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        while self.driver.total_steps() < self.max_steps {
            let losses = self.nstep()?;
            let episodes = self.driver.take_episode_results();
            let stats = UpdateStats {
                update: self.driver.update_steps(),
                total_steps: self.driver.total_steps(),
                episodes: &episodes,
                losses,
            };
            if self.hooks.post_update_hook(&stats) {
                debug!(update = stats.update, "training stopped by a hook");
                break;
            }
        }
        self.hooks.shutdown_hook()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Env, EnvironmentDescription, SnapShot, Space, vec_env_pool::VecEnvPool};
    use crate::storage::StorageState;
    use candle_core::DType;

    // counts up and ends the episode after `horizon` steps
    struct CountingEnv {
        t: usize,
        horizon: usize,
    }

    impl Env for CountingEnv {
        fn reset(&mut self, _seed: u64) -> Result<Tensor> {
            self.t = 0;
            Ok(Tensor::zeros(1, DType::F32, &Device::Cpu)?)
        }

        fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
            self.t += 1;
            Ok(SnapShot {
                state: Tensor::new(&[self.t as f32], &Device::Cpu)?,
                reward: 1.,
                terminated: self.t == self.horizon,
                truncated: false,
            })
        }

        fn env_description(&self) -> EnvironmentDescription {
            EnvironmentDescription::new(Space::continuous_from_dims(&[1]), Space::Discrete(2))
        }
    }

    // acts with zeros and records the returns it was given
    #[derive(Default)]
    struct RecordingLearner {
        returns: Vec<f32>,
        observed: usize,
        resets: usize,
    }

    impl NStepLearner for RecordingLearner {
        fn act(&mut self, states: &Tensor) -> Result<StepOutput> {
            let n = states.dim(0)?;
            Ok(StepOutput {
                actions: Tensor::zeros(n, DType::U32, &Device::Cpu)?,
                log_probs: vec![0.; n],
                values: vec![0.; n],
                rnn_state: None,
            })
        }

        fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            Ok(())
        }

        fn observe(&mut self, _dones: &[bool]) -> Result<()> {
            self.observed += 1;
            Ok(())
        }

        fn bootstrap_value(&mut self, states: &Tensor) -> Result<Vec<f32>> {
            Ok(vec![0.; states.dim(0)?])
        }

        fn learn(&mut self, storage: &RolloutStorage) -> Result<LossReport> {
            assert_eq!(storage.state(), StorageState::Ready);
            self.returns = storage.returns()?.to_vec();
            Ok(LossReport::default())
        }

        fn eval_action(&mut self, states: &Tensor) -> Result<Tensor> {
            Ok(Tensor::zeros(states.dim(0)?, DType::U32, &Device::Cpu)?)
        }
    }

    // fails once, on the `fail_at`-th call to `step`
    struct FlakyEnv {
        steps: usize,
        fail_at: usize,
    }

    impl Env for FlakyEnv {
        fn reset(&mut self, _seed: u64) -> Result<Tensor> {
            Ok(Tensor::zeros(1, DType::F32, &Device::Cpu)?)
        }

        fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
            self.steps += 1;
            if self.steps == self.fail_at {
                return Err(DrizzleError::env("transient env failure").into());
            }
            Ok(SnapShot {
                state: Tensor::new(&[self.steps as f32], &Device::Cpu)?,
                reward: 1.,
                terminated: false,
                truncated: false,
            })
        }

        fn env_description(&self) -> EnvironmentDescription {
            EnvironmentDescription::new(Space::continuous_from_dims(&[1]), Space::Discrete(2))
        }
    }

    fn pool(n: usize) -> Result<VecEnvPool<CountingEnv>> {
        VecEnvPool::new((0..n).map(|_| CountingEnv { t: 0, horizon: 3 }).collect())
    }

    fn config() -> Config {
        Config {
            nsteps: 4,
            nworkers: 2,
            use_gae: false,
            discount_factor: 1.,
            ..Config::default()
        }
    }

    #[test]
    fn reward_stats_only_cover_finished_episodes() {
        let mut hooks = DefaultTrainingHooks::new(2);
        assert_eq!(hooks.reward_stats(), None);
        let episodes = [
            EpisodeResult { reward: 2., length: 4 },
            EpisodeResult { reward: 5., length: 9 },
        ];
        let stats = UpdateStats {
            update: 1,
            total_steps: 16,
            episodes: &episodes,
            losses: LossReport::default(),
        };
        hooks.post_update_hook(&stats);
        assert_eq!(hooks.reward_stats(), Some((3.5, 5.)));
        // logging drains the collected episodes
        hooks.post_update_hook(&UpdateStats { update: 2, episodes: &[], ..stats });
        assert_eq!(hooks.reward_stats(), None);
    }

    #[test]
    fn nstep_fills_learns_and_resets() -> Result<()> {
        let mut driver = RolloutDriver::new(pool(2)?, &config(), Device::Cpu)?;
        let mut learner = RecordingLearner::default();
        let states = driver.initial_states()?;
        let (states, _) = driver.nstep(&mut learner, states)?;
        assert!(driver.storage().is_empty());
        assert_eq!(driver.storage().state(), StorageState::Empty);
        assert_eq!(driver.total_steps(), 8);
        assert_eq!(driver.update_steps(), 1);
        assert_eq!(learner.observed, 4);
        // episodes end after three steps, the fourth step starts a new one
        assert_eq!(learner.returns, vec![3., 3., 2., 2., 1., 1., 1., 1.]);
        let episodes = driver.take_episode_results();
        assert_eq!(episodes.len(), 2);
        assert!(episodes.iter().all(|episode| episode.length == 3));
        let first: Vec<f32> = states.flatten_all()?.to_vec1()?;
        assert_eq!(first, vec![1., 1.]);
        Ok(())
    }

    #[test]
    fn failed_collection_leaves_a_usable_storage() -> Result<()> {
        let config = Config {
            nworkers: 1,
            ..config()
        };
        let env = VecEnvPool::new(vec![FlakyEnv {
            steps: 0,
            fail_at: 3,
        }])?;
        let driver = RolloutDriver::new(env, &config, Device::Cpu)?;
        let hooks = DefaultTrainingHooks::new(1);
        let mut agent = OnPolicyAgent::new(driver, RecordingLearner::default(), hooks, 100);

        let err = agent.nstep().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DrizzleError>(),
            Some(DrizzleError::Env(_))
        ));
        assert!(agent.driver.storage().is_empty());
        assert_eq!(agent.driver.storage().state(), StorageState::Empty);
        assert_eq!(agent.update_steps(), 0);

        // the next cycle restarts from reset envs and a reset learner
        agent.nstep()?;
        assert_eq!(agent.learner.resets, 2);
        assert_eq!(agent.update_steps(), 1);
        assert_eq!(agent.learner.returns, vec![4., 3., 2., 1.]);
        assert!(agent.driver.storage().is_empty());
        Ok(())
    }

    #[test]
    fn worker_count_must_match() -> Result<()> {
        let result = RolloutDriver::new(pool(3)?, &config(), Device::Cpu);
        assert!(matches!(
            result.err().and_then(|err| err.downcast::<DrizzleError>().ok()),
            Some(DrizzleError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn train_stops_at_max_steps_and_evaluates() -> Result<()> {
        let driver = RolloutDriver::new(pool(2)?, &config(), Device::Cpu)?;
        let hooks = DefaultTrainingHooks::new(1);
        let mut agent = OnPolicyAgent::new(driver, RecordingLearner::default(), hooks, 20)
            .with_eval_env(pool(2)?);
        agent.train()?;
        // 8 steps per update
        assert_eq!(agent.update_steps(), 3);
        assert_eq!(agent.total_steps(), 24);
        let results = agent.eval_parallel(5)?;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|result| result.reward == 3.));
        agent.close()
    }
}
