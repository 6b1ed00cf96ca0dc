use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use drizzle_core::{
    Algorithm,
    agents::{LossReport, to_scalar},
    env::{EpisodeResult, ParallelEnv, Space},
    error::DrizzleError,
    on_policy_algorithm::{DefaultTrainingHooks, TrainingHooks, UpdateStats, eval_parallel},
    optimizer::OptimizerWithMaxGrad,
    policies::SeparatedSacNet,
    rng::RNG,
    storage::{ReplayBuffer, Transition},
};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SACParams {
    pub discount_factor: f32,
    pub soft_update_coef: f32,
    pub replay_batch_size: usize,
    /// Uniform random actions are taken until this many env steps were collected.
    pub train_start: usize,
    pub max_steps: usize,
    pub seed: Option<u64>,
}

/// Entropy temperature, either fixed or tuned towards a target entropy.
pub enum Temperature {
    Fixed(f32),
    Tuned {
        log_alpha: Var,
        optimizer: OptimizerWithMaxGrad,
        target_entropy: f32,
    },
}

impl Temperature {
    pub fn alpha(&self) -> Result<f32> {
        match self {
            Self::Fixed(alpha) => Ok(*alpha),
            Self::Tuned { log_alpha, .. } => to_scalar(&log_alpha.as_tensor().exp()?.squeeze(0)?),
        }
    }

    // -mean(log α (log π + target entropy))
    fn update(&mut self, log_probs: &Tensor) -> Result<()> {
        if let Self::Tuned {
            log_alpha,
            optimizer,
            target_entropy,
        } = self
        {
            let shifted = log_probs.detach().affine(1., f64::from(*target_entropy))?;
            let loss = log_alpha
                .as_tensor()
                .broadcast_mul(&shifted)?
                .mean_all()?
                .neg()?;
            optimizer.backward_step(&loss)?;
        }
        Ok(())
    }
}

// maps tanh actions in (-1, 1) into the bounds of the action space
struct ActionScale {
    low: Tensor,
    half_range: Tensor,
}

impl ActionScale {
    fn from_space(space: &Space, device: &Device) -> Result<Option<Self>> {
        let Space::Continuous {
            min: Some(min),
            max: Some(max),
            size,
        } = space
        else {
            return Ok(None);
        };
        let low = Tensor::from_slice(min, (1, *size), device)?;
        let high = Tensor::from_slice(max, (1, *size), device)?;
        let half_range = (high - &low)?.affine(0.5, 0.)?;
        Ok(Some(Self { low, half_range }))
    }

    fn scale(&self, actions: &Tensor) -> Result<Tensor> {
        Ok(actions
            .affine(1., 1.)?
            .broadcast_mul(&self.half_range)?
            .broadcast_add(&self.low)?)
    }
}

/// Soft actor-critic over a parallel env: twin critics with Polyak averaged targets, a
/// tanh-gaussian actor and an entropy temperature.
pub struct SAC<E: ParallelEnv, H: TrainingHooks = DefaultTrainingHooks> {
    pub net: SeparatedSacNet,
    target: SeparatedSacNet,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
    temperature: Temperature,
    replay: ReplayBuffer,
    env: E,
    eval_env: Option<E>,
    pub hooks: H,
    pub params: SACParams,
    action_scale: Option<ActionScale>,
    device: Device,
    states: Option<Tensor>,
    total_steps: usize,
    update_steps: usize,
    episodes: Vec<EpisodeResult>,
}

impl<E: ParallelEnv, H: TrainingHooks> SAC<E, H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        net: SeparatedSacNet,
        target: SeparatedSacNet,
        actor_optimizer: OptimizerWithMaxGrad,
        critic_optimizer: OptimizerWithMaxGrad,
        temperature: Temperature,
        replay: ReplayBuffer,
        env: E,
        hooks: H,
        params: SACParams,
        device: Device,
    ) -> Result<Self> {
        if net.action_dim() != env.env_description().action_size() {
            return Err(
                DrizzleError::config("the network does not match the action space").into(),
            );
        }
        target.soft_update_critics(&net, 1.)?;
        let action_scale = ActionScale::from_space(&env.env_description().action_space, &device)?;
        Ok(Self {
            net,
            target,
            actor_optimizer,
            critic_optimizer,
            temperature,
            replay,
            env,
            eval_env: None,
            hooks,
            params,
            action_scale,
            device,
            states: None,
            total_steps: 0,
            update_steps: 0,
            episodes: vec![],
        })
    }

    pub fn with_eval_env(mut self, eval_env: E) -> Self {
        self.eval_env = Some(eval_env);
        self
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn update_steps(&self) -> usize {
        self.update_steps
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn alpha(&self) -> Result<f32> {
        self.temperature.alpha()
    }

    fn random_actions(&self, n: usize) -> Result<Tensor> {
        let action_dim = self.net.action_dim();
        let actions: Vec<f32> = RNG.with_borrow_mut(|rng| {
            (0..n * action_dim)
                .map(|_| rng.random_range(-1f32..1.))
                .collect()
        });
        Ok(Tensor::from_vec(actions, (n, action_dim), &self.device)?)
    }

    fn env_actions(&self, actions: &Tensor) -> Result<Tensor> {
        match &self.action_scale {
            Some(scale) => scale.scale(actions),
            None => Ok(actions.clone()),
        }
    }

    fn initial_states(&mut self) -> Result<Tensor> {
        if let Some(seed) = self.params.seed {
            self.env.seed(seed);
        }
        let states = self.env.reset()?;
        self.env.states_to_array(&states)
    }

    /// Steps every worker once and stores the transitions.
    pub fn env_step(&mut self, states: &Tensor) -> Result<Tensor> {
        let n = self.env.num_envs();
        let actions = if self.total_steps < self.params.train_start {
            self.random_actions(n)?
        } else {
            self.net.policy(states)?.action()?
        };
        let step = self.env.step(&self.env_actions(&actions)?)?;
        for w in 0..n {
            self.replay.push(Transition {
                state: states.get(w)?,
                action: actions.get(w)?,
                reward: step.rewards[w],
                next_state: step.states[w].clone(),
                done: step.dones[w],
            });
        }
        self.episodes
            .extend(step.infos.iter().filter_map(|info| info.episode));
        self.total_steps += n;
        self.env.states_to_array(&step.states)
    }

    /// One gradient step of the critics, the actor and the temperature, then a target update.
    pub fn update(&mut self) -> Result<LossReport> {
        let batch = self.replay.sample(self.params.replay_batch_size)?;
        let alpha = f64::from(self.temperature.alpha()?);

        // r + γ (1 - d) (min Q_targ(s', a') - α log π(a' | s'))
        let (next_actions, next_log_probs) = self
            .net
            .policy(&batch.next_states)?
            .rsample_with_log_prob()?;
        let (target_q1, target_q2) = self.target.q_values(&batch.next_states, &next_actions)?;
        let next_value = (target_q1.minimum(&target_q2)? - next_log_probs.affine(alpha, 0.)?)?;
        let not_done = batch.dones.affine(-1., 1.)?;
        let target_q = (&batch.rewards
            + (next_value * not_done)?.affine(f64::from(self.params.discount_factor), 0.)?)?
        .detach();
        let (q1, q2) = self.net.q_values(&batch.states, &batch.actions)?;
        let critic_loss = ((q1 - &target_q)?.sqr()?.mean_all()?
            + (q2 - &target_q)?.sqr()?.mean_all()?)?;
        self.critic_optimizer.backward_step(&critic_loss)?;

        let (actions, log_probs) = self.net.policy(&batch.states)?.rsample_with_log_prob()?;
        let (q1, q2) = self.net.q_values(&batch.states, &actions)?;
        let actor_loss = (log_probs.affine(alpha, 0.)? - q1.minimum(&q2)?)?.mean_all()?;
        let grad_norm = self.actor_optimizer.backward_step(&actor_loss)?;

        self.temperature.update(&log_probs)?;
        self.target
            .soft_update_critics(&self.net, self.params.soft_update_coef)?;
        self.update_steps += 1;
        Ok(LossReport {
            policy_loss: to_scalar(&actor_loss)?,
            value_loss: to_scalar(&critic_loss)?,
            entropy_loss: -to_scalar(&log_probs.mean_all()?)?,
            termination_loss: None,
            grad_norm,
        })
    }

    /// Exactly `n` episode results of the deterministic policy on the evaluation env.
    pub fn eval_parallel(&mut self, n: usize) -> Result<Vec<EpisodeResult>> {
        let mut eval_env = self
            .eval_env
            .take()
            .ok_or(DrizzleError::MissingFactory("eval_env"))?;
        let results = eval_parallel(&mut eval_env, n, |states| {
            let actions = self.net.policy(states)?.best_action()?;
            self.env_actions(&actions)
        });
        self.eval_env = Some(eval_env);
        results
    }

    pub fn close(&mut self) -> Result<()> {
        self.env.close()?;
        if let Some(eval_env) = self.eval_env.as_mut() {
            eval_env.close()?;
        }
        Ok(())
    }
}

impl<E: ParallelEnv, H: TrainingHooks> Algorithm for SAC<E, H> {
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        let mut states = match self.states.take() {
            Some(states) => states,
            None => self.initial_states()?,
        };
        while self.total_steps < self.params.max_steps {
            states = self.env_step(&states)?;
            if self.total_steps < self.params.train_start
                || self.replay.len() < self.params.replay_batch_size
            {
                continue;
            }
            let losses = self.update()?.ensure_finite()?;
            let episodes = std::mem::take(&mut self.episodes);
            let stats = UpdateStats {
                update: self.update_steps,
                total_steps: self.total_steps,
                episodes: &episodes,
                losses,
            };
            if self.hooks.post_update_hook(&stats) {
                debug!(update = self.update_steps, "training stopped by a hook");
                break;
            }
        }
        self.states = Some(states);
        self.hooks.shutdown_hook()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_are_scaled_into_the_bounds() -> Result<()> {
        let space = Space::Continuous {
            min: Some(vec![-2., 0.]),
            max: Some(vec![2., 1.]),
            size: 2,
        };
        let scale = ActionScale::from_space(&space, &Device::Cpu)?
            .ok_or_else(|| anyhow::anyhow!("bounded space without scale"))?;
        let actions = Tensor::new(&[[-1f32, -1.], [1., 1.], [0., 0.]], &Device::Cpu)?;
        let scaled: Vec<Vec<f32>> = scale.scale(&actions)?.to_vec2()?;
        assert_eq!(scaled, vec![vec![-2., 0.], vec![2., 1.], vec![0., 0.5]]);
        let unbounded = Space::continuous_from_dims(&[2]);
        assert!(ActionScale::from_space(&unbounded, &Device::Cpu)?.is_none());
        Ok(())
    }
}
