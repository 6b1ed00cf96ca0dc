use crate::total_loss;
use anyhow::Result;
use candle_core::{D, Device, Tensor};
use drizzle_core::{
    agents::{LossReport, NStepLearner, StepOutput, to_scalar, to_vec1},
    distributions::indices_tensor,
    error::DrizzleError,
    optimizer::OptimizerWithMaxGrad,
    policies::OptionCriticNet,
    rng::RNG,
    storage::RolloutStorage,
    tensors::{EntropyLoss, PolicyLoss, ValueLoss},
    utils::cooler::Cooler,
};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AOCParams {
    pub value_loss_weight: f32,
    pub entropy_weight: f32,
    pub beta_loss_weight: f32,
    /// Margin added to the termination advantage, favours longer options.
    pub delib_cost: f32,
    /// Exploration rate of the option selection.
    pub opt_epsilon: f32,
}

// option bookkeeping of one rollout, t-major like the storage
#[derive(Debug, Default)]
struct OptionTrace {
    prev_options: Vec<u32>,
    options: Vec<u32>,
    is_initial: Vec<f32>,
}

/// Advantage option-critic: every worker follows an option until it terminates, the options are
/// learned with an actor-critic update plus a termination loss.
pub struct AOC<N: OptionCriticNet> {
    pub net: N,
    pub optimizer: OptimizerWithMaxGrad,
    pub params: AOCParams,
    lr_cooler: Cooler,
    options: Vec<u32>,
    is_initial: Vec<bool>,
    trace: OptionTrace,
    device: Device,
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (idx, q)| {
            if *q > best.1 { (idx, *q) } else { best }
        })
        .0
}

/// `mean(β(s, ω_prev) · (Q(s, ω_prev) - V(s) + delib_cost) · not_initial)` with the advantage
/// detached and `V(s) = (1 - ε) max Q + ε mean Q`. `prev_options` is `[N, 1]`.
fn termination_loss(
    q: &Tensor,
    beta: &Tensor,
    prev_options: &Tensor,
    not_initial: &Tensor,
    opt_epsilon: f32,
    delib_cost: f32,
) -> Result<Tensor> {
    let epsilon = f64::from(opt_epsilon);
    let v = (q.max(D::Minus1)?.affine(1. - epsilon, 0.)?
        + q.mean(D::Minus1)?.affine(epsilon, 0.)?)?;
    let q_prev = q.gather(prev_options, 1)?.squeeze(1)?;
    let beta_prev = beta.gather(prev_options, 1)?.squeeze(1)?;
    let advantage = ((q_prev - v)?.affine(1., f64::from(delib_cost))? * not_initial)?.detach();
    Ok((beta_prev * advantage)?.mean_all()?)
}

impl<N: OptionCriticNet> AOC<N> {
    pub fn new(
        net: N,
        optimizer: OptimizerWithMaxGrad,
        params: AOCParams,
        lr_cooler: Cooler,
        nworkers: usize,
        device: Device,
    ) -> Self {
        Self {
            net,
            optimizer,
            params,
            lr_cooler,
            options: vec![0; nworkers],
            is_initial: vec![true; nworkers],
            trace: OptionTrace::default(),
            device,
        }
    }

    /// The option every worker currently follows.
    pub fn current_options(&self) -> &[u32] {
        &self.options
    }

    fn epsilon_greedy(&self, q: &[f32]) -> u32 {
        RNG.with_borrow_mut(|rng| {
            if rng.random::<f32>() < self.params.opt_epsilon {
                rng.random_range(0..q.len()) as u32
            } else {
                argmax(q) as u32
            }
        })
    }

    fn rows(&self, options: &[u32]) -> Result<Tensor> {
        let num_options = self.net.num_options();
        let rows: Vec<usize> = options
            .iter()
            .enumerate()
            .map(|(w, option)| w * num_options + *option as usize)
            .collect();
        indices_tensor(&rows, &self.device)
    }

    fn option_tensor(&self, options: &[u32]) -> Result<Tensor> {
        let len = options.len();
        Ok(Tensor::from_vec(options.to_vec(), (len, 1), &self.device)?)
    }
}

impl<N: OptionCriticNet> NStepLearner for AOC<N> {
    fn act(&mut self, states: &Tensor) -> Result<StepOutput> {
        let output = self.net.forward(states)?;
        let q: Vec<Vec<f32>> = output.q.detach().to_vec2()?;
        let beta: Vec<Vec<f32>> = output.beta.detach().to_vec2()?;
        if q.len() != self.options.len() {
            return Err(DrizzleError::contract(format!(
                "{} states for {} workers",
                q.len(),
                self.options.len()
            ))
            .into());
        }
        let prev_options = self.options.clone();
        let mut options = Vec::with_capacity(q.len());
        for (w, prev) in prev_options.iter().enumerate() {
            let terminated = self.is_initial[w]
                || RNG.with_borrow_mut(|rng| rng.random::<f32>() < beta[w][*prev as usize]);
            options.push(if terminated {
                self.epsilon_greedy(&q[w])
            } else {
                *prev
            });
        }
        let mut policy = output.policy.index_select(&self.rows(&options)?)?;
        let actions = policy.action()?;
        let log_probs = to_vec1(&policy.log_prob()?)?;
        let values = options
            .iter()
            .enumerate()
            .map(|(w, option)| q[w][*option as usize])
            .collect();
        self.trace.prev_options.extend(&prev_options);
        self.trace.options.extend(&options);
        self.trace
            .is_initial
            .extend(self.is_initial.iter().map(|initial| f32::from(u8::from(*initial))));
        self.options = options;
        Ok(StepOutput {
            actions,
            log_probs,
            values,
            rnn_state: None,
        })
    }

    // every worker picks a fresh option on the next step
    fn reset(&mut self) -> Result<()> {
        self.is_initial.iter_mut().for_each(|initial| *initial = true);
        self.trace = OptionTrace::default();
        Ok(())
    }

    fn observe(&mut self, dones: &[bool]) -> Result<()> {
        self.is_initial = dones.to_vec();
        Ok(())
    }

    // U(s', ω) = (1 - β) Q(s', ω) + β max Q(s', ·)
    fn bootstrap_value(&mut self, states: &Tensor) -> Result<Vec<f32>> {
        let output = self.net.forward(states)?;
        let q: Vec<Vec<f32>> = output.q.detach().to_vec2()?;
        let beta: Vec<Vec<f32>> = output.beta.detach().to_vec2()?;
        Ok(self
            .options
            .iter()
            .enumerate()
            .map(|(w, option)| {
                let option = *option as usize;
                let max_q = q[w][argmax(&q[w])];
                (1. - beta[w][option]) * q[w][option] + beta[w][option] * max_q
            })
            .collect())
    }

    fn learn(&mut self, storage: &RolloutStorage) -> Result<LossReport> {
        let trace = std::mem::take(&mut self.trace);
        let transitions = storage.nsteps() * storage.nworkers();
        if trace.options.len() != transitions {
            return Err(DrizzleError::contract(format!(
                "{} recorded options for {transitions} transitions",
                trace.options.len()
            ))
            .into());
        }
        let output = self.net.forward(&storage.batch_states()?)?;
        let returns = storage.batch_returns()?;

        let mut policy = output.policy.index_select(&self.rows(&trace.options)?)?;
        policy.set_action(storage.batch_actions()?);
        let options = self.option_tensor(&trace.options)?;
        let q_option = output.q.gather(&options, 1)?.squeeze(1)?;
        let advantages = (returns - &q_option)?;
        let policy_loss = PolicyLoss(
            (policy.log_prob()? * advantages.detach())?
                .mean_all()?
                .neg()?,
        );
        let value_loss = ValueLoss(advantages.sqr()?.mean_all()?);
        let entropy_loss = EntropyLoss(policy.entropy()?.mean_all()?);

        let prev_options = self.option_tensor(&trace.prev_options)?;
        let not_initial =
            Tensor::from_vec(trace.is_initial, transitions, &self.device)?.affine(-1., 1.)?;
        let termination_loss = termination_loss(
            &output.q,
            &output.beta,
            &prev_options,
            &not_initial,
            self.params.opt_epsilon,
            self.params.delib_cost,
        )?;

        let loss = (total_loss(
            &policy_loss,
            &value_loss,
            &entropy_loss,
            self.params.value_loss_weight,
            self.params.entropy_weight,
        )? + termination_loss.affine(f64::from(self.params.beta_loss_weight), 0.)?)?;
        let grad_norm = self.optimizer.backward_step(&loss)?;
        let learning_rate = self.lr_cooler.cool();
        self.optimizer.set_learning_rate(f64::from(learning_rate));
        debug!(learning_rate, grad_norm, "aoc update");
        Ok(LossReport {
            policy_loss: to_scalar(&policy_loss)?,
            value_loss: to_scalar(&value_loss)?,
            entropy_loss: to_scalar(&entropy_loss)?,
            termination_loss: Some(to_scalar(&termination_loss)?),
            grad_norm,
        })
    }

    // greedy option, greedy action
    fn eval_action(&mut self, states: &Tensor) -> Result<Tensor> {
        let output = self.net.forward(states)?;
        let q: Vec<Vec<f32>> = output.q.detach().to_vec2()?;
        let options: Vec<u32> = q.iter().map(|row| argmax(row) as u32).collect();
        let policy = output.policy.index_select(&self.rows(&options)?)?;
        Ok(policy.best_action()?.detach())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Var};
    use drizzle_core::{
        distributions::{Policy, categorical::Categorical},
        optimizer::OptimizerKind,
        policies::OptionCriticOutput,
    };

    // same option values and terminations for every state, option `o` prefers action `o`
    struct FixedOptionNet {
        q: Vec<f32>,
        beta: Vec<f32>,
    }

    impl FixedOptionNet {
        fn per_state(&self, values: &[f32], n: usize) -> Result<Tensor> {
            let row = Tensor::new(values, &Device::Cpu)?.unsqueeze(0)?;
            Ok(row.broadcast_as((n, values.len()))?.contiguous()?)
        }
    }

    impl OptionCriticNet for FixedOptionNet {
        fn forward(&self, states: &Tensor) -> Result<OptionCriticOutput> {
            let n = states.dim(0)?;
            let num_options = self.q.len();
            let logits: Vec<f32> = (0..n * num_options)
                .flat_map(|row| {
                    (0..num_options).map(move |a| if a == row % num_options { 50. } else { 0. })
                })
                .collect();
            let logits = Tensor::from_vec(logits, (n * num_options, num_options), &Device::Cpu)?;
            Ok(OptionCriticOutput {
                policy: Policy::new(Categorical::new(logits)),
                q: self.per_state(&self.q, n)?,
                beta: self.per_state(&self.beta, n)?,
            })
        }

        fn num_options(&self) -> usize {
            self.q.len()
        }

        fn vars(&self) -> Vec<Var> {
            vec![]
        }
    }

    fn aoc(q: Vec<f32>, beta: Vec<f32>, nworkers: usize) -> Result<AOC<FixedOptionNet>> {
        let var = Var::zeros(1, DType::F32, &Device::Cpu)?;
        let optimizer = OptimizerKind::sgd(vec![var.clone()], 0.1)?;
        let params = AOCParams {
            value_loss_weight: 0.5,
            entropy_weight: 0.01,
            beta_loss_weight: 1.,
            delib_cost: 0.02,
            opt_epsilon: 0.,
        };
        Ok(AOC::new(
            FixedOptionNet { q, beta },
            OptimizerWithMaxGrad::new(optimizer, None, vec![var]),
            params,
            Cooler::new(false, 0.1, 0., 1),
            nworkers,
            Device::Cpu,
        ))
    }

    fn states(n: usize) -> Result<Tensor> {
        Ok(Tensor::zeros((n, 2), DType::F32, &Device::Cpu)?)
    }

    #[test]
    fn argmax_picks_the_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, -1.]), 1);
        assert_eq!(argmax(&[-3.]), 0);
    }

    #[test]
    fn bootstrap_mixes_option_value_and_best_value() -> Result<()> {
        let mut aoc = aoc(vec![1., 3.], vec![0.25, 0.5], 2)?;
        aoc.options = vec![0, 1];
        let values = aoc.bootstrap_value(&states(2)?)?;
        // 0.75 * 1 + 0.25 * 3 and 0.5 * 3 + 0.5 * 3
        assert!((values[0] - 1.5).abs() < 1e-6);
        assert!((values[1] - 3.).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn initial_steps_pick_the_greedy_option() -> Result<()> {
        let mut aoc = aoc(vec![1., 3.], vec![0., 0.], 3)?;
        let output = aoc.act(&states(3)?)?;
        assert_eq!(aoc.current_options(), &[1, 1, 1]);
        let actions: Vec<u32> = output.actions.to_vec1()?;
        assert_eq!(actions, vec![1, 1, 1]);
        assert_eq!(output.values, vec![3., 3., 3.]);
        Ok(())
    }

    #[test]
    fn options_are_kept_until_they_terminate() -> Result<()> {
        let mut aoc = aoc(vec![1., 3.], vec![0., 0.], 2)?;
        aoc.options = vec![0, 0];
        aoc.observe(&[false, true])?;
        aoc.act(&states(2)?)?;
        // worker 1 just started an episode and re-selects
        assert_eq!(aoc.current_options(), &[0, 1]);

        aoc.options = vec![0, 0];
        aoc.observe(&[false, false])?;
        aoc.net.beta = vec![1., 1.];
        aoc.act(&states(2)?)?;
        assert_eq!(aoc.current_options(), &[1, 1]);
        Ok(())
    }

    #[test]
    fn reset_restarts_every_option() -> Result<()> {
        let mut aoc = aoc(vec![1., 3.], vec![0., 0.], 2)?;
        aoc.options = vec![0, 0];
        aoc.observe(&[false, false])?;
        aoc.act(&states(2)?)?;
        assert_eq!(aoc.trace.options.len(), 2);
        aoc.options = vec![0, 0];
        aoc.reset()?;
        assert!(aoc.trace.options.is_empty());
        aoc.act(&states(2)?)?;
        assert_eq!(aoc.current_options(), &[1, 1]);
        assert_eq!(aoc.trace.is_initial, vec![1., 1.]);
        Ok(())
    }

    #[test]
    fn initial_steps_add_no_termination_loss() -> Result<()> {
        let q = Tensor::new(&[[1f32, 3.], [1., 3.]], &Device::Cpu)?;
        let beta = Tensor::new(&[[0.5f32, 0.5], [0.5, 0.5]], &Device::Cpu)?;
        let prev_options = Tensor::new(&[[0u32], [0]], &Device::Cpu)?;
        let all_initial = Tensor::zeros(2, DType::F32, &Device::Cpu)?;
        let loss = termination_loss(&q, &beta, &prev_options, &all_initial, 0., 0.02)?;
        assert_eq!(to_scalar(&loss)?, 0.);

        // only the second row counts: 0.5 * (1 - 3 + 0.02) / 2
        let not_initial = Tensor::new(&[0f32, 1.], &Device::Cpu)?;
        let loss = termination_loss(&q, &beta, &prev_options, &not_initial, 0., 0.02)?;
        assert!((to_scalar(&loss)? + 0.495).abs() < 1e-6);

        // with ε = 1 the baseline is the mean option value 2
        let loss = termination_loss(&q, &beta, &prev_options, &not_initial, 1., 0.)?;
        assert!((to_scalar(&loss)? + 0.25).abs() < 1e-6);
        Ok(())
    }
}
