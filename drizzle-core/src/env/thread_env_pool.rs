use super::{
    Env, EnvironmentDescription, EpisodeTracker, ParallelEnv, ParallelStep, WorkerStep,
    draw_seeds, reset_seeds, step_env,
};
use crate::error::DrizzleError;
use anyhow::Result;
use candle_core::Tensor;
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::{marker::PhantomData, thread::JoinHandle};
use tracing::debug;

enum WorkerTask {
    Reset { seed: u64 },
    Step { action: Tensor, reset_seed: u64 },
    Shutdown,
}

enum WorkerOutput {
    Reset(Tensor),
    Step(WorkerStep),
}

struct WorkerResult {
    env_idx: usize,
    output: Result<WorkerOutput>,
}

struct WorkerThread<E: Env> {
    env: E,
    env_idx: usize,
    tracker: EpisodeTracker,
    task_rx: Receiver<WorkerTask>,
    result_tx: Sender<WorkerResult>,
}

impl<E: Env> WorkerThread<E> {
    fn work(mut self) {
        while let Ok(task) = self.task_rx.recv() {
            let output = match task {
                WorkerTask::Reset { seed } => {
                    self.tracker.clear();
                    self.env.reset(seed).map(WorkerOutput::Reset)
                }
                WorkerTask::Step { action, reset_seed } => {
                    step_env(&mut self.env, &mut self.tracker, &action, reset_seed)
                        .map(WorkerOutput::Step)
                }
                WorkerTask::Shutdown => break,
            };
            let result = WorkerResult {
                env_idx: self.env_idx,
                output,
            };
            if self.result_tx.send(result).is_err() {
                break;
            }
        }
        debug!(env_idx = self.env_idx, "env worker stopped");
    }
}

/// One OS thread per environment. Every call blocks until all workers answered.
pub struct ThreadEnvPool<E: Env> {
    worker_txs: Vec<Sender<WorkerTask>>,
    result_rx: Receiver<WorkerResult>,
    handles: Vec<JoinHandle<()>>,
    seed: Option<u64>,
    env_description: EnvironmentDescription,
    env: PhantomData<fn() -> E>,
}

impl<E: Env + Send + 'static> ThreadEnvPool<E> {
    pub fn new(envs: Vec<E>) -> Result<Self> {
        let Some(first) = envs.first() else {
            return Err(DrizzleError::config("an env pool needs at least one environment").into());
        };
        let env_description = first.env_description();
        let (result_tx, result_rx) = unbounded();
        let mut worker_txs = Vec::with_capacity(envs.len());
        let mut handles = Vec::with_capacity(envs.len());
        for (env_idx, env) in envs.into_iter().enumerate() {
            let (task_tx, task_rx) = unbounded();
            let worker = WorkerThread {
                env,
                env_idx,
                tracker: EpisodeTracker::default(),
                task_rx,
                result_tx: result_tx.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("env-worker-{env_idx}"))
                .spawn(move || worker.work())?;
            worker_txs.push(task_tx);
            handles.push(handle);
        }
        debug!(num_envs = worker_txs.len(), "spawned env workers");
        Ok(Self {
            worker_txs,
            result_rx,
            handles,
            seed: None,
            env_description,
            env: PhantomData,
        })
    }
}

impl<E: Env> ThreadEnvPool<E> {
    fn send(&self, env_idx: usize, task: WorkerTask) -> Result<()> {
        self.worker_txs[env_idx]
            .send(task)
            .map_err(|_| DrizzleError::env(format!("env worker {env_idx} is gone")))?;
        Ok(())
    }

    /// Collects one answer from every worker, ordered by worker index. All answers are drained
    /// before an error is reported so the channel never holds stale results.
    fn gather(&self) -> Result<Vec<WorkerOutput>> {
        let num_envs = self.worker_txs.len();
        let mut outputs: Vec<Option<Result<WorkerOutput>>> = (0..num_envs).map(|_| None).collect();
        for _ in 0..num_envs {
            let WorkerResult { env_idx, output } = self
                .result_rx
                .recv()
                .map_err(|_| DrizzleError::env("env workers disconnected"))?;
            outputs[env_idx] = Some(output);
        }
        outputs
            .into_iter()
            .enumerate()
            .map(|(env_idx, output)| {
                output.unwrap_or_else(|| {
                    Err(DrizzleError::env(format!("env worker {env_idx} did not answer")).into())
                })
            })
            .collect()
    }

    fn shutdown(&mut self) -> Result<()> {
        for tx in self.worker_txs.iter() {
            // a worker that already exited is fine here
            let _ = tx.send(WorkerTask::Shutdown);
        }
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(DrizzleError::env(format!("{panicked} env workers panicked")).into());
        }
        Ok(())
    }
}

impl<E: Env> ParallelEnv for ThreadEnvPool<E> {
    fn num_envs(&self) -> usize {
        self.worker_txs.len()
    }

    fn seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    fn reset(&mut self) -> Result<Vec<Tensor>> {
        let seeds = reset_seeds(self.seed, self.worker_txs.len());
        for (env_idx, seed) in seeds.into_iter().enumerate() {
            self.send(env_idx, WorkerTask::Reset { seed })?;
        }
        self.gather()?
            .into_iter()
            .map(|output| match output {
                WorkerOutput::Reset(state) => Ok(state),
                WorkerOutput::Step(_) => Err(DrizzleError::env("expected a reset answer").into()),
            })
            .collect()
    }

    fn step(&mut self, actions: &Tensor) -> Result<ParallelStep> {
        let num_envs = self.worker_txs.len();
        if actions.dim(0)? != num_envs {
            return Err(DrizzleError::contract(format!(
                "got {} actions for {num_envs} environments",
                actions.dim(0)?
            ))
            .into());
        }
        let seeds = draw_seeds(num_envs);
        for (env_idx, reset_seed) in seeds.into_iter().enumerate() {
            let action = actions.get(env_idx)?;
            self.send(env_idx, WorkerTask::Step { action, reset_seed })?;
        }
        self.gather()?
            .into_iter()
            .map(|output| match output {
                WorkerOutput::Step(step) => Ok(step),
                WorkerOutput::Reset(_) => Err(DrizzleError::env("expected a step answer").into()),
            })
            .collect::<Result<ParallelStep>>()
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.env_description.clone()
    }

    fn close(&mut self) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }
        debug!(num_envs = self.worker_txs.len(), "shutting down env workers");
        self.shutdown()
    }
}

impl<E: Env> Drop for ThreadEnvPool<E> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
