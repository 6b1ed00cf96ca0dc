use crate::error::DrizzleError;
use crate::storage::ReturnEstimator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyperparameters shared by every agent. Missing JSON keys fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nsteps: usize,
    pub nworkers: usize,
    pub discount_factor: f32,
    pub use_gae: bool,
    pub gae_tau: f32,
    pub ppo_epochs: usize,
    pub ppo_minibatch_size: usize,
    pub ppo_clip: f32,
    pub ppo_value_clip: bool,
    pub value_loss_weight: f32,
    pub entropy_weight: f32,
    pub grad_clip: Option<f32>,
    pub lr_decay: bool,
    pub clip_decay: bool,
    pub lr_min: f32,
    pub clip_min: f32,
    /// Advantages are normalized per epoch when set; the value is added to the std.
    pub adv_normalize_eps: Option<f32>,
    pub max_steps: usize,
    pub seed: Option<u64>,
    /// Number of updates between two training reports.
    pub network_log_freq: usize,

    pub opt_num_options: usize,
    pub opt_delib_cost: f32,
    pub opt_epsilon: f32,
    pub opt_beta_loss_weight: f32,

    pub replay_size: usize,
    pub replay_batch_size: usize,
    pub train_start: usize,
    pub soft_update_coef: f32,
    /// Defaults to `-action_dim`.
    pub target_entropy: Option<f32>,
    /// Disables temperature tuning.
    pub fixed_alpha: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nsteps: 128,
            nworkers: 8,
            discount_factor: 0.99,
            use_gae: true,
            gae_tau: 0.95,
            ppo_epochs: 4,
            ppo_minibatch_size: 256,
            ppo_clip: 0.2,
            ppo_value_clip: true,
            value_loss_weight: 0.5,
            entropy_weight: 0.01,
            grad_clip: Some(0.5),
            lr_decay: true,
            clip_decay: true,
            lr_min: 0.,
            clip_min: 0.,
            adv_normalize_eps: Some(1e-5),
            max_steps: 1_000_000,
            seed: None,
            network_log_freq: 10,
            opt_num_options: 4,
            opt_delib_cost: 0.02,
            opt_epsilon: 0.1,
            opt_beta_loss_weight: 1.,
            replay_size: 1_000_000,
            replay_batch_size: 256,
            train_start: 10_000,
            soft_update_coef: 0.005,
            target_entropy: None,
            fixed_alpha: None,
        }
    }
}

fn check(condition: bool, message: &str) -> Result<(), DrizzleError> {
    if condition {
        Ok(())
    } else {
        Err(DrizzleError::config(message))
    }
}

fn in_unit_interval(value: f32) -> bool {
    (0. ..=1.).contains(&value)
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|err| DrizzleError::config(format!("invalid json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), DrizzleError> {
        check(self.nsteps > 0, "nsteps must be positive")?;
        check(self.nworkers > 0, "nworkers must be positive")?;
        check(
            in_unit_interval(self.discount_factor),
            "discount_factor must be in [0, 1]",
        )?;
        check(in_unit_interval(self.gae_tau), "gae_tau must be in [0, 1]")?;
        check(self.ppo_epochs > 0, "ppo_epochs must be positive")?;
        check(
            self.ppo_minibatch_size > 0,
            "ppo_minibatch_size must be positive",
        )?;
        check(self.ppo_clip >= 0., "ppo_clip must not be negative")?;
        check(self.clip_min >= 0., "clip_min must not be negative")?;
        check(self.lr_min >= 0., "lr_min must not be negative")?;
        check(
            self.value_loss_weight >= 0. && self.entropy_weight >= 0.,
            "loss weights must not be negative",
        )?;
        check(
            self.grad_clip.is_none_or(|clip| clip > 0.),
            "grad_clip must be positive",
        )?;
        check(
            self.adv_normalize_eps.is_none_or(|eps| eps > 0.),
            "adv_normalize_eps must be positive",
        )?;
        check(self.network_log_freq > 0, "network_log_freq must be positive")?;
        check(self.opt_num_options > 0, "opt_num_options must be positive")?;
        check(
            in_unit_interval(self.opt_epsilon),
            "opt_epsilon must be in [0, 1]",
        )?;
        check(
            self.replay_batch_size > 0 && self.replay_batch_size <= self.replay_size,
            "replay_batch_size must be in [1, replay_size]",
        )?;
        check(
            self.soft_update_coef > 0. && self.soft_update_coef <= 1.,
            "soft_update_coef must be in (0, 1]",
        )?;
        check(
            self.fixed_alpha.is_none_or(|alpha| alpha >= 0.),
            "fixed_alpha must not be negative",
        )?;
        Ok(())
    }

    /// Checks that one PPO minibatch fits into a rollout.
    pub fn validate_minibatch(&self) -> Result<(), DrizzleError> {
        check(
            self.ppo_minibatch_size <= self.batch_size(),
            "ppo_minibatch_size must not exceed nsteps * nworkers",
        )
    }

    /// Transitions collected per update.
    pub fn batch_size(&self) -> usize {
        self.nsteps * self.nworkers
    }

    /// Number of updates in a run, the horizon of the coolers.
    pub fn update_horizon(&self) -> usize {
        (self.max_steps / self.batch_size().max(1)).max(1)
    }

    pub fn return_estimator(&self) -> ReturnEstimator {
        if self.use_gae {
            ReturnEstimator::Gae {
                discount_factor: self.discount_factor,
                tau: self.gae_tau,
            }
        } else {
            ReturnEstimator::NStep {
                discount_factor: self.discount_factor,
            }
        }
    }
}
