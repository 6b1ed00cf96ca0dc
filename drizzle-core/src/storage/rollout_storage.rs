use crate::error::DrizzleError;
use anyhow::Result;
use candle_core::{Device, Tensor};

/// One environment step of every worker.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// `[nworkers, ..obs]`
    pub states: Tensor,
    /// `[nworkers, ..]`
    pub actions: Tensor,
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub rnn_state: Option<Tensor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Empty,
    Filling,
    /// Returns and advantages are computed, the storage can be sampled.
    Ready,
}

/// Fixed capacity storage of `nsteps` step records. Filled by appends, finalized by one return
/// computation, read by the learner and reset for the next rollout.
#[derive(Debug)]
pub struct RolloutStorage {
    nsteps: usize,
    nworkers: usize,
    device: Device,
    records: Vec<StepRecord>,
    // both are t-major, index `t * nworkers + w`
    returns: Vec<f32>,
    advantages: Vec<f32>,
    state: StorageState,
}

impl RolloutStorage {
    pub fn new(nsteps: usize, nworkers: usize, device: Device) -> Self {
        Self {
            nsteps,
            nworkers,
            device,
            records: Vec::with_capacity(nsteps),
            returns: Vec::with_capacity(nsteps * nworkers),
            advantages: Vec::with_capacity(nsteps * nworkers),
            state: StorageState::Empty,
        }
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn state(&self) -> StorageState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn append(&mut self, record: StepRecord) -> Result<()> {
        if self.state == StorageState::Ready {
            return Err(
                DrizzleError::contract("append to a storage whose returns are computed").into(),
            );
        }
        if self.records.len() >= self.nsteps {
            return Err(DrizzleError::contract(format!(
                "storage already holds {} steps",
                self.nsteps
            ))
            .into());
        }
        let lengths = [
            record.log_probs.len(),
            record.values.len(),
            record.rewards.len(),
            record.dones.len(),
            record.states.dim(0)?,
            record.actions.dim(0)?,
        ];
        if lengths.iter().any(|len| *len != self.nworkers) {
            return Err(DrizzleError::contract(format!(
                "step record sizes {lengths:?} do not match {} workers",
                self.nworkers
            ))
            .into());
        }
        self.records.push(record);
        self.state = StorageState::Filling;
        Ok(())
    }

    fn check_complete(&self, next_value: &[f32]) -> Result<()> {
        if self.state != StorageState::Filling || self.records.len() != self.nsteps {
            return Err(DrizzleError::contract(format!(
                "returns need exactly {} filled steps, storage is {:?} with {}",
                self.nsteps,
                self.state,
                self.records.len()
            ))
            .into());
        }
        if next_value.len() != self.nworkers {
            return Err(DrizzleError::contract(format!(
                "got {} bootstrap values for {} workers",
                next_value.len(),
                self.nworkers
            ))
            .into());
        }
        Ok(())
    }

    /// n-step bootstrapped returns: `R[t] = r[t] + γ R[t + 1] (1 - done[t])`, `R[nsteps]` is
    /// `next_value`.
    pub fn calc_ac_returns(&mut self, next_value: &[f32], discount_factor: f32) -> Result<()> {
        self.check_complete(next_value)?;
        let total = self.nsteps * self.nworkers;
        self.returns = vec![0.; total];
        self.advantages = vec![0.; total];
        let mut next_return = next_value.to_vec();
        for (t, record) in self.records.iter().enumerate().rev() {
            for w in 0..self.nworkers {
                let mask = if record.dones[w] { 0. } else { 1. };
                let ret = record.rewards[w] + discount_factor * next_return[w] * mask;
                self.returns[t * self.nworkers + w] = ret;
                self.advantages[t * self.nworkers + w] = ret - record.values[w];
                next_return[w] = ret;
            }
        }
        self.state = StorageState::Ready;
        Ok(())
    }

    /// Generalized advantage estimation. `tau = 1` gives the same returns as
    /// [`RolloutStorage::calc_ac_returns`].
    pub fn calc_gae_returns(
        &mut self,
        next_value: &[f32],
        discount_factor: f32,
        tau: f32,
    ) -> Result<()> {
        self.check_complete(next_value)?;
        let total = self.nsteps * self.nworkers;
        self.returns = vec![0.; total];
        self.advantages = vec![0.; total];
        let mut next_values = next_value.to_vec();
        let mut gae = vec![0f32; self.nworkers];
        for (t, record) in self.records.iter().enumerate().rev() {
            for w in 0..self.nworkers {
                let mask = if record.dones[w] { 0. } else { 1. };
                let value = record.values[w];
                let delta = record.rewards[w] + discount_factor * mask * next_values[w] - value;
                gae[w] = delta + discount_factor * tau * mask * gae[w];
                self.advantages[t * self.nworkers + w] = gae[w];
                self.returns[t * self.nworkers + w] = gae[w] + value;
                next_values[w] = value;
            }
        }
        self.state = StorageState::Ready;
        Ok(())
    }

    /// Clears the records, the capacity is kept.
    pub fn reset(&mut self) {
        self.records.clear();
        self.returns.clear();
        self.advantages.clear();
        self.state = StorageState::Empty;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == StorageState::Ready {
            Ok(())
        } else {
            Err(DrizzleError::contract(format!(
                "returns are not computed, storage is {:?}",
                self.state
            ))
            .into())
        }
    }

    fn ensure_filled(&self) -> Result<()> {
        if self.records.is_empty() {
            Err(DrizzleError::contract("the storage is empty").into())
        } else {
            Ok(())
        }
    }

    fn flat_tensor(&self, values: Vec<f32>) -> Result<Tensor> {
        let len = values.len();
        Ok(Tensor::from_vec(values, len, &self.device)?)
    }

    pub fn returns(&self) -> Result<&[f32]> {
        self.ensure_ready()?;
        Ok(&self.returns)
    }

    pub fn advantages(&self) -> Result<&[f32]> {
        self.ensure_ready()?;
        Ok(&self.advantages)
    }

    pub fn batch_states(&self) -> Result<Tensor> {
        self.ensure_filled()?;
        let states: Vec<&Tensor> = self.records.iter().map(|record| &record.states).collect();
        Ok(Tensor::cat(&states, 0)?)
    }

    pub fn batch_actions(&self) -> Result<Tensor> {
        self.ensure_filled()?;
        let actions: Vec<&Tensor> = self.records.iter().map(|record| &record.actions).collect();
        Ok(Tensor::cat(&actions, 0)?)
    }

    pub fn batch_log_probs(&self) -> Result<Tensor> {
        self.ensure_filled()?;
        self.flat_tensor(
            self.records
                .iter()
                .flat_map(|record| record.log_probs.iter().copied())
                .collect(),
        )
    }

    pub fn batch_values(&self) -> Result<Tensor> {
        self.ensure_filled()?;
        self.flat_tensor(
            self.records
                .iter()
                .flat_map(|record| record.values.iter().copied())
                .collect(),
        )
    }

    pub fn batch_dones(&self) -> Result<Tensor> {
        self.ensure_filled()?;
        self.flat_tensor(
            self.records
                .iter()
                .flat_map(|record| record.dones.iter().map(|done| f32::from(u8::from(*done))))
                .collect(),
        )
    }

    pub fn batch_returns(&self) -> Result<Tensor> {
        self.flat_tensor(self.returns()?.to_vec())
    }

    pub fn batch_advantages(&self) -> Result<Tensor> {
        self.flat_tensor(self.advantages()?.to_vec())
    }
}

/// How the returns of a full storage are computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnEstimator {
    NStep { discount_factor: f32 },
    Gae { discount_factor: f32, tau: f32 },
}

impl ReturnEstimator {
    pub fn compute(&self, storage: &mut RolloutStorage, next_value: &[f32]) -> Result<()> {
        match *self {
            Self::NStep { discount_factor } => {
                storage.calc_ac_returns(next_value, discount_factor)
            }
            Self::Gae {
                discount_factor,
                tau,
            } => storage.calc_gae_returns(next_value, discount_factor, tau),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_core::DType;

    pub(crate) fn record(
        nworkers: usize,
        rewards: Vec<f32>,
        values: Vec<f32>,
        dones: Vec<bool>,
    ) -> Result<StepRecord> {
        Ok(StepRecord {
            states: Tensor::zeros((nworkers, 2), DType::F32, &Device::Cpu)?,
            actions: Tensor::zeros(nworkers, DType::U32, &Device::Cpu)?,
            log_probs: vec![0.; nworkers],
            values,
            rewards,
            dones,
            rnn_state: None,
        })
    }

    fn filled(values: &[[f32; 2]; 3]) -> Result<RolloutStorage> {
        let mut storage = RolloutStorage::new(3, 2, Device::Cpu);
        for (t, values) in values.iter().enumerate() {
            storage.append(record(
                2,
                vec![1., 0.5 * t as f32],
                values.to_vec(),
                vec![t == 2, t == 0],
            )?)?;
        }
        Ok(storage)
    }

    #[test]
    fn ac_returns_match_hand_computation() -> Result<()> {
        let mut storage = RolloutStorage::new(3, 1, Device::Cpu);
        for t in 0..3 {
            storage.append(record(1, vec![1.], vec![0.5], vec![t == 2])?)?;
        }
        storage.calc_ac_returns(&[10.], 0.9)?;
        let expected = [1. + 0.9 * 1.9, 1. + 0.9, 1.];
        for (ret, expected) in storage.returns()?.iter().zip(expected) {
            assert!((ret - expected).abs() < 1e-6);
        }
        for (adv, ret) in storage.advantages()?.iter().zip(storage.returns()?) {
            assert!((adv - (ret - 0.5)).abs() < 1e-6);
        }
        assert_eq!(storage.state(), StorageState::Ready);
        Ok(())
    }

    #[test]
    fn gae_with_tau_one_equals_ac_returns() -> Result<()> {
        let values = [[0.3, -1.], [2., 0.7], [0.1, 0.4]];
        let mut ac = filled(&values)?;
        let mut gae = filled(&values)?;
        ac.calc_ac_returns(&[1.5, -0.5], 0.95)?;
        gae.calc_gae_returns(&[1.5, -0.5], 0.95, 1.)?;
        for (a, b) in ac.returns()?.iter().zip(gae.returns()?) {
            assert!((a - b).abs() < 1e-5);
        }
        for (a, b) in ac.advantages()?.iter().zip(gae.advantages()?) {
            assert!((a - b).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn lifecycle_is_enforced() -> Result<()> {
        let mut storage = RolloutStorage::new(2, 1, Device::Cpu);
        assert!(storage.calc_ac_returns(&[0.], 0.9).is_err());
        storage.append(record(1, vec![1.], vec![0.], vec![false])?)?;
        assert!(storage.calc_ac_returns(&[0.], 0.9).is_err());
        let err = storage
            .append(record(2, vec![1., 1.], vec![0., 0.], vec![false, false])?)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DrizzleError>(),
            Some(DrizzleError::Contract(_))
        ));
        storage.append(record(1, vec![1.], vec![0.], vec![false])?)?;
        assert!(storage.append(record(1, vec![1.], vec![0.], vec![false])?).is_err());
        storage.calc_ac_returns(&[0.], 0.9)?;
        assert!(storage.calc_ac_returns(&[0.], 0.9).is_err());
        assert!(storage.append(record(1, vec![1.], vec![0.], vec![false])?).is_err());
        assert_eq!(storage.batch_returns()?.dims(), &[2]);
        assert_eq!(storage.batch_states()?.dims(), &[2, 2]);
        storage.reset();
        assert_eq!(storage.state(), StorageState::Empty);
        assert!(storage.is_empty());
        assert!(storage.returns().is_err());
        Ok(())
    }

    #[test]
    fn batches_are_time_major() -> Result<()> {
        let values = [[0., 1.], [2., 3.], [4., 5.]];
        let storage = filled(&values)?;
        let flat: Vec<f32> = storage.batch_values()?.to_vec1()?;
        assert_eq!(flat, vec![0., 1., 2., 3., 4., 5.]);
        let dones: Vec<f32> = storage.batch_dones()?.to_vec1()?;
        assert_eq!(dones, vec![0., 1., 0., 0., 1., 0.]);
        Ok(())
    }
}
