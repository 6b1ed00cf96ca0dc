use super::{Distribution, DistributionKind, log_sigmoid, sigmoid};
use crate::rng::RNG;
use anyhow::Result;
use candle_core::{D, DType, Tensor};
use rand::Rng;

/// Independent Bernoulli variables parameterized by `logits` of shape `[N, D]`. Actions are `0.`
/// or `1.` floats; log-probabilities and entropies are summed over the last dimension.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    logits: Tensor,
}

impl Bernoulli {
    pub fn new(logits: Tensor) -> Self {
        Self { logits }
    }

    fn probs(&self) -> Result<Vec<Vec<f32>>> {
        Ok(sigmoid(&self.logits)?.to_vec2()?)
    }

    fn rows_to_tensor(&self, rows: Vec<Vec<f32>>) -> Result<Tensor> {
        let (n, d) = self.logits.dims2()?;
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Tensor::from_vec(flat, (n, d), self.logits.device())?)
    }
}

impl Distribution for Bernoulli {
    fn sample(&self) -> Result<Tensor> {
        let probs = self.probs()?;
        let rows = RNG.with_borrow_mut(|rng| {
            probs
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|p| if rng.random::<f32>() < *p { 1f32 } else { 0. })
                        .collect::<Vec<f32>>()
                })
                .collect::<Vec<_>>()
        });
        self.rows_to_tensor(rows)
    }

    fn log_prob(&self, actions: &Tensor) -> Result<Tensor> {
        let actions = actions.to_dtype(DType::F32)?;
        let on = log_sigmoid(&self.logits)?;
        let off = log_sigmoid(&self.logits.neg()?)?;
        let log_prob = ((&actions * on)? + (actions.affine(-1., 1.)? * off)?)?;
        Ok(log_prob.sum(D::Minus1)?)
    }

    fn entropy(&self) -> Result<Tensor> {
        let p = sigmoid(&self.logits)?;
        let on = log_sigmoid(&self.logits)?;
        let off = log_sigmoid(&self.logits.neg()?)?;
        let entropy = ((&p * on)? + (p.affine(-1., 1.)? * off)?)?.neg()?;
        Ok(entropy.sum(D::Minus1)?)
    }

    fn best_action(&self) -> Result<Tensor> {
        let rows = self
            .probs()?
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|p| if p > 0.5 { 1f32 } else { 0. })
                    .collect::<Vec<f32>>()
            })
            .collect();
        self.rows_to_tensor(rows)
    }

    fn index_select(&self, indices: &Tensor) -> Result<DistributionKind> {
        Ok(Bernoulli::new(self.logits.index_select(indices, 0)?).into())
    }

    fn batch_size(&self) -> Result<usize> {
        Ok(self.logits.dim(0)?)
    }
}
