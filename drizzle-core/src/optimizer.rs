use crate::utils::clip_grad::{clip_grad, grad_norm};
use anyhow::Result;
use candle_core::{Tensor, Var, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use std::fmt::Debug;

pub enum OptimizerKind {
    AdamW(AdamW),
    Sgd(SGD),
}

impl OptimizerKind {
    pub fn adam_w(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let params = ParamsAdamW {
            lr: learning_rate,
            ..Default::default()
        };
        Ok(Self::AdamW(AdamW::new(vars, params)?))
    }

    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::Sgd(SGD::new(vars, learning_rate)?))
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(optimizer) => optimizer.step(grads)?,
            Self::Sgd(optimizer) => optimizer.step(grads)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(optimizer) => optimizer.learning_rate(),
            Self::Sgd(optimizer) => optimizer.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        match self {
            Self::AdamW(optimizer) => optimizer.set_learning_rate(learning_rate),
            Self::Sgd(optimizer) => optimizer.set_learning_rate(learning_rate),
        }
    }
}

/// Builds an optimizer over the trainable variables of a network.
pub type OptimizerFn = Box<dyn Fn(Vec<Var>) -> Result<OptimizerKind>>;

/// Optimizer with optional global gradient norm clipping. Every `backward_step` starts from a fresh
/// gradient store, there is nothing to zero.
pub struct OptimizerWithMaxGrad {
    pub optimizer: OptimizerKind,
    pub max_grad_norm: Option<f32>,
    pub vars: Vec<Var>,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .field("num_vars", &self.vars.len())
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(optimizer: OptimizerKind, max_grad_norm: Option<f32>, vars: Vec<Var>) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            vars,
        }
    }

    /// Backpropagates `loss`, clips and applies the gradients. Returns the gradient norm measured
    /// before clipping.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<f32> {
        let (grads, norm) = match self.max_grad_norm {
            Some(max_norm) => clip_grad(loss, &self.vars, max_norm)?,
            None => {
                let grads = loss.backward()?;
                let norm = grad_norm(&grads, &self.vars)?;
                (grads, norm)
            }
        };
        self.optimizer.step(&grads)?;
        Ok(norm)
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.optimizer.set_learning_rate(learning_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn clipped_step_moves_towards_the_minimum() -> Result<()> {
        let var = Var::from_tensor(&Tensor::new(&[3f32, -4.], &Device::Cpu)?)?;
        let optimizer = OptimizerKind::sgd(vec![var.clone()], 0.1)?;
        let mut optimizer = OptimizerWithMaxGrad::new(optimizer, Some(1.), vec![var.clone()]);
        let loss = var.as_tensor().sqr()?.sum_all()?;
        let norm = optimizer.backward_step(&loss)?;
        assert!((norm - 10.).abs() < 1e-4);
        // the clipped gradient has norm 1, so sgd moves by 0.1 along it
        let values: Vec<f32> = var.as_tensor().to_vec1()?;
        assert!((values[0] - (3. - 0.06)).abs() < 1e-4);
        assert!((values[1] - (-4. + 0.08)).abs() < 1e-4);
        assert_eq!(var.dtype(), DType::F32);
        Ok(())
    }

    #[test]
    fn learning_rate_can_be_overwritten() -> Result<()> {
        let var = Var::zeros(3, DType::F32, &Device::Cpu)?;
        let adam = OptimizerKind::adam_w(vec![var.clone()], 1e-3)?;
        let mut optimizer = OptimizerWithMaxGrad::new(adam, None, vec![var]);
        optimizer.set_learning_rate(5e-4);
        assert_eq!(optimizer.learning_rate(), 5e-4);
        Ok(())
    }
}
