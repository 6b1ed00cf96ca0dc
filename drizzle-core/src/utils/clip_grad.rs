use anyhow::Result;
use candle_core::{Tensor, Var, backprop::GradStore};

/// Global L2 norm of the gradients of `vars`.
pub fn grad_norm(grad_store: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_norm_squared = 0.0f32;
    for var in vars {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    Ok(total_norm_squared.sqrt())
}

/// Backpropagates `loss` and rescales the gradients of `vars` so that their global norm is at most
/// `max_norm`. Returns the gradients together with the norm measured before clipping.
pub fn clip_grad(loss: &Tensor, vars: &[Var], max_norm: f32) -> Result<(GradStore, f32)> {
    let mut grad_store = loss.backward()?;
    let total_norm = grad_norm(&grad_store, vars)?;
    if total_norm > max_norm {
        let clip_coef = f64::from(max_norm / (total_norm + 1e-6));
        for var in vars {
            if let Some(grad) = grad_store.remove(var.as_tensor()) {
                grad_store.insert(var.as_tensor(), grad.affine(clip_coef, 0.)?);
            }
        }
    }
    Ok((grad_store, total_norm))
}
