pub mod clip_grad;
pub mod cooler;
pub mod sample;
