// Newtypes keeping the different `[N]` shaped tensors of a policy-gradient update apart.
use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Advantages(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Returns(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Logp(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct ValuesPred(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct LogpDiff(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct PolicyLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ValueLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct EntropyLoss(pub Tensor);
