use candle_core::Tensor;
use candle_nn::Module;

use super::Layer;
use crate::error::{LayerError, Result};
use crate::samples::Samples;

/// Pass-through layer
#[derive(Clone, Debug, Default)]
pub struct Identity;

pub fn identity() -> Identity {
    Identity
}

impl Layer for Identity {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        Ok((x.clone(), x.zero_kl()?))
    }
}

type ActFn = dyn Fn(&Tensor) -> candle_core::Result<Tensor> + Send + Sync;

/// Elementwise nonlinearity applied to every replica
pub struct Activation {
    h: Box<ActFn>,
}

/// * `h` - elementwise function, e.g. `|x| x.tanh()`
pub fn activation<F>(h: F) -> Activation
where
    F: Fn(&Tensor) -> candle_core::Result<Tensor> + Send + Sync + 'static,
{
    Activation { h: Box::new(h) }
}

impl From<candle_nn::Activation> for Activation {
    fn from(act: candle_nn::Activation) -> Self {
        activation(move |x| act.forward(x))
    }
}

impl Layer for Activation {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        let phi = x.map(|x| Ok((self.h)(x)?))?;
        Ok((phi, x.zero_kl()?))
    }
}

/// Inverted dropout: every replica draws its own Bernoulli mask, and
/// surviving units are scaled by `1 / keep_prob` so the expectation is
/// unchanged.
#[derive(Clone, Debug)]
pub struct DropOut {
    keep_prob: f64,
}

/// * `keep_prob` - probability of keeping a unit, in (0, 1]
pub fn dropout(keep_prob: f64) -> DropOut {
    DropOut { keep_prob }
}

impl DropOut {
    pub fn keep_prob(&self) -> f64 {
        self.keep_prob
    }
}

impl Layer for DropOut {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        if !(self.keep_prob > 0. && self.keep_prob <= 1.) {
            return Err(LayerError::InvalidArgument(format!(
                "keep probability must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        let phi = x.map(|x| {
            let mask = x
                .rand_like(0., 1.)?
                .lt(self.keep_prob)?
                .to_dtype(x.dtype())?;
            Ok((x * mask)?.affine(self.keep_prob.recip(), 0.)?)
        })?;
        Ok((phi, x.zero_kl()?))
    }
}
