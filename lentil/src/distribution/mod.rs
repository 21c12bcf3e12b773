//! Parametric weight distributions for variational layers.
//!
//! A posterior `q` is either a diagonal Gaussian or a uniform mixture of
//! diagonal Gaussians; priors are always diagonal Gaussians. Both sample
//! with the reparameterisation trick and expose an analytic `kl_to`.

mod mixture;
mod normal;

pub use mixture::GaussianMixture;
pub use normal::Normal;

use candle_core::{Shape, Tensor};
use candle_nn::VarBuilder;
use log::debug;

use crate::error::{LayerError, Result};
use crate::param::PositiveParam;

pub trait Distribution {
    /// Draw one reparameterised sample with fresh noise
    fn sample(&self) -> Result<Tensor>;

    /// Scalar KL divergence from this distribution to a Gaussian prior
    fn kl_to(&self, prior: &Normal) -> Result<Tensor>;

    fn dims(&self) -> &[usize];
}

/// Variational posterior family
#[derive(Clone, Debug)]
pub enum Posterior {
    Normal(Normal),
    Mixture(GaussianMixture),
}

impl Distribution for Posterior {
    fn sample(&self) -> Result<Tensor> {
        match self {
            Self::Normal(q) => q.sample(),
            Self::Mixture(q) => q.sample(),
        }
    }

    fn kl_to(&self, prior: &Normal) -> Result<Tensor> {
        match self {
            Self::Normal(q) => q.kl_to(prior),
            Self::Mixture(q) => q.kl_to(prior),
        }
    }

    fn dims(&self) -> &[usize] {
        match self {
            Self::Normal(q) => q.dims(),
            Self::Mixture(q) => q.dims(),
        }
    }
}

/// Zero-mean Gaussian prior with a scalar variance
///
/// * `vb` - variable builder for the (optional) trainable variance
/// * `shape` - shape of the weights this prior covers
/// * `var` - (initial) prior variance
/// * `learn_var` - make the variance a trainable parameter
pub fn norm_prior<S: Into<Shape>>(
    vb: &VarBuilder,
    shape: S,
    var: f64,
    learn_var: bool,
) -> Result<Normal> {
    let mu = Tensor::zeros(shape, vb.dtype(), vb.device())?;
    let var = if learn_var {
        PositiveParam::learned(vb, (), "var", var)?
    } else {
        PositiveParam::fixed(var, vb.dtype(), vb.device())?
    };
    Ok(Normal::new(mu, var))
}

/// Trainable diagonal Gaussian posterior
///
/// μ ~ N(0, prior_var) and the unconstrained variance ~ prior_var * N(0, 1)
/// at initialisation; the variance is read through `pos`.
pub fn norm_posterior<S: Into<Shape>>(vb: &VarBuilder, shape: S, prior_var: f64) -> Result<Normal> {
    if !(prior_var > 0.) {
        return Err(LayerError::InvalidArgument(format!(
            "prior variance must be positive, got {}",
            prior_var
        )));
    }
    let shape: Shape = shape.into();
    let mu = vb.get_with_hints(
        shape.clone(),
        "mu",
        candle_nn::Init::Randn {
            mean: 0.,
            stdev: prior_var.sqrt(),
        },
    )?;
    let raw_var = vb.get_with_hints(
        shape,
        "var",
        candle_nn::Init::Randn {
            mean: 0.,
            stdev: prior_var,
        },
    )?;
    Ok(Normal::new(mu, PositiveParam::Learned(raw_var)))
}

/// Uniform mixture of `k` independent trainable Gaussian posteriors
pub fn mix_posterior<S: Into<Shape>>(
    vb: &VarBuilder,
    shape: S,
    prior_var: f64,
    k: usize,
) -> Result<GaussianMixture> {
    let shape: Shape = shape.into();
    let components = (0..k)
        .map(|i| norm_posterior(&vb.pp(format!("comp{}", i)), shape.clone(), prior_var))
        .collect::<Result<Vec<_>>>()?;
    debug!("mixture posterior {:?} with {} components", shape, k);
    GaussianMixture::new(components)
}

/// Gaussian posterior for `mixtures <= 1`, otherwise a mixture
pub fn posterior<S: Into<Shape>>(
    vb: &VarBuilder,
    shape: S,
    prior_var: f64,
    mixtures: usize,
) -> Result<Posterior> {
    if mixtures > 1 {
        Ok(Posterior::Mixture(mix_posterior(vb, shape, prior_var, mixtures)?))
    } else {
        Ok(Posterior::Normal(norm_posterior(vb, shape, prior_var)?))
    }
}
