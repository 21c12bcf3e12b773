use candle_core::Tensor;

use super::Distribution;
use crate::error::{LayerError, Result};
use crate::param::{log_norm, PositiveParam};

/// Diagonal Gaussian N(μ, diag(σ²))
///
/// The variance is kept as a `PositiveParam`, so a trainable variance is
/// re-evaluated through `pos` whenever it is read and stays strictly
/// positive. A scalar variance is broadcast to the shape of μ.
#[derive(Clone, Debug)]
pub struct Normal {
    mu: Tensor,
    var: PositiveParam,
}

impl Normal {
    /// # Arguments
    /// * `mu` - mean, any shape
    /// * `var` - variance, same shape as `mu` or a scalar
    pub fn new(mu: Tensor, var: PositiveParam) -> Self {
        Self { mu, var }
    }

    pub fn mu(&self) -> &Tensor {
        &self.mu
    }

    /// σ² broadcast to the shape of μ
    pub fn var(&self) -> Result<Tensor> {
        Ok(self.var.value()?.broadcast_as(self.mu.shape())?)
    }

    pub fn std(&self) -> Result<Tensor> {
        Ok(self.var()?.sqrt()?)
    }

    pub fn variance_param(&self) -> &PositiveParam {
        &self.var
    }

    /// log N(x; μ, σ²) summed over all elements
    ///
    /// # Arguments
    /// * `x` - point of evaluation, broadcastable against μ
    ///
    /// # Returns
    /// A scalar tensor
    pub fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        log_norm(x, &self.mu, &self.var()?)
    }

    pub(crate) fn check_same_shape(&self, other: &Normal) -> Result<()> {
        if self.mu.dims() != other.mu.dims() {
            return Err(LayerError::ShapeMismatch {
                expected: other.mu.dims().to_vec(),
                found: self.mu.dims().to_vec(),
            });
        }
        Ok(())
    }
}

impl Distribution for Normal {
    /// Reparameterised draw: θ = μ + ε ⊙ σ, ε ~ N(0, I)
    fn sample(&self) -> Result<Tensor> {
        let eps = self.mu.randn_like(0., 1.)?;
        Ok((&self.mu + eps.mul(&self.std()?)?)?)
    }

    /// KL(q || p) between diagonal Gaussians, summed over elements
    ///
    /// 0.5 * [ log(p.var) - log(q.var) + q.var/p.var - 1 + (q.mu - p.mu)^2/p.var ]
    ///
    fn kl_to(&self, prior: &Normal) -> Result<Tensor> {
        self.check_same_shape(prior)?;

        let q_var = self.var()?;
        let p_var = prior.var()?;

        let log_ratio = (p_var.log()? - q_var.log()?)?;
        let var_ratio = q_var.div(&p_var)?;
        let mahal = (&self.mu - &prior.mu)?.sqr()?.div(&p_var)?;

        let kl = ((log_ratio + var_ratio)? + mahal)?.affine(0.5, -0.5)?;
        Ok(kl.sum_all()?)
    }

    fn dims(&self) -> &[usize] {
        self.mu.dims()
    }
}
