use candle_core::Tensor;
use rand::Rng;

use super::normal::Normal;
use super::Distribution;
use crate::error::{LayerError, Result};
use crate::param::{log_norm, log_sum_exp};

/// Uniformly weighted mixture of K diagonal Gaussians of identical shape
#[derive(Clone, Debug)]
pub struct GaussianMixture {
    components: Vec<Normal>,
}

impl GaussianMixture {
    pub fn new(components: Vec<Normal>) -> Result<Self> {
        let Some(first) = components.first() else {
            return Err(LayerError::EmptySamples("mixture components"));
        };
        for c in &components[1..] {
            c.check_same_shape(first)?;
        }
        Ok(Self { components })
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Normal] {
        &self.components
    }

    /// Draw a component index uniformly, then sample that component
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        let k = rng.random_range(0..self.components.len());
        self.components[k].sample()
    }
}

impl Distribution for GaussianMixture {
    /// The categorical draw happens eagerly, so only the selected
    /// component is evaluated.
    fn sample(&self) -> Result<Tensor> {
        self.sample_with(&mut rand::rng())
    }

    /// Lower bound on KL(q || p) between this mixture and a Gaussian.
    ///
    /// There is no closed form for the mixture-to-Gaussian KL; for each
    /// component k,
    ///
    /// ```text
    /// lp = log N(mu_k | p.mu, p.var)
    /// tr = sum(var_k / p.var)
    /// h  = logsumexp_j [ log N(mu_k | mu_j, var_k + var_j) - log K ]
    /// KL += (tr / 2 - lp + h) / K
    /// ```
    ///
    /// Training dynamics depend on this particular approximation; do not
    /// swap it for a different estimator.
    fn kl_to(&self, prior: &Normal) -> Result<Tensor> {
        let nk = self.components.len() as f64;
        let ln_k = nk.ln();

        let p_var = prior.var()?;
        let vars = self
            .components
            .iter()
            .map(|q| {
                q.check_same_shape(prior)?;
                q.var()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut kl = Tensor::zeros((), p_var.dtype(), p_var.device())?;

        for (qk, var_k) in self.components.iter().zip(vars.iter()) {
            let lp = log_norm(qk.mu(), prior.mu(), &p_var)?;
            let tr = var_k.div(&p_var)?.sum_all()?;

            let lq = self
                .components
                .iter()
                .zip(vars.iter())
                .map(|(qj, var_j)| {
                    let overlap = log_norm(qk.mu(), qj.mu(), &(var_k + var_j)?)?;
                    Ok((overlap - ln_k)?)
                })
                .collect::<Result<Vec<_>>>()?;
            let h = log_sum_exp(&Tensor::stack(&lq, 0)?)?;

            let term = (((tr * 0.5)? - lp)? + h)?;
            kl = (kl + (term / nk)?)?;
        }
        Ok(kl)
    }

    fn dims(&self) -> &[usize] {
        self.components[0].dims()
    }
}
