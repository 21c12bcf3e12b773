//! Observation models `p(y | f)` used by the ELBO.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;

use crate::error::{LayerError, Result};
use crate::param::PositiveParam;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

pub trait Likelihood {
    /// Elementwise log density of `y` given the network output `f`,
    /// broadcast to the shape of `y`
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor>;
}

impl<F> Likelihood for F
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
{
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor> {
        Ok(self(y, f)?)
    }
}

/// Gaussian likelihood: y ~ N(f, σ²)
///
/// ```text
/// log p(y | f) = -0.5 * [log(2π σ²) + (y - f)² / σ²]
/// ```
pub struct NormalLikelihood {
    var: PositiveParam,
}

impl NormalLikelihood {
    /// Known observation variance
    pub fn fixed(var: f64, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            var: PositiveParam::fixed(var, dtype, device)?,
        })
    }

    /// Scalar variance learned jointly with the network
    pub fn learned(vb: &VarBuilder, init_var: f64) -> Result<Self> {
        Ok(Self {
            var: PositiveParam::learned(vb, (), "var", init_var)?,
        })
    }

    pub fn variance(&self) -> Result<Tensor> {
        self.var.value()
    }
}

impl Likelihood for NormalLikelihood {
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor> {
        let var = self.var.value()?;
        let sq = y.broadcast_sub(f)?.sqr()?.broadcast_div(&var)?;
        let log_var = (var.log()? + LN_2PI)?;
        Ok((sq.broadcast_add(&log_var)? * (-0.5))?)
    }
}

/// Bernoulli likelihood over probabilities f ∈ (0, 1)
///
/// ```text
/// log p(y | f) = y log f + (1 - y) log(1 - f)
/// ```
pub struct BernoulliLikelihood {
    eps: f64,
}

impl Default for BernoulliLikelihood {
    fn default() -> Self {
        Self { eps: 1e-7 }
    }
}

impl BernoulliLikelihood {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Likelihood for BernoulliLikelihood {
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor> {
        let p = f.clamp(self.eps, 1. - self.eps)?;
        let log_p = p.log()?;
        let log_1mp = p.affine(-1., 1.)?.log()?;
        let one_minus_y = y.affine(-1., 1.)?;
        let lp = (y.broadcast_mul(&log_p)? + one_minus_y.broadcast_mul(&log_1mp)?)?;
        Ok(lp)
    }
}

/// Fast lgamma approximation (Mineiro's fastlgamma), accurate to ~1e-4
/// for x >= 1
///
/// ```text
/// lgamma(x) ≈ -2.081061466 - x + 0.0833333/(x+3) - log(x(1+x)(2+x)) + (2.5+x) log(x+3)
/// ```
fn lgamma_approx(x: &Tensor) -> Result<Tensor> {
    let x = x.maximum(1e-6)?;
    let logterm = ((&x * (&x + 1.)?)? * (&x + 2.)?)?.log()?;
    let xp3 = (&x + 3.)?;
    let recip_term = (xp3.recip()? * 0.0833333)?;
    let mult_term = ((&x + 2.5)? * xp3.log()?)?;
    Ok(((((recip_term - 2.081061466)? - &x)? - logterm)? + mult_term)?)
}

/// Binomial likelihood: y successes out of `n_trials`, success
/// probability f ∈ (0, 1)
///
/// ```text
/// log p(y | f) = log C(n, y) + y log f + (n - y) log(1 - f)
/// ```
///
/// `log C(n, y)` uses a fast lgamma approximation. It does not depend on
/// `f`, so gradients are exact.
pub struct BinomialLikelihood {
    n_trials: f64,
    eps: f64,
}

impl BinomialLikelihood {
    /// * `n_trials` - number of Bernoulli trials per observation
    pub fn new(n_trials: usize) -> Result<Self> {
        if n_trials == 0 {
            return Err(LayerError::InvalidArgument(
                "binomial likelihood needs at least one trial".into(),
            ));
        }
        Ok(Self {
            n_trials: n_trials as f64,
            eps: 1e-7,
        })
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials as usize
    }
}

impl Likelihood for BinomialLikelihood {
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor> {
        let n = self.n_trials;
        let n_minus_y = y.affine(-1., n)?;
        // lgamma(n + 1) - lgamma(y + 1) - lgamma(n - y + 1)
        let log_choose = ((lgamma_approx(&y.affine(0., n + 1.)?)?
            - lgamma_approx(&y.affine(1., 1.)?)?)?
            - lgamma_approx(&n_minus_y.affine(1., 1.)?)?)?;

        let p = f.clamp(self.eps, 1. - self.eps)?;
        let log_p = p.log()?;
        let log_1mp = p.affine(-1., 1.)?.log()?;
        let lp = (y.broadcast_mul(&log_p)? + n_minus_y.broadcast_mul(&log_1mp)?)?;
        Ok(lp.broadcast_add(&log_choose)?)
    }
}

/// Categorical likelihood over unnormalised logits f `(batch, K)`
///
/// ```text
/// log p(y | f) = log_softmax(f)[y]
/// ```
///
/// `y` holds class labels `0..K`, shaped `(batch,)` or `(batch, 1)`; the
/// result is `(batch, 1)`.
#[derive(Default)]
pub struct CategoricalLikelihood;

impl CategoricalLikelihood {
    pub fn new() -> Self {
        Self
    }
}

impl Likelihood for CategoricalLikelihood {
    fn log_prob(&self, y: &Tensor, f: &Tensor) -> Result<Tensor> {
        let labels = match y.rank() {
            1 => y.unsqueeze(1)?,
            2 if y.dim(1)? == 1 => y.clone(),
            _ => {
                return Err(LayerError::InvalidArgument(format!(
                    "categorical labels must be (batch,) or (batch, 1), got {:?}",
                    y.dims()
                )))
            }
        };
        let log_p = candle_nn::ops::log_softmax(f, D::Minus1)?;
        let idx = labels.to_dtype(DType::U32)?.contiguous()?;
        Ok(log_p.gather(&idx, D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_nn::VarMap;

    #[test]
    fn normal_log_density() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[0f64], [1.]], &dev)?;
        let f = Tensor::zeros((2, 1), DType::F64, &dev)?;
        let lik = NormalLikelihood::fixed(2., DType::F64, &dev)?;
        let lp = lik.log_prob(&y, &f)?.to_vec2::<f64>()?;

        let c = -0.5 * (LN_2PI + 2f64.ln());
        assert_abs_diff_eq!(lp[0][0], c, epsilon = 1e-12);
        assert_abs_diff_eq!(lp[1][0], c - 0.25, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn learned_variance_is_registered() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let lik = NormalLikelihood::learned(&vb.pp("likelihood"), 0.5)?;
        assert_eq!(varmap.all_vars().len(), 1);
        assert_abs_diff_eq!(lik.variance()?.to_scalar::<f32>()?, 0.5, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn bernoulli_and_closure() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[1f64, 0., 1.], &dev)?;
        let f = Tensor::new(&[0.8f64, 0.3, 1.], &dev)?;
        let lp = BernoulliLikelihood::new().log_prob(&y, &f)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(lp[0], 0.8f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(lp[1], 0.7f64.ln(), epsilon = 1e-12);
        assert!(lp[2].is_finite());

        let sq = |y: &Tensor, f: &Tensor| (y - f)?.sqr()?.neg();
        let lp = sq.log_prob(&y, &f)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(lp[1], -0.09, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn binomial_log_mass() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[2f64], [0.], [5.]], &dev)?;
        let f = Tensor::new(&[[0.3f64], [0.5], [0.9]], &dev)?;
        let lik = BinomialLikelihood::new(5)?;
        let lp = lik.log_prob(&y, &f)?.to_vec2::<f64>()?;

        let expected = [
            10f64.ln() + 2. * 0.3f64.ln() + 3. * 0.7f64.ln(),
            5. * 0.5f64.ln(),
            5. * 0.9f64.ln(),
        ];
        for (row, e) in lp.iter().zip(expected) {
            assert_abs_diff_eq!(row[0], e, epsilon = 2e-4);
        }

        // the coefficient cancels between two probabilities
        let g = Tensor::new(&[[0.6f64], [0.5], [0.9]], &dev)?;
        let lq = lik.log_prob(&y, &g)?.to_vec2::<f64>()?;
        let diff = 2. * (0.6f64 / 0.3).ln() + 3. * (0.4f64 / 0.7).ln();
        assert_abs_diff_eq!(lq[0][0] - lp[0][0], diff, epsilon = 1e-10);

        assert!(BinomialLikelihood::new(0).is_err());
        Ok(())
    }

    #[test]
    fn categorical_picks_log_softmax() -> Result<()> {
        let dev = Device::Cpu;
        let f = Tensor::new(&[[2f64, -1., 0.5], [0., 0., 0.]], &dev)?;
        let lik = CategoricalLikelihood::new();

        let norm = (2f64.exp() + (-1f64).exp() + 0.5f64.exp()).ln();
        let lp = lik.log_prob(&Tensor::new(&[[0f64], [2.]], &dev)?, &f)?;
        assert_eq!(lp.dims(), &[2, 1]);
        let lp = lp.to_vec2::<f64>()?;
        assert_abs_diff_eq!(lp[0][0], 2. - norm, epsilon = 1e-12);
        assert_abs_diff_eq!(lp[1][0], -(3f64.ln()), epsilon = 1e-12);

        let flat = lik.log_prob(&Tensor::new(&[1f64, 1.], &dev)?, &f)?.to_vec2::<f64>()?;
        assert_abs_diff_eq!(flat[0][0], -1. - norm, epsilon = 1e-12);

        assert!(lik.log_prob(&Tensor::zeros((2, 2), DType::F64, &dev)?, &f).is_err());
        Ok(())
    }
}
