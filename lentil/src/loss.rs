use candle_core::Tensor;

use crate::error::{LayerError, Result};
use crate::likelihood::Likelihood;
use crate::samples::Samples;

/// Negative evidence lower bound of a minibatch
///
/// ```text
/// loss = kl - n * mean_{s, i} sum_{j} log p(y_ij | f_s,ij)
/// ```
///
/// * `outputs` - network outputs, one replica per posterior draw
/// * `targets` - observations `(batch, ...)`
/// * `n` - total number of observations in the data set
/// * `kl` - scalar KL (and penalty) term from `build`
/// * `likelihood` - observation model
pub fn elbo<L: Likelihood + ?Sized>(
    outputs: &Samples,
    targets: &Tensor,
    n: usize,
    kl: &Tensor,
    likelihood: &L,
) -> Result<Tensor> {
    if n == 0 {
        return Err(LayerError::InvalidArgument(
            "data set size must be positive".into(),
        ));
    }

    let per_replica = outputs
        .iter()
        .map(|f| {
            let lp = likelihood.log_prob(targets, f)?;
            let lp = if lp.rank() > 1 {
                lp.flatten_from(1)?.sum(1)?
            } else {
                lp
            };
            Ok(lp.mean_all()?)
        })
        .collect::<Result<Vec<_>>>()?;

    let ell = Tensor::stack(&per_replica, 0)?.mean_all()?;
    Ok(kl.broadcast_sub(&(ell * n as f64)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::NormalLikelihood;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn matches_hand_computation() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f64, 0.], [2., 1.], [0., 0.]], &dev)?;
        let f1 = Tensor::zeros((3, 2), DType::F64, &dev)?;
        let f2 = Tensor::ones((3, 2), DType::F64, &dev)?;
        let outputs = Samples::new(vec![f1, f2])?;
        let kl = Tensor::new(3f64, &dev)?;

        let sq_err = |y: &Tensor, f: &Tensor| (y - f)?.sqr()?.neg();
        let loss: f64 = elbo(&outputs, &y, 100, &kl, &sq_err)?.to_scalar()?;

        // replica 1: row sums -1, -5, 0; replica 2: -1, -1, -2
        let ell = (-6. / 3. + -4. / 3.) / 2.;
        assert_abs_diff_eq!(loss, 3. - 100. * ell, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn rejects_empty_data_set() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::zeros((2, 1), DType::F32, &dev)?;
        let outputs = Samples::replicate(&y, 1)?;
        let lik = NormalLikelihood::fixed(1., DType::F32, &dev)?;
        let kl = Tensor::zeros((), DType::F32, &dev)?;
        assert!(matches!(
            elbo(&outputs, &y, 0, &kl, &lik),
            Err(LayerError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn better_fit_lowers_the_loss() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::randn(0f32, 1., (20, 1), &dev)?;
        let lik = NormalLikelihood::fixed(1., DType::F32, &dev)?;
        let kl = Tensor::zeros((), DType::F32, &dev)?;

        let exact = Samples::replicate(&y, 2)?;
        let off = Samples::replicate(&(&y + 3.)?, 2)?;
        let a: f32 = elbo(&exact, &y, 20, &kl, &lik)?.to_scalar()?;
        let b: f32 = elbo(&off, &y, 20, &kl, &lik)?.to_scalar()?;
        assert!(a < b);
        Ok(())
    }
}
