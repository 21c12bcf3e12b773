use candle_core::Tensor;
use rayon::prelude::*;

use crate::error::{LayerError, Result};
use crate::layer::Layer;
use crate::samples::Samples;

/// Draw `n_groups * n_samples` stochastic outputs of `net` at `x`
///
/// Each group runs one `build` with `n_samples` replicas; groups are
/// evaluated in parallel. Returns `(n_groups * n_samples, n, d)`.
pub fn predict_samples<L>(net: &L, x: &Tensor, n_samples: usize, n_groups: usize) -> Result<Tensor>
where
    L: Layer<Input = Samples, Output = Samples>,
{
    if n_groups == 0 {
        return Err(LayerError::InvalidArgument(
            "at least one prediction group is needed".into(),
        ));
    }
    let input = Samples::replicate(x, n_samples)?;

    let groups = (0..n_groups)
        .into_par_iter()
        .map(|_| {
            let (f, _) = net.build(&input)?;
            f.stack()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tensor::cat(&groups, 0)?)
}

/// Monte Carlo estimate of E[f(x)] under the posterior, `(n, d)`
pub fn predict_expected<L>(net: &L, x: &Tensor, n_samples: usize, n_groups: usize) -> Result<Tensor>
where
    L: Layer<Input = Samples, Output = Samples>,
{
    Ok(predict_samples(net, x, n_samples, n_groups)?.mean(0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{dense_var, identity, DenseVarConfig};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn sample_and_average_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let net = dense_var(2, DenseVarConfig::default(), vb);
        let x = Tensor::randn(0f32, 1., (7, 3), &dev)?;

        let f = predict_samples(&net, &x, 5, 4)?;
        assert_eq!(f.dims(), &[20, 7, 2]);
        let m = predict_expected(&net, &x, 5, 4)?;
        assert_eq!(m.dims(), &[7, 2]);

        assert!(predict_samples(&net, &x, 5, 0).is_err());
        assert!(predict_samples(&net, &x, 0, 1).is_err());
        Ok(())
    }

    #[test]
    fn deterministic_net_predicts_input() -> Result<()> {
        let x = Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu)?;
        let m = predict_expected(&identity(), &x, 3, 2)?;
        assert_eq!(m.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        Ok(())
    }
}
