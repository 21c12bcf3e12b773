use std::sync::OnceLock;

use candle_core::Tensor;

use super::random_fourier::{check_weight_rows, draw_kernel_weights};
use super::{init_once, Layer};
use crate::error::Result;
use crate::kernel::Rbf;
use crate::samples::Samples;

/// Random features of the arc-cosine kernel of order `p`
///
/// ```text
/// phi(x) = sqrt(2 / n_features) * h(x P),   P ~ N(0, 1) / lenscale
/// h(z) = step(z)      for p = 0
/// h(z) = relu(z)^p    for p >= 1
/// ```
///
/// These mimic a single infinitely wide layer of step (p = 0), relu
/// (p = 1) or rectified polynomial units. As with `RandomFourier`, `P` is
/// drawn at the first build and kept fixed.
pub struct RandomArcCosine {
    n_features: usize,
    p: usize,
    kernel: Rbf,
    seed: Option<u64>,
    weights: OnceLock<Tensor>,
}

/// * `n_features` - number of random units, also the output width
/// * `p` - order of the kernel
/// * `lenscale` - positive length scale dividing the weights
pub fn random_arc_cosine(n_features: usize, p: usize, lenscale: f64) -> Result<RandomArcCosine> {
    Ok(RandomArcCosine {
        n_features,
        p,
        kernel: Rbf::new(lenscale)?,
        seed: None,
        weights: OnceLock::new(),
    })
}

impl RandomArcCosine {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn order(&self) -> usize {
        self.p
    }

    pub fn weights(&self) -> Option<&Tensor> {
        self.weights.get()
    }

    fn units(&self, xp: &Tensor) -> Result<Tensor> {
        if self.p == 0 {
            return Ok(xp.gt(0.)?.to_dtype(xp.dtype())?);
        }
        // repeated products keep the gradient at zero finite
        let r = xp.relu()?;
        let mut h = r.clone();
        for _ in 1..self.p {
            h = (h * &r)?;
        }
        Ok(h)
    }
}

impl Layer for RandomArcCosine {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        let input_dim = x.feature_dim()?;
        let weights = init_once(&self.weights, || {
            draw_kernel_weights(&self.kernel, self.seed, x.first(), input_dim, self.n_features)
        })?;
        check_weight_rows(weights, input_dim)?;

        let scale = (2. / self.n_features as f64).sqrt();
        let phi = x.map(|x_nd| Ok((self.units(&x_nd.matmul(weights)?)? * scale)?))?;
        Ok((phi, x.zero_kl()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LayerError;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn relu_features_match_weights() -> Result<()> {
        let dev = Device::Cpu;
        let layer = random_arc_cosine(6, 1, 2.0)?.with_seed(3);
        let x_nd = Tensor::randn(0f64, 1., (4, 3), &dev)?;
        let (phi, kl) = layer.build(&Samples::replicate(&x_nd, 2)?)?;

        assert_eq!(kl.to_scalar::<f64>()?, 0.);
        assert_eq!(phi.first().dims(), &[4, 6]);

        let w = layer.weights().expect("drawn");
        let expected = (x_nd.matmul(w)?.relu()? * (2f64 / 6.).sqrt())?.to_vec2::<f64>()?;
        let got = phi.first().to_vec2::<f64>()?;
        for (a, b) in got.iter().flatten().zip(expected.iter().flatten()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_eq!(got, phi.as_slice()[1].to_vec2::<f64>()?);
        Ok(())
    }

    #[test]
    fn orders_zero_and_two() -> Result<()> {
        let dev = Device::Cpu;
        let x = Samples::replicate(&Tensor::randn(0f32, 1., (5, 2), &dev)?, 1)?;
        let scale = (2f32 / 8.).sqrt();

        let step = random_arc_cosine(8, 0, 1.0)?;
        let (phi, _) = step.build(&x)?;
        for v in phi.first().flatten_all()?.to_vec1::<f32>()? {
            assert!(v == 0. || (v - scale).abs() < 1e-6);
        }

        let quad = random_arc_cosine(8, 2, 1.0)?.with_seed(5);
        let relu = random_arc_cosine(8, 1, 1.0)?.with_seed(5);
        let (q, _) = quad.build(&x)?;
        let (r, _) = relu.build(&x)?;
        // same draw: relu(z)^2 * s == (relu(z) * s)^2 / s
        let expected = (r.first().sqr()? / scale as f64)?.to_vec2::<f32>()?;
        for (a, b) in q.first().to_vec2::<f32>()?.iter().flatten().zip(expected.iter().flatten()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }

        let wide = Samples::replicate(&Tensor::zeros((5, 3), DType::F32, &dev)?, 1)?;
        assert!(matches!(
            quad.build(&wide),
            Err(LayerError::FeatureDimMismatch { expected: 2, found: 3, .. })
        ));
        assert!(random_arc_cosine(8, 1, 0.).is_err());
        Ok(())
    }
}
