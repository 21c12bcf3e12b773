use std::sync::OnceLock;

use candle_core::Tensor;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{init_once, Layer};
use crate::error::{LayerError, Result};
use crate::kernel::{FourierKernel, Rbf};
use crate::samples::Samples;

/// Random Fourier features of a shift-invariant kernel
///
/// phi(x) = [cos(x P), sin(x P)] / sqrt(n_features)
///
/// `P` is drawn from the kernel's spectral density at the first build
/// and reused afterwards. It is a constant, not a trainable parameter.
pub struct RandomFourier<K: FourierKernel = Rbf> {
    n_features: usize,
    kernel: K,
    seed: Option<u64>,
    weights: OnceLock<Tensor>,
}

/// * `n_features` - number of frequencies; the output has `2 * n_features` columns
/// * `kernel` - spectral sampler, e.g. `Rbf` or `Matern`
pub fn random_fourier<K: FourierKernel>(n_features: usize, kernel: K) -> RandomFourier<K> {
    RandomFourier {
        n_features,
        kernel,
        seed: None,
        weights: OnceLock::new(),
    }
}

impl<K: FourierKernel> RandomFourier<K> {
    /// Draw `P` from a seeded generator instead of the thread rng
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// `(input_dim, n_features)` frequency matrix once drawn
    pub fn weights(&self) -> Option<&Tensor> {
        self.weights.get()
    }
}

/// Draw `(input_dim, n_features)` kernel weights on the device and with the
/// dtype of `like`
pub(crate) fn draw_kernel_weights<K: FourierKernel>(
    kernel: &K,
    seed: Option<u64>,
    like: &Tensor,
    input_dim: usize,
    n_features: usize,
) -> Result<Tensor> {
    let w = match seed {
        Some(seed) => kernel.weights(input_dim, n_features, &mut StdRng::seed_from_u64(seed))?,
        None => kernel.weights(input_dim, n_features, &mut rand::rng())?,
    };
    debug!(
        "kernel weights: {} x {} (lenscale = {})",
        input_dim,
        n_features,
        kernel.lenscale()
    );
    let data: Vec<f64> = w.iter().copied().collect();
    let w = Tensor::from_vec(data, (input_dim, n_features), like.device())?;
    Ok(w.to_dtype(like.dtype())?)
}

/// Weights are fixed by the first build; later inputs must match their rows
pub(crate) fn check_weight_rows(weights: &Tensor, input_dim: usize) -> Result<()> {
    let expected = weights.dim(0)?;
    if expected != input_dim {
        return Err(LayerError::FeatureDimMismatch {
            replica: 0,
            expected,
            found: input_dim,
        });
    }
    Ok(())
}

impl<K: FourierKernel> Layer for RandomFourier<K> {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        let input_dim = x.feature_dim()?;
        let weights = init_once(&self.weights, || {
            draw_kernel_weights(&self.kernel, self.seed, x.first(), input_dim, self.n_features)
        })?;
        check_weight_rows(weights, input_dim)?;

        let scale = (self.n_features as f64).sqrt().recip();
        let phi = x.map(|x_nd| {
            let xp = x_nd.matmul(weights)?;
            let feat = Tensor::cat(&[xp.cos()?, xp.sin()?], 1)?;
            Ok((feat * scale)?)
        })?;
        Ok((phi, x.zero_kl()?))
    }
}
