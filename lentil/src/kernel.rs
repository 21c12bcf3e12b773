//! Spectral samplers for random Fourier feature approximations of
//! shift-invariant kernels.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};

use crate::error::{LayerError, Result};

/// A shift-invariant kernel that can hand out random basis weights
pub trait FourierKernel: Send + Sync {
    fn lenscale(&self) -> f64;

    /// Unscaled draws from the kernel's spectral density,
    /// shape `(input_dim, n_features)`
    fn spectral_sample<R: Rng + ?Sized>(
        &self,
        input_dim: usize,
        n_features: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>>;

    /// Fresh random weights `(input_dim, n_features) / lenscale`
    fn weights<R: Rng + ?Sized>(
        &self,
        input_dim: usize,
        n_features: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        if input_dim == 0 || n_features == 0 {
            return Err(LayerError::InvalidArgument(format!(
                "kernel weights need positive dimensions, got ({}, {})",
                input_dim, n_features
            )));
        }
        Ok(self.spectral_sample(input_dim, n_features, rng)? / self.lenscale())
    }
}

fn check_lenscale(lenscale: f64) -> Result<f64> {
    if !(lenscale > 0.) {
        return Err(LayerError::InvalidArgument(format!(
            "length scale must be positive, got {}",
            lenscale
        )));
    }
    Ok(lenscale)
}

fn standard_normal<R: Rng + ?Sized>(nrow: usize, ncol: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn((nrow, ncol), || StandardNormal.sample(&mut *rng))
}

/// Radial basis function (squared exponential) kernel
#[derive(Clone, Debug)]
pub struct Rbf {
    lenscale: f64,
}

impl Rbf {
    pub fn new(lenscale: f64) -> Result<Self> {
        Ok(Self {
            lenscale: check_lenscale(lenscale)?,
        })
    }
}

impl Default for Rbf {
    fn default() -> Self {
        Self { lenscale: 1. }
    }
}

impl FourierKernel for Rbf {
    fn lenscale(&self) -> f64 {
        self.lenscale
    }

    fn spectral_sample<R: Rng + ?Sized>(
        &self,
        input_dim: usize,
        n_features: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        Ok(standard_normal(input_dim, n_features, rng))
    }
}

/// Matérn kernel with ν = p + 1/2
///
/// The spectral density is a multivariate Student-t with
/// df = 2 (p + 1/2), sampled as x = y * sqrt(df / u) with
/// y ~ N(0, I) and one u ~ χ²(df) per feature.
#[derive(Clone, Debug)]
pub struct Matern {
    p: usize,
    lenscale: f64,
}

impl Matern {
    pub fn new(p: usize, lenscale: f64) -> Result<Self> {
        Ok(Self {
            p,
            lenscale: check_lenscale(lenscale)?,
        })
    }

    pub fn df(&self) -> f64 {
        2. * (self.p as f64 + 0.5)
    }
}

impl Default for Matern {
    fn default() -> Self {
        Self { p: 1, lenscale: 1. }
    }
}

impl FourierKernel for Matern {
    fn lenscale(&self) -> f64 {
        self.lenscale
    }

    fn spectral_sample<R: Rng + ?Sized>(
        &self,
        input_dim: usize,
        n_features: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        let df = self.df();
        let chi2 = ChiSquared::new(df)
            .map_err(|e| LayerError::InvalidArgument(format!("chi-square({}): {}", df, e)))?;

        let y = standard_normal(input_dim, n_features, rng);
        let u = Array1::from_shape_simple_fn(n_features, || chi2.sample(&mut *rng));
        let scale = u.mapv(|u_j| (df / u_j).sqrt());

        Ok(y * &scale.insert_axis(Axis(0)))
    }
}
