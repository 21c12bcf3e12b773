use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use log::debug;

use super::{init_once, Layer};
use crate::distribution::{norm_prior, posterior, Distribution, Normal, Posterior};
use crate::error::{LayerError, Result};
use crate::samples::Samples;

/// Settings of a variational dense layer
#[derive(Debug, Clone)]
pub struct DenseVarConfig {
    /// Initial prior variance, also the scale of the posterior init
    pub reg: f64,
    /// Make the prior variance trainable
    pub learn_prior: bool,
    /// Number of Gaussian components in the posterior (1 = plain Gaussian)
    pub mixtures: usize,
}

impl Default for DenseVarConfig {
    fn default() -> Self {
        Self {
            reg: 1.,
            learn_prior: true,
            mixtures: 1,
        }
    }
}

struct DenseVarParams {
    input_dim: usize,
    prior_weight: Normal,
    prior_bias: Normal,
    post_weight: Posterior,
    post_bias: Posterior,
}

impl DenseVarParams {
    fn new(vb: &VarBuilder, input_dim: usize, output_dim: usize, config: &DenseVarConfig) -> Result<Self> {
        let w_dim = (input_dim, output_dim);
        let b_dim = output_dim;

        let vb_w = vb.pp("weight");
        let vb_b = vb.pp("bias");

        let prior_weight = norm_prior(&vb_w.pp("prior"), w_dim, config.reg, config.learn_prior)?;
        let prior_bias = norm_prior(&vb_b.pp("prior"), b_dim, config.reg, config.learn_prior)?;
        let post_weight = posterior(&vb_w.pp("posterior"), w_dim, config.reg, config.mixtures)?;
        let post_bias = posterior(&vb_b.pp("posterior"), b_dim, config.reg, config.mixtures)?;

        debug!(
            "dense_var: {} -> {} (mixtures = {}, learn_prior = {})",
            input_dim, output_dim, config.mixtures, config.learn_prior
        );

        Ok(Self {
            input_dim,
            prior_weight,
            prior_bias,
            post_weight,
            post_bias,
        })
    }

    fn kl(&self) -> Result<Tensor> {
        let kl_w = self.post_weight.kl_to(&self.prior_weight)?;
        let kl_b = self.post_bias.kl_to(&self.prior_bias)?;
        Ok((kl_w + kl_b)?)
    }
}

/// Fully connected layer with a variational posterior over W and b
///
/// Every replica gets its own draw of (W, b), so the spread of the
/// outputs reflects the posterior uncertainty of the weights.
pub struct DenseVar {
    output_dim: usize,
    config: DenseVarConfig,
    vb: VarBuilder<'static>,
    params: OnceLock<DenseVarParams>,
}

/// * `output_dim` - number of output features
/// * `config` - prior/posterior settings
/// * `vb` - variable builder for the weights, created on first build
pub fn dense_var(output_dim: usize, config: DenseVarConfig, vb: VarBuilder<'static>) -> DenseVar {
    DenseVar {
        output_dim,
        config,
        vb,
        params: OnceLock::new(),
    }
}

impl DenseVar {
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn is_built(&self) -> bool {
        self.params.get().is_some()
    }

    /// Input dimension fixed by the first build
    pub fn input_dim(&self) -> Option<usize> {
        self.params.get().map(|p| p.input_dim)
    }

    /// (weight, bias) posteriors once the layer is built
    pub fn posteriors(&self) -> Option<(&Posterior, &Posterior)> {
        self.params.get().map(|p| (&p.post_weight, &p.post_bias))
    }

    /// KL(q || p) of the current parameters, `None` before the first build
    pub fn kl(&self) -> Result<Option<Tensor>> {
        self.params.get().map(|p| p.kl()).transpose()
    }

    fn params(&self, input_dim: usize) -> Result<&DenseVarParams> {
        let params = init_once(&self.params, || {
            DenseVarParams::new(&self.vb, input_dim, self.output_dim, &self.config)
        })?;
        if params.input_dim != input_dim {
            return Err(LayerError::FeatureDimMismatch {
                replica: 0,
                expected: params.input_dim,
                found: input_dim,
            });
        }
        Ok(params)
    }
}

impl Layer for DenseVar {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        if self.output_dim == 0 {
            return Err(LayerError::InvalidArgument(
                "dense_var needs a positive output dimension".into(),
            ));
        }
        let params = self.params(x.feature_dim()?)?;

        let phi = x.map(|x_nd| {
            let w = params.post_weight.sample()?;
            let b = params.post_bias.sample()?;
            Ok(x_nd.matmul(&w)?.broadcast_add(&b)?)
        })?;

        Ok((phi, params.kl()?))
    }
}
