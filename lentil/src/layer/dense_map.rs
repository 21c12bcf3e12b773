use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::{init_once, Layer};
use crate::error::{LayerError, Result};
use crate::param::{l1_loss, l2_loss};
use crate::samples::Samples;

struct DenseMapParams {
    input_dim: usize,
    weight: Tensor,
    bias: Tensor,
}

/// Fully connected layer with point-estimate weights
///
/// Instead of a KL term it returns the penalty
/// `l1 * (|W|_1 + |b|_1) + l2 * (|W|_2^2 + |b|_2^2) / 2`.
pub struct DenseMap {
    output_dim: usize,
    l1_reg: f64,
    l2_reg: f64,
    vb: VarBuilder<'static>,
    params: OnceLock<DenseMapParams>,
}

/// * `output_dim` - number of output features
/// * `l1_reg` - L1 penalty weight (a non-positive weight disables it)
/// * `l2_reg` - L2 penalty weight (a non-positive weight disables it)
/// * `vb` - variable builder for `weight` and `bias`
pub fn dense_map(output_dim: usize, l1_reg: f64, l2_reg: f64, vb: VarBuilder<'static>) -> DenseMap {
    DenseMap {
        output_dim,
        l1_reg,
        l2_reg,
        vb,
        params: OnceLock::new(),
    }
}

impl DenseMap {
    pub fn is_built(&self) -> bool {
        self.params.get().is_some()
    }

    /// (weight, bias) once the layer is built
    pub fn weights(&self) -> Option<(&Tensor, &Tensor)> {
        self.params.get().map(|p| (&p.weight, &p.bias))
    }

    fn params(&self, input_dim: usize) -> Result<&DenseMapParams> {
        let params = init_once(&self.params, || {
            let weight = self.vb.get_with_hints(
                (input_dim, self.output_dim),
                "weight",
                candle_nn::Init::Randn {
                    mean: 0.,
                    stdev: 1.,
                },
            )?;
            let bias = self.vb.get_with_hints(
                self.output_dim,
                "bias",
                candle_nn::Init::Randn {
                    mean: 0.,
                    stdev: 1.,
                },
            )?;
            Ok(DenseMapParams {
                input_dim,
                weight,
                bias,
            })
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

    fn penalty(&self, params: &DenseMapParams, zero: Tensor) -> Result<Tensor> {
        let mut penalty = zero;
        if self.l1_reg > 0. {
            let l1 = (l1_loss(&params.weight)? + l1_loss(&params.bias)?)?;
            penalty = (penalty + (l1 * self.l1_reg)?)?;
        }
        if self.l2_reg > 0. {
            let l2 = (l2_loss(&params.weight)? + l2_loss(&params.bias)?)?;
            penalty = (penalty + (l2 * self.l2_reg)?)?;
        }
        Ok(penalty)
    }
}

impl Layer for DenseMap {
    type Input = Samples;
    type Output = Samples;

    fn build(&self, x: &Samples) -> Result<(Samples, Tensor)> {
        if self.output_dim == 0 {
            return Err(LayerError::InvalidArgument(
                "dense_map needs a positive output dimension".into(),
            ));
        }
        let params = self.params(x.feature_dim()?)?;
        let phi = x.map(|x_nd| Ok(x_nd.matmul(&params.weight)?.broadcast_add(&params.bias)?))?;
        let penalty = self.penalty(params, x.zero_kl()?)?;
        Ok((phi, penalty))
    }
}
