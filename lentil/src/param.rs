use crate::error::{LayerError, Result};
use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::VarBuilder;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// exp(-69) ~ 1e-30 is representable in both f32 and f64
const MAX_TAIL_EXPONENT: f64 = 69.;

/// Below this, log(1 + t) is replaced by t - t^2 / 2
const LOG1P_CUTOFF: f64 = 1e-4;

/// Positivity transform, softplus
///
/// ```text
/// pos(x) = log(1 + exp(x)) = max(x, 0) + log(1 + exp(-|x|))
/// ```
///
/// `log(1 + t)` rounds to zero in the working dtype once `t` is tiny,
/// so small `t` takes the second-order series instead, and `|x|` is capped
/// so that `t` never underflows. The result is strictly positive for
/// every finite input in f32 and f64.
///
/// # Arguments
/// * `x` - unconstrained tensor, any shape
///
/// # Returns
/// * tensor of the same shape with strictly positive entries
pub fn pos(x: &Tensor) -> Result<Tensor> {
    let t = x.abs()?.minimum(MAX_TAIL_EXPONENT)?.neg()?.exp()?;
    let log1p = t.affine(1., 1.)?.log()?;
    let series = (t.affine(-0.5, 1.)? * &t)?;
    let tail = t.lt(LOG1P_CUTOFF)?.where_cond(&series, &log1p)?;
    Ok((x.relu()? + tail)?)
}

/// Inverse of `pos` for a positive scalar, log(exp(v) - 1)
pub fn inv_pos(v: f64) -> f64 {
    v + (-(-v).exp_m1()).ln()
}

/// A strictly positive tensor: either a constant or an unconstrained
/// trainable tensor routed through `pos` every time it is read.
#[derive(Clone, Debug)]
pub enum PositiveParam {
    /// positive constant
    Fixed(Tensor),
    /// raw trainable tensor; the positive value is `pos(raw)`
    Learned(Tensor),
}

impl PositiveParam {
    /// Constant positive scalar
    ///
    /// # Arguments
    /// * `value` - must be strictly positive
    /// * `dtype` - dtype of the stored scalar
    /// * `device` - device of the stored scalar
    ///
    /// # Returns
    /// * `InvalidArgument` for a non-positive (or NaN) value
    pub fn fixed(value: f64, dtype: DType, device: &Device) -> Result<Self> {
        if !(value > 0.) {
            return Err(LayerError::InvalidArgument(format!(
                "positive value required, got {}",
                value
            )));
        }
        let t = Tensor::new(value, device)?.to_dtype(dtype)?;
        Ok(Self::Fixed(t))
    }

    /// Trainable positive tensor, initialised so that `value() == init`
    ///
    /// # Arguments
    /// * `vb` - variable builder owning the raw parameter
    /// * `shape` - parameter shape (`()` for a scalar)
    /// * `name` - variable name under `vb`
    /// * `init` - initial positive value
    pub fn learned<S: Into<Shape>>(vb: &VarBuilder, shape: S, name: &str, init: f64) -> Result<Self> {
        if !(init > 0.) {
            return Err(LayerError::InvalidArgument(format!(
                "positive initial value required, got {}",
                init
            )));
        }
        let raw = vb.get_with_hints(shape, name, candle_nn::Init::Const(inv_pos(init)))?;
        Ok(Self::Learned(raw))
    }

    /// Current positive value; for a learned parameter `pos` is applied
    /// on every call, so the result follows optimizer updates
    pub fn value(&self) -> Result<Tensor> {
        match self {
            Self::Fixed(v) => Ok(v.clone()),
            Self::Learned(raw) => pos(raw),
        }
    }

    pub fn is_learned(&self) -> bool {
        matches!(self, Self::Learned(_))
    }
}

/// Log density of `x` under a diagonal Gaussian, summed over all elements
///
/// ```text
/// -0.5 * sum[ log(2 pi var) + (x - mu)^2 / var ]
/// ```
///
/// # Arguments
/// * `x` - observation
/// * `mu` - mean, broadcast against `x`
/// * `var` - positive variance, broadcast against `x`
///
/// # Returns
/// * scalar log density
pub fn log_norm(x: &Tensor, mu: &Tensor, var: &Tensor) -> Result<Tensor> {
    let log_var = (var.log()? + LN_2PI)?;
    let sq = x.broadcast_sub(mu)?.sqr()?.broadcast_div(var)?;
    Ok((log_var.broadcast_add(&sq)?.sum_all()? * (-0.5))?)
}

/// log sum_i exp(x_i) over a 1-D tensor, returned as a scalar
pub fn log_sum_exp(x: &Tensor) -> Result<Tensor> {
    let m = x.max_keepdim(0)?.detach();
    let s = x.broadcast_sub(&m)?.exp()?.sum_keepdim(0)?.log()?;
    Ok((s + m)?.squeeze(0)?)
}

/// sum |x|
pub fn l1_loss(x: &Tensor) -> Result<Tensor> {
    Ok(x.abs()?.sum_all()?)
}

/// sum(x^2) / 2
pub fn l2_loss(x: &Tensor) -> Result<Tensor> {
    Ok((x.sqr()?.sum_all()? * 0.5)?)
}
