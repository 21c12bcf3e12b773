//! Variational layers and the combinators that wire them together.
//!
//! Every layer maps its input to `(output, kl)`, where `kl` is a scalar
//! KL divergence (or penalty) contributed by the layer's parameters.
//! Composition sums the scalar at every join, so the network's total
//! regulariser comes out of a single `build` call.
//!
//! ```ignore
//! let net = random_fourier(100, Rbf::default())
//!     .then(dense_var(1, DenseVarConfig::default(), vb.pp("dense")));
//!
//! let x = Samples::replicate(&x_nd, 5)?;
//! let (f, kl) = net.build(&x)?;
//! let loss = elbo(&f, &y_nd, n_total, &kl, &likelihood)?;
//! ```

mod basic;
mod combinators;
mod dense_map;
mod dense_var;
mod random_arc_cosine;
mod random_fourier;

pub use basic::{activation, dropout, identity, Activation, DropOut, Identity};
pub use combinators::{add, concat, fork, lmap, Add, Concat, Fork, LMap};
pub use dense_map::{dense_map, DenseMap};
pub use dense_var::{dense_var, DenseVar, DenseVarConfig};
pub use random_arc_cosine::{random_arc_cosine, RandomArcCosine};
pub use random_fourier::{random_fourier, RandomFourier};

use std::sync::OnceLock;

use candle_core::Tensor;

use crate::error::Result;
use crate::samples::Samples;

pub trait Layer: Send + Sync {
    type Input;
    type Output;

    /// Run the layer on `input`
    ///
    /// # Returns `(output, kl)`
    /// * `output` - transformed replicas (or branches)
    /// * `kl` - scalar regularisation contributed by this layer
    fn build(&self, input: &Self::Input) -> Result<(Self::Output, Tensor)>;
}

/// Replica-to-replica layer behind a pointer, e.g. one branch of `lmap`
pub type BoxedLayer = Box<dyn Layer<Input = Samples, Output = Samples>>;

impl<I: 'static, O: 'static> Layer for Box<dyn Layer<Input = I, Output = O>> {
    type Input = I;
    type Output = O;

    fn build(&self, input: &I) -> Result<(O, Tensor)> {
        self.as_ref().build(input)
    }
}

/// `first` followed by `second`; the KL terms add up
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A, B> Layer for Chain<A, B>
where
    A: Layer,
    B: Layer<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    fn build(&self, input: &A::Input) -> Result<(B::Output, Tensor)> {
        let (hidden, kl_first) = self.first.build(input)?;
        let (output, kl_second) = self.second.build(&hidden)?;
        Ok((output, (kl_first + kl_second)?))
    }
}

pub trait LayerExt: Layer + Sized {
    fn then<B>(self, next: B) -> Chain<Self, B>
    where
        B: Layer<Input = Self::Output>,
    {
        Chain {
            first: self,
            second: next,
        }
    }

    fn boxed(self) -> Box<dyn Layer<Input = Self::Input, Output = Self::Output>>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<L: Layer> LayerExt for L {}

/// Parameters are created on the first build only; later builds reuse
/// them. If two threads race, both create through the same variable
/// names and the first value stored wins.
pub(crate) fn init_once<T, F>(cell: &OnceLock<T>, init: F) -> Result<&T>
where
    F: FnOnce() -> Result<T>,
{
    if let Some(v) = cell.get() {
        return Ok(v);
    }
    let v = init()?;
    Ok(cell.get_or_init(|| v))
}
