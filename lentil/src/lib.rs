//! Variational layers for Bayesian neural networks on candle.
//!
//! Networks are built from layers that map stochastic replicas of their
//! input to replicas of their output, together with a scalar KL term.
//! Training minimises the negative ELBO (`loss::elbo`) with any candle
//! optimizer.

pub mod cli;
pub mod distribution;
pub mod error;
pub mod io;
pub mod kernel;
pub mod layer;
pub mod likelihood;
pub mod loss;
pub mod param;
pub mod predict;
pub mod samples;
pub mod train;

pub use error::{LayerError, Result};
pub use kernel::{FourierKernel, Matern, Rbf};
pub use layer::{BoxedLayer, Layer, LayerExt};
pub use likelihood::{
    BernoulliLikelihood, BinomialLikelihood, CategoricalLikelihood, Likelihood, NormalLikelihood,
};
pub use loss::elbo;
pub use predict::{predict_expected, predict_samples};
pub use samples::{Branches, Samples};
pub use train::{train_elbo, TrainConfig};

pub use candle_core;
pub use candle_nn;
