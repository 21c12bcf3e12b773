use candle_core::{DType, Tensor};
use candle_nn::{AdamW, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::layer::Layer;
use crate::likelihood::Likelihood;
use crate::loss::elbo;
use crate::samples::Samples;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// posterior draws per minibatch
    pub num_samples: usize,
    /// minibatch shuffling seed
    pub seed: u64,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            batch_size: 100,
            num_epochs: 100,
            num_samples: 5,
            seed: 42,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Fit `net` by minimising the negative ELBO with AdamW
///
/// * `net` - network mapping input replicas to likelihood parameters
/// * `likelihood` - observation model
/// * `varmap` - owner of every trainable variable (network and likelihood)
/// * `x_nd` - inputs `(n, d)`
/// * `y_nd` - targets `(n, ...)`
///
/// Returns the mean minibatch loss of each epoch.
pub fn train_elbo<L, Lik>(
    net: &L,
    likelihood: &Lik,
    varmap: &VarMap,
    x_nd: &Tensor,
    y_nd: &Tensor,
    config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    L: Layer<Input = Samples, Output = Samples>,
    Lik: Likelihood + ?Sized,
{
    let n = x_nd.dim(0)?;
    if n == 0 || y_nd.dim(0)? != n {
        anyhow::bail!(
            "inputs ({:?}) and targets ({:?}) must share a non-empty batch axis",
            x_nd.dims(),
            y_nd.dims()
        );
    }
    if config.batch_size == 0 {
        anyhow::bail!("batch size must be positive");
    }
    let batch_size = config.batch_size.min(n);

    // variables are created on the first build; register them before
    // handing them to the optimizer
    net.build(&Samples::replicate(&x_nd.narrow(0, 0, batch_size)?, 1)?)?;

    let mut adam = AdamW::new_lr(varmap.all_vars(), config.learning_rate.into())?;
    info!(
        "training on {} samples, {} variables, batch size {}",
        n,
        varmap.all_vars().len(),
        batch_size
    );

    let pb = ProgressBar::new(config.num_epochs as u64);
    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let mut loss_trace = Vec::with_capacity(config.num_epochs);

    for epoch in 0..config.num_epochs {
        indices.shuffle(&mut rng);

        let mut loss_tot = 0f32;
        let mut num_batches = 0;

        for chunk in indices.chunks(batch_size) {
            let idx = Tensor::from_slice(chunk, chunk.len(), x_nd.device())?;
            let x_b = x_nd.index_select(&idx, 0)?;
            let y_b = y_nd.index_select(&idx, 0)?;

            let (f, kl) = net.build(&Samples::replicate(&x_b, config.num_samples)?)?;
            let loss = elbo(&f, &y_b, n, &kl, likelihood)?;
            adam.backward_step(&loss)?;

            loss_tot += loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
            num_batches += 1;
        }

        let epoch_loss = loss_tot / num_batches as f32;
        loss_trace.push(epoch_loss);
        pb.inc(1);

        if config.verbose && (epoch + 1) % 50 == 0 {
            info!("[{}] loss: {}", epoch + 1, epoch_loss);
        }
    }

    pb.finish_and_clear();
    Ok(loss_trace)
}
