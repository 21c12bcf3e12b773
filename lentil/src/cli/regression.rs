use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};

use crate::io::{read_matrix, write_matrix};
use crate::kernel::{FourierKernel, Matern, Rbf};
use crate::layer::{dense_var, random_fourier, DenseVarConfig, LayerExt};
use crate::likelihood::NormalLikelihood;
use crate::predict::predict_samples;
use crate::train::{train_elbo, TrainConfig};

#[derive(ValueEnum, Clone, Debug)]
pub enum KernelType {
    /// Squared exponential
    Rbf,
    /// Matérn with ν = p + 1/2
    Matern,
}

#[derive(Args, Debug)]
pub struct RegressionArgs {
    #[arg(short, long, help = "Input matrix (n x d), tsv/csv, optionally gzipped")]
    pub x: PathBuf,

    #[arg(short, long, help = "Target matrix (n x k)")]
    pub y: PathBuf,

    #[arg(short, long, help = "Query inputs for prediction (defaults to X)")]
    pub query: Option<PathBuf>,

    #[arg(long, default_value = "\t", help = "Column delimiter")]
    pub delim: String,

    #[arg(long, default_value = "100", help = "Number of random Fourier frequencies")]
    pub n_features: usize,

    #[arg(short, long, default_value = "rbf")]
    pub kernel: KernelType,

    #[arg(long, default_value = "1", help = "Matérn order p")]
    pub matern_p: usize,

    #[arg(long, default_value = "1.0")]
    pub lenscale: f64,

    #[arg(long, default_value = "1.0", help = "Initial weight prior variance")]
    pub reg: f64,

    #[arg(long, default_value = "1", help = "Posterior mixture components")]
    pub mixtures: usize,

    #[arg(long, default_value = "1.0", help = "Initial likelihood variance")]
    pub noise: f64,

    #[arg(long, default_value = "5", help = "Posterior draws per minibatch")]
    pub samples: usize,

    #[arg(long, default_value = "10", help = "Prediction groups (x samples)")]
    pub pred_groups: usize,

    #[arg(long, default_value = "200")]
    pub epochs: usize,

    #[arg(long, default_value = "10")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f32,

    #[arg(long, default_value = "666")]
    pub seed: u64,

    #[arg(short, long, help = "Output prefix (creates {output}.mean.tsv, {output}.std.tsv)")]
    pub output: PathBuf,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn load_matrix(path: &Path, delim: &str, device: &Device) -> Result<Tensor> {
    let path_str = path.to_str().ok_or_else(|| anyhow::anyhow!("Invalid path"))?;
    let x = read_matrix(path_str, delim)?;
    info!("  {:?} shape: {:?}", path, x.dims());
    Ok(x.to_device(device)?)
}

fn output_path(base: &Path, suffix: &str) -> Result<String> {
    let s = base.to_string_lossy();
    let base_str = s.strip_suffix(".tsv").unwrap_or(&s);
    Ok(format!("{}.{}.tsv", base_str, suffix))
}

fn fit_predict<K: FourierKernel>(
    args: &RegressionArgs,
    kernel: K,
    x: &Tensor,
    y: &Tensor,
    query: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, x.device());

    let config = DenseVarConfig {
        reg: args.reg,
        learn_prior: true,
        mixtures: args.mixtures,
    };
    let net = random_fourier(args.n_features, kernel)
        .with_seed(args.seed)
        .then(dense_var(y.dim(1)?, config, vb.pp("dense")));
    let likelihood = NormalLikelihood::learned(&vb.pp("likelihood"), args.noise)?;

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        num_samples: args.samples,
        seed: args.seed,
        verbose: args.verbose,
        show_progress: true,
    };
    let trace = train_elbo(&net, &likelihood, &varmap, x, y, &train_config)?;
    if let Some(last) = trace.last() {
        info!("final loss: {}", last);
    }

    let noise = likelihood.variance()?;
    info!("likelihood variance: {}", noise.to_scalar::<f32>()?);

    // (S, n, k)
    let f = predict_samples(&net, query, args.samples, args.pred_groups)?;
    let mean = f.mean_keepdim(0)?;
    let var_f = f.broadcast_sub(&mean)?.sqr()?.mean(0)?;
    let std = var_f.broadcast_add(&noise)?.sqrt()?;
    Ok((mean.squeeze(0)?, std))
}

pub fn run(args: &RegressionArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(target_os = "macos")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(target_os = "linux")]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Device::Cpu
        }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    let x = load_matrix(&args.x, &args.delim, &device)?;
    let y = load_matrix(&args.y, &args.delim, &device)?;
    if y.dim(0)? != x.dim(0)? {
        anyhow::bail!("X and Y must have same number of rows");
    }

    let query = match &args.query {
        Some(q) => load_matrix(q, &args.delim, &device)?,
        None => x.clone(),
    };
    if query.dim(1)? != x.dim(1)? {
        anyhow::bail!("query and X must have the same number of columns");
    }

    let (mean, std) = match args.kernel {
        KernelType::Rbf => {
            info!("Kernel: RBF(lenscale = {})", args.lenscale);
            fit_predict(args, Rbf::new(args.lenscale)?, &x, &y, &query)?
        }
        KernelType::Matern => {
            info!("Kernel: Matern(p = {}, lenscale = {})", args.matern_p, args.lenscale);
            fit_predict(args, Matern::new(args.matern_p, args.lenscale)?, &x, &y, &query)?
        }
    };

    for (suffix, t) in [("mean", &mean), ("std", &std)] {
        let path = output_path(&args.output, suffix)?;
        write_matrix(t, &path, &args.delim)?;
        info!("Saved {} to {}", suffix, path);
    }
    Ok(())
}
