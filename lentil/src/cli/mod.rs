pub mod regression;

use clap::{Parser, Subcommand};

pub use regression::{KernelType, RegressionArgs};

/// LENTIL
#[derive(Parser)]
#[command(
    name = "lentil",
    version,
    about = "Bayesian neural networks from variational layers",
    long_about = "Bayesian neural networks assembled from variational layers on candle.\n\n\
                  Every layer maps stochastic replicas of its input to replicas of its\n\
                  output together with a KL term. Weights carry a Gaussian (or Gaussian\n\
                  mixture) posterior and a Gaussian prior, random Fourier and arc-cosine\n\
                  features approximate kernel machines, and training minimises the\n\
                  negative ELBO with AdamW over shuffled minibatches.\n\n\
                  Inputs are delimited text matrices (`.tsv`, `.csv`, optionally `.gz`).",
    term_width = 80
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Bayesian kernel regression with random Fourier features",
        long_about = "Approximate Gaussian process regression by a variational linear model\n\
                      on random Fourier features.\n\n\
                      Pipeline stages:\n\
                      1. Load X (n x d), Y (n x k) and optional query inputs\n\
                      2. Draw kernel frequencies (RBF or Matérn) once, seeded by --seed\n\
                      3. Map inputs to [cos(xP), sin(xP)] / sqrt(n_features)\n\
                      4. Variational dense layer with learned prior variance\n\
                      5. Gaussian likelihood with learned noise variance\n\
                      6. Minimise the negative ELBO with AdamW\n\
                      7. Average posterior draws on the query inputs\n\n\
                      Outputs:\n\
                      - {out}.mean.tsv: predictive mean (n_query x k)\n\
                      - {out}.std.tsv: predictive std, sqrt(Var[f] + noise) (n_query x k)"
    )]
    Regression(RegressionArgs),
}

impl Commands {
    pub fn verbose(&self) -> bool {
        match self {
            Commands::Regression(args) => args.verbose,
        }
    }
}
