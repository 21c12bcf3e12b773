use anyhow::Result;
use clap::Parser;
use lentil::cli::{regression, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.command.verbose() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.command {
        Commands::Regression(args) => {
            regression::run(args)?;
        }
    }

    Ok(())
}
