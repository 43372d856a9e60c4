mod fit_tensor;
mod tefa_common;
mod transform_tensor;

use clap::{Parser, Subcommand};
use fit_tensor::*;
use transform_tensor::*;

/// TEFA
#[derive(Parser, Debug)]
#[command(
    version,
    about = "TEFA",
    long_about = "Probabilistic TEnsor FActorisation\n\n\
                  TEFA decomposes a multi-way array into K rank-one components under a \
                  Bayesian model with a prior on each factor matrix and a Normal noise \
                  model. Inference runs three phases: initial sampling with fixed noise, \
                  sampling with noise updates (EM), and posterior-mode block coordinate \
                  descent.\n\n\
                  Data files are tab-separated matrices (`.gz` ok); use `--shape` to \
                  read a higher-order tensor laid out in row-major order.",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit factor matrices",
        long_about = "Fit a CP factorisation with per-mode priors.\n\n\
                      Outputs:\n\
                      - {out}.U{f}.tsv.gz: factor of mode f (M_f x K)\n\
                      - {out}.prior{f}.{param}.tsv.gz: prior parameters of mode f\n\
                      - {out}.evr.tsv.gz: explained variance ratio per component\n\
                      - {out}.llh.tsv.gz: log-likelihood trace\n\
                      - {out}.mask.tsv.gz: entries used (1) and held out (0), with --trainset-prob\n\
                      - {out}.checkpoint.json.gz: every persistent parameter"
    )]
    Fit(FitArgs),

    #[command(
        about = "Project new data onto fitted factors",
        long_about = "Infer the first-mode factor of new data, holding the other \
                      factors of a fitted model fixed.\n\n\
                      Outputs:\n\
                      - {out}.U0.tsv.gz: factor of mode 0 (M_0 x K)"
    )]
    Transform(TransformArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            fit_tensor(args)?;
        }
        Commands::Transform(args) => {
            transform_tensor(args)?;
        }
    }

    Ok(())
}
