use crate::tefa_common::*;
use clap::Parser;
use matrix_param::io::{write_json, ParamIo};
use tefa::*;

#[derive(Parser, Debug, Clone)]
///
/// Fit a probabilistic CP factorisation
///
pub struct FitArgs {
    /// data file, tab-separated (`.gz` ok)
    #[arg(required = true)]
    data_file: Box<str>,

    /// lay the data out as a tensor of this shape, e.g. `10,20,5`
    #[arg(long, value_delimiter(','))]
    shape: Option<Vec<usize>>,

    /// number of components
    #[arg(short = 'k', long, default_value_t = 3)]
    n_components: usize,

    /// prior of each mode's factor; one value for all modes
    #[arg(long, value_enum, value_delimiter(','), default_value = "cen-normal")]
    prior: Vec<PriorFamily>,

    /// noise model
    #[arg(long, value_enum, default_value = "all-specific")]
    noise: NoiseModel,

    /// initial noise precision of the `normal` noise model
    #[arg(long, default_value_t = 0.01)]
    tau: f32,

    /// chance of each entry to enter the fit; the rest is held out and
    /// its mask written to `{out}.mask.tsv.gz`
    #[arg(long, default_value_t = 1.0)]
    trainset_prob: f32,

    /// maximum number of iterations over all phases
    #[arg(long, default_value_t = 100_000)]
    max_iter: usize,

    /// patience of the initial sampling phase
    #[arg(long, default_value_t = 10)]
    init_patience: usize,

    /// patience of the EM phase
    #[arg(long, default_value_t = 100)]
    em_patience: usize,

    /// relative log-likelihood gain that resets the patience counters
    #[arg(long, default_value_t = STALL_TOLERANCE)]
    stall_tolerance: f32,

    /// minimum log-likelihood improvement of the final phase
    #[arg(long, default_value_t = 0.1)]
    min_improvement: f32,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// do not balance component norms across modes
    #[arg(long, default_value_t = false)]
    no_rescale: bool,

    /// log the log-likelihood every so many iterations
    #[arg(long, default_value_t = 100)]
    log_every: usize,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

impl FitArgs {
    fn options(&self) -> FactorisationOptions {
        FactorisationOptions {
            n_components: self.n_components,
            priors: self.prior.clone(),
            noise: self.noise,
            tau: self.tau,
            trainset_prob: self.trainset_prob,
            max_iterations: self.max_iter,
            do_rescale: !self.no_rescale,
            stop_init: StopRule::Stall(self.init_patience, self.stall_tolerance),
            stop_em: StopRule::Stall(self.em_patience, self.stall_tolerance),
            stop_bcd: StopRule::Improvement(self.min_improvement, Improvement::Absolute),
            seed: self.seed,
            log_every: self.log_every,
            show_progress: true,
            verbose: self.verbose,
        }
    }
}

pub fn fit_tensor(args: &FitArgs) -> anyhow::Result<()> {
    let x = read_tensor(&args.data_file, args.shape.as_deref())?;
    mkdir(&args.out)?;

    let mut dec = Decompose::new(args.options());
    dec.fit(&x)?;

    let model = dec.model()?;
    for (f, u) in model.factors().iter().enumerate() {
        write_factor(u, &format!("{}.U{}.tsv.gz", args.out, f))?;
    }

    for (f, prior) in model.priors().iter().enumerate() {
        let files = prior.to_tsv(&format!("{}.prior{}", args.out, f))?;
        info!("wrote {}", files.join(", "));
    }

    let evr = dec.variance_ratio()?.clone().insert_axis(Axis(1));
    evr.to_tsv(&format!("{}.evr.tsv.gz", args.out))?;

    let llh = Array1::from(model.llh_trace().to_vec()).insert_axis(Axis(1));
    llh.to_tsv(&format!("{}.llh.tsv.gz", args.out))?;

    if let Some(mask) = dec.mask()? {
        write_tensor(mask, &format!("{}.mask.tsv.gz", args.out))?;
    }

    let checkpoint_file = format!("{}.checkpoint.json.gz", args.out);
    write_json(&dec.parameters()?, &checkpoint_file)?;
    info!("wrote {}", checkpoint_file);

    info!("done");
    Ok(())
}
