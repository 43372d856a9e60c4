use crate::tefa_common::*;
use clap::Parser;
use matrix_param::io::read_json;
use tefa::*;

#[derive(Parser, Debug, Clone)]
///
/// Infer the first-mode factor of new data with a fitted model
///
pub struct TransformArgs {
    /// data file, tab-separated (`.gz` ok)
    #[arg(required = true)]
    data_file: Box<str>,

    /// lay the data out as a tensor of this shape, e.g. `10,20,5`
    #[arg(long, value_delimiter(','))]
    shape: Option<Vec<usize>>,

    /// checkpoint written by `fit`
    #[arg(short = 'c', long, required = true)]
    checkpoint: Box<str>,

    /// Output header
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn transform_tensor(args: &TransformArgs) -> anyhow::Result<()> {
    let checkpoint: Checkpoint = read_json(&args.checkpoint)?;
    info!(
        "{} on {:?} after {} iterations",
        checkpoint.likelihood, checkpoint.m, checkpoint.iteration
    );

    let dec = Decompose::from_checkpoint(&checkpoint)?;
    let x = read_tensor(&args.data_file, args.shape.as_deref())?;
    mkdir(&args.out)?;

    let u0 = dec.transform(&x)?;
    write_factor(&u0, &format!("{}.U0.tsv.gz", args.out))?;

    info!("done");
    Ok(())
}
