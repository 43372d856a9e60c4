pub use log::info;
pub use matrix_util::common_io::mkdir;
pub use matrix_util::traits::IoOps;
pub use ndarray::prelude::*;

/// Read a delimited matrix and lay it out as a tensor of `shape`
/// (row-major); without `shape` the matrix itself is the data
pub fn read_tensor(file: &str, shape: Option<&[usize]>) -> anyhow::Result<ArrayD<f32>> {
    let mat = Array2::<f32>::from_tsv(file, None)?;
    info!("read a {} x {} matrix from {}", mat.nrows(), mat.ncols(), file);

    match shape {
        Some(shape) => {
            let ntot: usize = shape.iter().product();
            if ntot != mat.len() {
                anyhow::bail!(
                    "{} values in {} do not fill a tensor of shape {:?}",
                    mat.len(),
                    file,
                    shape
                );
            }
            Ok(mat
                .as_standard_layout()
                .into_owned()
                .into_shape_with_order(IxDyn(shape))?)
        }
        None => Ok(mat.into_dyn()),
    }
}

/// Write `U[f]` of shape `(K, M_f)` as an `M_f x K` matrix
pub fn write_factor(u: &Array2<f32>, file: &str) -> anyhow::Result<()> {
    u.t().to_owned().to_tsv(file)?;
    info!("wrote {}", file);
    Ok(())
}

/// Write a tensor as the `M_0 x (M_1 ... M_{F-1})` matrix that
/// `read_tensor` lays out again
pub fn write_tensor(x: &ArrayD<f32>, file: &str) -> anyhow::Result<()> {
    let nrow = x.shape().first().cloned().unwrap_or(0);
    let ncol = x.len() / nrow.max(1);
    x.as_standard_layout()
        .into_owned()
        .into_shape_with_order((nrow, ncol))?
        .to_tsv(file)?;
    info!("wrote {}", file);
    Ok(())
}
