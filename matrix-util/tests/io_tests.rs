use matrix_util::common_io::create_temp_dir_file;
use matrix_util::traits::{IoOps, SampleOps};
use ndarray::Ix2;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[test]
fn ndarray_io_test() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(42);
    let xx = ndarray::Array2::<f32>::runif(Ix2(50, 20), &mut rng);

    let tsv_file = create_temp_dir_file("txt.gz")?;
    xx.to_tsv(tsv_file.to_str().unwrap())?;

    let yy = ndarray::Array2::<f32>::read_file_delim(tsv_file.to_str().unwrap(), "\t", None)?;

    assert_eq!(xx, yy);

    Ok(())
}

#[test]
fn ragged_rows_are_rejected() -> anyhow::Result<()> {
    let csv_file = create_temp_dir_file("csv")?;
    std::fs::write(&csv_file, "# comment\n1,2,3\n4,5\n")?;

    let res = ndarray::Array2::<f32>::read_file_delim(csv_file.to_str().unwrap(), ",", None);
    assert!(res.is_err());

    std::fs::write(&csv_file, "a,b\n1,2\n3,4\n")?;
    let xx = ndarray::Array2::<f32>::read_file_delim(csv_file.to_str().unwrap(), ",", Some(1))?;
    assert_eq!(xx, ndarray::array![[1., 2.], [3., 4.]]);

    Ok(())
}
