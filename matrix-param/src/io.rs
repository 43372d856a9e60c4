use crate::cen_normal_rank_one::*;
use crate::error::ParamError;
use crate::exponential::*;
use crate::normal::*;
use crate::param_table::Params;
use crate::properties::Properties;
use crate::student_t::*;
use crate::traits::*;
use log::debug;
use matrix_util::common_io::{open_buf_reader, open_buf_writer};
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

/// Everything needed to rebuild a distribution instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSnapshot {
    pub family: String,
    pub algorithms: String,
    pub properties: Properties,
    pub shape: Vec<usize>,
    pub latent_shape: Vec<usize>,
    pub params: Params,
}

impl ParamSnapshot {
    pub fn of(dist: &dyn Distribution) -> Self {
        Self {
            family: dist.info().name.to_string(),
            algorithms: dist.algorithms().name().to_string(),
            properties: dist.properties().clone(),
            shape: dist.shape().to_vec(),
            latent_shape: dist.latent_shape().to_vec(),
            params: dist.params().to_params(),
        }
    }

    /// Rebuild the distribution by family name. Parameters go through
    /// the same validation as any other write.
    pub fn restore(&self) -> anyhow::Result<Box<dyn Distribution>> {
        let props = self.properties.clone();
        let params = self.params.clone();
        let (shape, latent) = (self.shape.as_slice(), self.latent_shape.as_slice());

        let mut dist: Box<dyn Distribution> = match self.family.as_str() {
            "Normal" => Box::new(Normal::from_params(props, shape, latent, params)?),
            "CenNormal" => Box::new(CenNormal::from_params(props, shape, latent, params)?),
            "T" => Box::new(T::from_params(props, shape, latent, params)?),
            "CenT" => Box::new(CenT::from_params(props, shape, latent, params)?),
            "CenNormalRankOne" => Box::new(CenNormalRankOne::from_params(
                props, shape, latent, params,
            )?),
            "Exponential" => Box::new(Exponential::from_params(props, shape, latent, params)?),
            other => {
                return Err(ParamError::unsupported(format!(
                    "unknown distribution family `{}`",
                    other
                )))
            }
        };

        dist.set_algorithms(algorithms_by_name(&self.algorithms)?);
        debug!(
            "restored {} `{}` with {}",
            self.family, self.properties.name, self.algorithms
        );
        Ok(dist)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Algorithms registered under their `name()`
pub fn algorithms_by_name(name: &str) -> anyhow::Result<Arc<dyn Algorithms>> {
    let ret: Arc<dyn Algorithms> = match name {
        "NormalAlgorithms" => Arc::new(NormalAlgorithms),
        "CenNormalAlgorithms" => Arc::new(CenNormalAlgorithms),
        "TAlgorithms" => Arc::new(TAlgorithms),
        "TFixedNuAlgorithms" => Arc::new(TFixedNuAlgorithms),
        "CenNormalRankOneAlgorithms" => Arc::new(CenNormalRankOneAlgorithms),
        "ExponentialAlgorithms" => Arc::new(ExponentialAlgorithms),
        _ => {
            return Err(ParamError::unsupported(format!(
                "unknown algorithms `{}`",
                name
            )))
        }
    };
    Ok(ret)
}

/// Write any serde value as JSON (gzipped if the name ends with `.gz`)
pub fn write_json<V: Serialize>(value: &V, file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(file)?;
    serde_json::to_writer(&mut buf, value)?;
    buf.flush()?;
    Ok(())
}

/// Read JSON written by [`write_json`]
pub fn read_json<V: for<'de> Deserialize<'de>>(file: &str) -> anyhow::Result<V> {
    let buf = open_buf_reader(file)?;
    Ok(serde_json::from_reader(buf)?)
}

/// consolidated output of parameter tensors
pub trait ParamIo {
    /// One `{header}.{slot}.tsv.gz` per parameter slot; every tensor
    /// is written as a matrix with the last axis along the columns
    fn to_tsv(&self, header: &str) -> anyhow::Result<Vec<String>>;
}

impl<D: Distribution + ?Sized> ParamIo for D {
    fn to_tsv(&self, header: &str) -> anyhow::Result<Vec<String>> {
        let mut files = vec![];
        for (name, value) in self.params().iter() {
            let file = format!("{}.{}.tsv.gz", header, name);
            as_matrix(value)?.to_tsv(&file)?;
            files.push(file);
        }
        Ok(files)
    }
}

/// View a tensor as `(prod of leading axes) x (last axis)`
pub fn as_matrix(x: &ArrayD<f32>) -> anyhow::Result<Array2<f32>> {
    let ncol = x.shape().last().cloned().unwrap_or(1).max(1);
    let nrow = x.len() / ncol;
    Ok(x.as_standard_layout()
        .into_owned()
        .into_shape_with_order((nrow, ncol))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::param_error;
    use approx::assert_abs_diff_eq;
    use matrix_util::common_io::create_temp_dir_file;
    use matrix_util::traits::SampleOps;
    use ndarray::IxDyn;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn json_round_trip_keeps_llh() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(41);
        let dist = T::random(Properties::new("prior"), &[3], &[4], &mut rng)?
            .with_algorithms(Arc::new(TFixedNuAlgorithms));
        let data = ArrayD::<f32>::rnorm(IxDyn(&[4, 3]), &mut rng);

        let json = ParamSnapshot::of(&dist).to_json()?;
        let back = ParamSnapshot::from_json(&json)?.restore()?;

        assert_eq!(back.info().name, "T");
        assert_eq!(back.algorithms().name(), "TFixedNuAlgorithms");
        assert_eq!(back.properties(), dist.properties());
        assert_abs_diff_eq!(back.llh(&data)?, dist.llh(&data)?, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn unknown_family_is_unsupported() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let dist = CenNormal::random(Properties::new("x"), &[2], &[], &mut rng)?;
        let mut snap = ParamSnapshot::of(&dist);
        snap.family = "Gumbel".into();
        let err = snap.restore().unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn gz_files() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(43);
        let dist = CenNormalRankOne::random(Properties::new("noise"), &[4, 5], &[], &mut rng)?;

        let file = create_temp_dir_file(".json.gz")?;
        let file = file.to_str().unwrap_or("snapshot.json.gz").to_string();
        matrix_util::common_io::mkdir(&file)?;
        write_json(&ParamSnapshot::of(&dist), &file)?;
        let snap: ParamSnapshot = read_json(&file)?;
        assert_eq!(snap.params["tau0"].shape(), &[4]);

        let header = file.trim_end_matches(".json.gz").to_string();
        let files = dist.to_tsv(&header)?;
        assert_eq!(files.len(), 2);
        let tau1 = Array2::<f32>::from_tsv(&files[1], None)?;
        assert_eq!(tau1.dim(), (1, 5));
        Ok(())
    }
}
