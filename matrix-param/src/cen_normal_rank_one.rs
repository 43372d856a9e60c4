use crate::error::ParamError;
use crate::normal::{evidence, gaussian_llh, gaussian_sample};
use crate::param_table::*;
use crate::properties::Properties;
use crate::traits::*;
use matrix_util::traits::{BroadcastOps, SampleOps};
use ndarray::prelude::*;
use ndarray::IxDyn;
use rand::RngCore;
use std::sync::Arc;

static RANK_ONE_SLOTS: [SlotSpec; 2] = [
    SlotSpec::new("tau0", SlotRule::Axis(0), SlotCheck::Positive),
    SlotSpec::new("tau1", SlotRule::Axis(1), SlotCheck::Positive),
];

pub static CEN_NORMAL_RANK_ONE_INFO: FamilyInfo = FamilyInfo {
    name: "CenNormalRankOne",
    non_negative: false,
    homogenous: false,
    slots: &RANK_ONE_SLOTS,
};

/// Zero-mean Normal over an `M x N` matrix with precision
/// `tau0[i] * tau1[j]` at entry `(i, j)`
#[derive(Clone, Debug)]
pub struct CenNormalRankOne {
    core: DistributionCore,
}

/// Alternating updates of the two precision vectors, each row (column)
/// shrunk toward the pooled precision
#[derive(Debug, Default)]
pub struct CenNormalRankOneAlgorithms;

/// pseudo-observations of the pooled precision, as a share of the
/// entries of a row (column)
const SHRINKAGE: f32 = 0.5;

/// largest precision a row or column may take
const PRECISION_MAX: f32 = 1e12;

/// `(n + c) / (r + c * pooled)` for the weighted square sums `r` of
/// every slice with `n` entries each, `c = SHRINKAGE * n`
fn shrunk_precision(row_sums: &Array1<f32>, n: usize) -> Array1<f32> {
    let n = n as f32;
    let c = SHRINKAGE * n;
    let pooled = row_sums.mean().unwrap_or(0.0) / n.max(1.0);
    row_sums.mapv(|r| {
        let denom = (r + c * pooled).max((n + c) / PRECISION_MAX);
        (n + c) / denom
    })
}

fn precision(params: &ParamTable, target: &[usize]) -> anyhow::Result<ArrayD<f32>> {
    Ok(params.expand("tau0", target)? * params.expand("tau1", target)?)
}

impl Algorithms for CenNormalRankOneAlgorithms {
    fn name(&self) -> &'static str {
        "CenNormalRankOneAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        let full = params.full_shape();
        let prec = precision(params, &full)?;
        Ok(gaussian_sample(&ArrayD::zeros(IxDyn(&full)), &prec, rng))
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&params.full_shape())))
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let (target, x) = evidence(params, value)?;
        let prec = precision(params, &target)?;
        Ok(gaussian_llh(&x, &ArrayD::zeros(IxDyn(&target)), &prec))
    }

    /// One sweep of
    /// `tau0[i] = (N + c) / (sum_j tau1[j] S[i,j] + c s0)`, then the same
    /// for `tau1` given the new `tau0`, where `S` is the mean square of
    /// the data per entry and `s0` the pooled weighted mean square.
    /// `tau0` is then scaled to mean one and `tau1` takes the scale.
    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let (_, x) = evidence(params, data)?;
        let shape = params.shape();
        let (mm, nn) = (shape[0], shape[1]);

        let ss = x
            .mapv(|v| v * v)
            .mean_to_shape(shape)?
            .into_dimensionality::<Ix2>()
            .map_err(|e| ParamError::shape(e.to_string()))?;

        let tau1 = params
            .get("tau1")?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|e| ParamError::shape(e.to_string()))?;

        let tau0_new = shrunk_precision(&ss.dot(&tau1), nn);
        let tau1_new = shrunk_precision(&ss.t().dot(&tau0_new), mm);

        let scale = tau0_new.mean().unwrap_or(1.0);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ParamError::numeric(format!(
                "row precisions average to {}",
                scale
            )));
        }

        let mut ret = Params::new();
        ret.insert("tau0".into(), (tau0_new / scale).into_dyn());
        ret.insert("tau1".into(), (tau1_new * scale).into_dyn());
        Ok(ret)
    }
}

impl Distribution for CenNormalRankOne {
    fn info(&self) -> &'static FamilyInfo {
        &CEN_NORMAL_RANK_ONE_INFO
    }

    fn core(&self) -> &DistributionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DistributionCore {
        &mut self.core
    }

    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }
}

impl Family for CenNormalRankOne {
    fn family_info() -> &'static FamilyInfo {
        &CEN_NORMAL_RANK_ONE_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(CenNormalRankOneAlgorithms)
    }

    /// `tau0` and `tau1` drawn from `U(0,1)`, excluding both ends
    fn initializers(
        shape: &[usize],
        latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        if shape.len() != 2 || !latent_shape.is_empty() {
            return Err(ParamError::shape(format!(
                "rank-one precision needs a matrix event shape without latent dimensions, got {:?} + {:?}",
                latent_shape, shape
            )));
        }
        let mut ret = Params::new();
        ret.insert("tau0".into(), ArrayD::<f32>::runif(IxDyn(&shape[..1]), rng));
        ret.insert("tau1".into(), ArrayD::<f32>::runif(IxDyn(&shape[1..]), rng));
        Ok(ret)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }

    fn from_params(
        properties: Properties,
        shape: &[usize],
        latent_shape: &[usize],
        params: Params,
    ) -> anyhow::Result<Self> {
        if shape.len() != 2 {
            return Err(ParamError::shape(format!(
                "rank-one precision needs a matrix event shape, got {:?}",
                shape
            )));
        }
        let table = ParamTable::new(&RANK_ONE_SLOTS, shape, latent_shape, params)?;
        Ok(Self::from_core(DistributionCore {
            properties,
            table,
            algorithms: Self::default_algorithms(),
        }))
    }
}
