use crate::normal::evidence;
use crate::param_table::*;
use crate::properties::Properties;
use crate::traits::*;
use matrix_util::traits::{BroadcastOps, SampleOps};
use ndarray::prelude::*;
use ndarray::{IxDyn, Zip};
use rand::RngCore;
use std::sync::Arc;

static EXPONENTIAL_SLOTS: [SlotSpec; 1] =
    [SlotSpec::new("beta", SlotRule::Event, SlotCheck::Positive)];

pub static EXPONENTIAL_INFO: FamilyInfo = FamilyInfo {
    name: "Exponential",
    non_negative: true,
    homogenous: true,
    slots: &EXPONENTIAL_SLOTS,
};

/// Exponential with scale `beta`
///
/// $$f(x|\beta) = \beta^{-1} e^{-x/\beta}, \quad x \ge 0$$
#[derive(Clone, Debug)]
pub struct Exponential {
    core: DistributionCore,
}

#[derive(Debug, Default)]
pub struct ExponentialAlgorithms;

impl Algorithms for ExponentialAlgorithms {
    fn name(&self) -> &'static str {
        "ExponentialAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        let full = params.full_shape();
        let beta = params.expand("beta", &full)?;
        Ok(ArrayD::<f32>::rexp(IxDyn(&full), 1.0, rng)? * &beta)
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&params.full_shape())))
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let (target, x) = evidence(params, value)?;
        let beta = params.expand("beta", &target)?;
        Ok(Zip::from(&x).and(&beta).map_collect(|&x, &b| {
            if x >= 0.0 {
                -b.ln() - x / b
            } else {
                f32::NEG_INFINITY
            }
        }))
    }

    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let (_, x) = evidence(params, data)?;
        let beta = x.mean_to_shape(params.get("beta")?.shape())?;
        let mut ret = Params::new();
        ret.insert("beta".into(), beta);
        Ok(ret)
    }
}

impl Distribution for Exponential {
    fn info(&self) -> &'static FamilyInfo {
        &EXPONENTIAL_INFO
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

    /// `-1 / beta`
    fn linear_term(&self) -> anyhow::Result<ArrayD<f32>> {
        let table = &self.core.table;
        Ok(table.expand("beta", &table.full_shape())?.mapv(|b| -b.recip()))
    }
}

impl Family for Exponential {
    fn family_info() -> &'static FamilyInfo {
        &EXPONENTIAL_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(ExponentialAlgorithms)
    }

    /// Parameters of the event shape, shared by every latent slice
    fn initializers(
        shape: &[usize],
        _latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        let mut ret = Params::new();
        ret.insert("beta".into(), ArrayD::<f32>::rexp(IxDyn(shape), 1.0, rng)?);
        Ok(ret)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }
}

impl Exponential {
    pub fn new(properties: Properties, shape: &[usize], beta: ArrayD<f32>) -> anyhow::Result<Self> {
        let mut params = Params::new();
        params.insert("beta".into(), beta);
        Self::from_params(properties, shape, &[], params)
    }
}
