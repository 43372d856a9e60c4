use crate::error::ParamError;
use crate::param_table::*;
use crate::properties::Properties;
use crate::traits::*;
use matrix_util::traits::{BroadcastOps, SampleOps};
use ndarray::prelude::*;
use ndarray::{IxDyn, Zip};
use rand::RngCore;
use std::sync::Arc;

const LN_2PI: f32 = 1.837_877_1;

/// `data` stretched against the parameters, with the common shape
pub(crate) fn evidence(
    params: &ParamTable,
    data: &ArrayD<f32>,
) -> anyhow::Result<(Vec<usize>, ArrayD<f32>)> {
    let target = params.broadcast_with(data.shape())?;
    let x = data
        .broadcast_to(&target)
        .map_err(|e| ParamError::shape(e.to_string()))?;
    Ok((target, x))
}

/// Gaussian log-density of `x` given location and precision
pub(crate) fn gaussian_llh(x: &ArrayD<f32>, mu: &ArrayD<f32>, tau: &ArrayD<f32>) -> ArrayD<f32> {
    Zip::from(x)
        .and(mu)
        .and(tau)
        .map_collect(|&x, &m, &t| 0.5 * (t.ln() - LN_2PI) - 0.5 * t * (x - m) * (x - m))
}

/// `mu + z / sqrt(tau)` for standard normal `z`
pub(crate) fn gaussian_sample(
    mu: &ArrayD<f32>,
    tau: &ArrayD<f32>,
    rng: &mut dyn RngCore,
) -> ArrayD<f32> {
    let z = ArrayD::<f32>::rnorm(mu.raw_dim(), rng);
    Zip::from(mu)
        .and(tau)
        .and(&z)
        .map_collect(|&m, &t, &z| m + z / t.sqrt())
}

fn reduce(what: &str, x: &ArrayD<f32>, shape: &[usize]) -> anyhow::Result<ArrayD<f32>> {
    x.mean_to_shape(shape)
        .map_err(|e| ParamError::shape(format!("{}: {}", what, e)))
}

//////////////////////
// Normal {mu, tau} //
//////////////////////

static NORMAL_SLOTS: [SlotSpec; 2] = [
    SlotSpec::new("mu", SlotRule::Event, SlotCheck::Finite),
    SlotSpec::new("tau", SlotRule::Event, SlotCheck::Positive),
];

pub static NORMAL_INFO: FamilyInfo = FamilyInfo {
    name: "Normal",
    non_negative: false,
    homogenous: true,
    slots: &NORMAL_SLOTS,
};

/// Normal with location `mu` and precision `tau`
#[derive(Clone, Debug)]
pub struct Normal {
    core: DistributionCore,
}

#[derive(Debug, Default)]
pub struct NormalAlgorithms;

impl Algorithms for NormalAlgorithms {
    fn name(&self) -> &'static str {
        "NormalAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        let full = params.full_shape();
        let mu = params.expand("mu", &full)?;
        let tau = params.expand("tau", &full)?;
        Ok(gaussian_sample(&mu, &tau, rng))
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        params.expand("mu", &params.full_shape())
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let (target, x) = evidence(params, value)?;
        let mu = params.expand("mu", &target)?;
        let tau = params.expand("tau", &target)?;
        Ok(gaussian_llh(&x, &mu, &tau))
    }

    /// Maximum likelihood: sample mean and inverse sample variance
    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let (target, x) = evidence(params, data)?;

        let mu = reduce("mu", &x, params.get("mu")?.shape())?;
        let resid = &x - &mu.broadcast_to(&target)?;
        let var = reduce("tau", &resid.mapv(|r| r * r), params.get("tau")?.shape())?;
        let tau = var.mapv(|v| 1.0 / v);

        let mut ret = Params::new();
        ret.insert("mu".into(), mu);
        ret.insert("tau".into(), tau);
        Ok(ret)
    }
}

impl Distribution for Normal {
    fn info(&self) -> &'static FamilyInfo {
        &NORMAL_INFO
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

    fn cond(&self) -> anyhow::Result<Box<dyn Distribution>> {
        let mut core = self.core.clone();
        core.properties = cond_properties(&self.core.properties, "Cond");
        Ok(Box::new(Self { core }))
    }
}

impl Family for Normal {
    fn family_info() -> &'static FamilyInfo {
        &NORMAL_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(NormalAlgorithms)
    }

    /// Parameters of the event shape, shared by every latent slice
    fn initializers(
        shape: &[usize],
        _latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        let event = IxDyn(shape);
        let mut ret = Params::new();
        ret.insert("mu".into(), ArrayD::<f32>::rnorm(event.clone(), rng));
        ret.insert("tau".into(), ArrayD::<f32>::rexp(event, 1.0, rng)?);
        Ok(ret)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }
}

impl Normal {
    /// A Normal with the given location and precision tensors
    pub fn new(
        properties: Properties,
        shape: &[usize],
        latent_shape: &[usize],
        mu: ArrayD<f32>,
        tau: ArrayD<f32>,
    ) -> anyhow::Result<Self> {
        let mut params = Params::new();
        params.insert("mu".into(), mu);
        params.insert("tau".into(), tau);
        Self::from_params(properties, shape, latent_shape, params)
    }
}

/////////////////////
// CenNormal {tau} //
/////////////////////

static CEN_NORMAL_SLOTS: [SlotSpec; 1] =
    [SlotSpec::new("tau", SlotRule::Event, SlotCheck::Positive)];

pub static CEN_NORMAL_INFO: FamilyInfo = FamilyInfo {
    name: "CenNormal",
    non_negative: false,
    homogenous: true,
    slots: &CEN_NORMAL_SLOTS,
};

/// Zero-mean Normal with precision `tau`
#[derive(Clone, Debug)]
pub struct CenNormal {
    core: DistributionCore,
}

#[derive(Debug, Default)]
pub struct CenNormalAlgorithms;

impl Algorithms for CenNormalAlgorithms {
    fn name(&self) -> &'static str {
        "CenNormalAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        let full = params.full_shape();
        let tau = params.expand("tau", &full)?;
        Ok(gaussian_sample(&ArrayD::zeros(IxDyn(&full)), &tau, rng))
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&params.full_shape())))
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let (target, x) = evidence(params, value)?;
        let tau = params.expand("tau", &target)?;
        Ok(gaussian_llh(&x, &ArrayD::zeros(IxDyn(&target)), &tau))
    }

    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let (_, x) = evidence(params, data)?;
        let var = reduce("tau", &x.mapv(|r| r * r), params.get("tau")?.shape())?;
        let mut ret = Params::new();
        ret.insert("tau".into(), var.mapv(|v| 1.0 / v));
        Ok(ret)
    }
}

impl Distribution for CenNormal {
    fn info(&self) -> &'static FamilyInfo {
        &CEN_NORMAL_INFO
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

    fn cond(&self) -> anyhow::Result<Box<dyn Distribution>> {
        let mut core = self.core.clone();
        core.properties = cond_properties(&self.core.properties, "Cond");
        Ok(Box::new(Self { core }))
    }
}

impl Family for CenNormal {
    fn family_info() -> &'static FamilyInfo {
        &CEN_NORMAL_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(CenNormalAlgorithms)
    }

    /// Parameters of the event shape, shared by every latent slice
    fn initializers(
        shape: &[usize],
        _latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        let mut ret = Params::new();
        ret.insert("tau".into(), ArrayD::<f32>::rexp(IxDyn(shape), 1.0, rng)?);
        Ok(ret)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }
}

impl CenNormal {
    pub fn new(
        properties: Properties,
        shape: &[usize],
        latent_shape: &[usize],
        tau: ArrayD<f32>,
    ) -> anyhow::Result<Self> {
        let mut params = Params::new();
        params.insert("tau".into(), tau);
        Self::from_params(properties, shape, latent_shape, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::param_error;
    use crate::properties::UpdateType;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn standard_normal_density() -> anyhow::Result<()> {
        let dist = Normal::new(
            Properties::new("x"),
            &[1],
            &[],
            arr1(&[0.0]).into_dyn(),
            arr1(&[1.0]).into_dyn(),
        )?;
        let llh = dist
            .llh(&arr1(&[0.0, 1.0]).into_dyn())?
            .into_dimensionality::<Ix1>()?;
        assert_abs_diff_eq!(llh[0], -0.918_938_5, epsilon = 1e-5);
        assert_abs_diff_eq!(llh[1], -1.418_938_5, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn fit_recovers_moments() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut dist = Normal::random(Properties::new("x"), &[2], &[], &mut rng)?;

        let data = arr2(&[[1.0, 10.0], [3.0, 10.5], [5.0, 9.5]]).into_dyn();
        dist.update(&data)?;

        assert_abs_diff_eq!(dist.param("mu")?, &arr1(&[3.0, 10.0]).into_dyn(), epsilon = 1e-5);
        let tau = dist.param("tau")?;
        assert_abs_diff_eq!(tau[0], 3.0 / 8.0, epsilon = 1e-5);
        assert_abs_diff_eq!(tau[1], 6.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn update_type_nothing_leaves_parameters() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(2);
        let props = Properties::new("x").with_update_type(UpdateType::Nothing);
        let mut dist = CenNormal::random(props, &[3], &[], &mut rng)?;
        let before = dist.param("tau")?.clone();
        dist.update(&ArrayD::ones(IxDyn(&[5, 3])))?;
        assert_eq!(dist.param("tau")?, &before);
        Ok(())
    }

    #[test]
    fn degenerate_fit_is_a_numeric_error() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut dist = CenNormal::random(Properties::new("x"), &[3], &[], &mut rng)?;
        let before = dist.param("tau")?.clone();
        let err = dist.update(&ArrayD::zeros(IxDyn(&[5, 3]))).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Numeric(_))));
        assert_eq!(dist.param("tau")?, &before);
        Ok(())
    }

    #[test]
    fn cond_is_a_throwaway_copy() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(4);
        let dist = Normal::random(Properties::new("x"), &[3], &[2], &mut rng)?;
        let cond = dist.cond()?;
        assert!(!cond.properties().persistent);
        assert_eq!(cond.properties().draw_type, dist.properties().draw_type);
        assert_eq!(cond.param("mu")?, dist.param("mu")?);

        let value = ArrayD::ones(IxDyn(&[2, 3]));
        assert_eq!(cond.llh(&value)?, dist.llh(&value)?);
        Ok(())
    }

    #[test]
    fn homogenous_only_when_latent_slices_agree() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(6);
        let shared = Normal::random(Properties::new("x"), &[3], &[4], &mut rng)?;
        assert_eq!(shared.param("mu")?.shape(), &[3]);
        assert!(shared.homogenous());

        let per_row = Normal::new(
            Properties::new("x"),
            &[3],
            &[4],
            ArrayD::<f32>::rnorm(IxDyn(&[4, 3]), &mut rng),
            ArrayD::ones(IxDyn(&[4, 3])),
        )?;
        assert!(!per_row.homogenous());

        // a singleton latent axis is still shared
        let single = CenNormal::new(Properties::new("x"), &[3], &[4], ArrayD::ones(IxDyn(&[1, 3])))?;
        assert!(single.homogenous());
        Ok(())
    }

    #[test]
    fn samples_have_the_full_shape() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(5);
        let dist = CenNormal::random(Properties::new("x"), &[3], &[4], &mut rng)?;
        assert_eq!(dist.sample(&mut rng)?.shape(), &[4, 3]);
        assert_eq!(dist.mode()?, ArrayD::<f32>::zeros(IxDyn(&[4, 3])));
        Ok(())
    }
}
