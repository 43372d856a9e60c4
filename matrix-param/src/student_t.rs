//! Student-t as a scale mixture of Normals.
//!
//! ```text
//! tau ~ Gamma(nu/2, rate = nu/2)
//! x | tau ~ N(mu, Psi / tau)
//! ```
//!
//! `tau` is a latent slot of shape `latent_shape + shape`; `mu`, `Psi`
//! and `nu` are global. Given `tau` the variable is Normal with
//! precision `tau / Psi`, which is what `cond()` returns.

use crate::error::ParamError;
use crate::normal::{evidence, gaussian_sample, Normal};
use crate::param_table::*;
use crate::properties::Properties;
use crate::traits::*;
use log::debug;
use matrix_util::traits::{BroadcastOps, SampleOps};
use ndarray::prelude::*;
use ndarray::{IxDyn, Zip};
use rand::{Rng, RngCore};
use rand_distr::Gamma;
use special::Gamma as SpecialGamma;
use std::sync::Arc;

const NU_MIN: f64 = 1e-3;
const NU_MAX: f64 = 1e3;
const NU_BISECTION_STEPS: usize = 60;

static T_SLOTS: [SlotSpec; 4] = [
    SlotSpec::new("mu", SlotRule::Event, SlotCheck::Finite),
    SlotSpec::new("Psi", SlotRule::Event, SlotCheck::Positive),
    SlotSpec::new("nu", SlotRule::Event, SlotCheck::Positive),
    SlotSpec::new("tau", SlotRule::Latent, SlotCheck::Positive),
];

static CEN_T_SLOTS: [SlotSpec; 3] = [
    SlotSpec::new("Psi", SlotRule::Event, SlotCheck::Positive),
    SlotSpec::new("nu", SlotRule::Event, SlotCheck::Positive),
    SlotSpec::new("tau", SlotRule::Latent, SlotCheck::Positive),
];

pub static T_INFO: FamilyInfo = FamilyInfo {
    name: "T",
    non_negative: false,
    homogenous: false,
    slots: &T_SLOTS,
};

pub static CEN_T_INFO: FamilyInfo = FamilyInfo {
    name: "CenT",
    non_negative: false,
    homogenous: false,
    slots: &CEN_T_SLOTS,
};

/// Student-t with location `mu`, scale `Psi`, degrees of freedom `nu`
/// and latent precision scales `tau`
#[derive(Clone, Debug)]
pub struct T {
    core: DistributionCore,
}

/// Student-t centered at zero
#[derive(Clone, Debug)]
pub struct CenT {
    core: DistributionCore,
}

/// Expanded parameters of either T or CenT over a common shape
struct TParams {
    mu: ArrayD<f32>,
    psi: ArrayD<f32>,
    nu: ArrayD<f32>,
}

impl TParams {
    fn expand(params: &ParamTable, target: &[usize]) -> anyhow::Result<Self> {
        let mu = if params.contains("mu") {
            params.expand("mu", target)?
        } else {
            ArrayD::zeros(IxDyn(target))
        };
        Ok(Self {
            mu,
            psi: params.expand("Psi", target)?,
            nu: params.expand("nu", target)?,
        })
    }
}

/// E-step weights `E[tau | x] = (nu + 1) / (nu + (x - mu)^2 / Psi)`
fn expected_tau(x: &ArrayD<f32>, tp: &TParams) -> ArrayD<f32> {
    Zip::from(x)
        .and(&tp.mu)
        .and(&tp.psi)
        .and(&tp.nu)
        .map_collect(|&x, &m, &p, &n| (n + 1.0) / (n + (x - m) * (x - m) / p))
}

/// Solve for the degrees of freedom given the mean of
/// `log E[tau] - E[tau]` and the previous `nu`.
///
/// The root of
/// `log(nu/2) - digamma(nu/2) + 1 + avg + digamma((nu0+1)/2) - log((nu0+1)/2)`
/// is bracketed in `[NU_MIN, NU_MAX]` and found by bisection on the log
/// scale; it is clamped to the bracket when there is no sign change.
pub fn solve_nu(avg_log_w_minus_w: f32, nu_old: f32) -> f32 {
    let a = (nu_old as f64 + 1.0) / 2.0;
    let c = 1.0 + avg_log_w_minus_w as f64 + a.digamma() - a.ln();
    let h = |nu: f64| (nu / 2.0).ln() - (nu / 2.0).digamma() + c;

    // h decreases in nu
    if h(NU_MIN) <= 0.0 {
        debug!("degrees of freedom clamped to {}", NU_MIN);
        return NU_MIN as f32;
    }
    if h(NU_MAX) >= 0.0 {
        debug!("degrees of freedom clamped to {}", NU_MAX);
        return NU_MAX as f32;
    }

    let (mut lo, mut hi) = (NU_MIN.ln(), NU_MAX.ln());
    for _ in 0..NU_BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if h(mid.exp()) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (0.5 * (lo + hi)).exp() as f32
}

/// Log-density of the marginal Student-t
fn t_llh(x: f32, mu: f32, psi: f32, nu: f32) -> f32 {
    let (x, mu, psi, nu) = (x as f64, mu as f64, psi as f64, nu as f64);
    let d2 = (x - mu) * (x - mu) / psi;
    let ret = SpecialGamma::ln_gamma((nu + 1.0) / 2.0).0
        - SpecialGamma::ln_gamma(nu / 2.0).0
        - 0.5 * (nu * std::f64::consts::PI * psi).ln()
        - 0.5 * (nu + 1.0) * (d2 / nu).ln_1p();
    ret as f32
}

/// Expectation-conditional maximisation for T and CenT. One call to
/// `fit` makes one ECM step: latent weights, then location and scale,
/// then the degrees of freedom, then the latent weights again under
/// the new parameters.
#[derive(Debug, Default)]
pub struct TAlgorithms;

/// Same as [`TAlgorithms`] but the degrees of freedom stay put
#[derive(Debug, Default)]
pub struct TFixedNuAlgorithms;

fn t_sample(params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
    let full = params.full_shape();
    let tp = TParams::expand(params, &full)?;

    let mut tau = ArrayD::<f32>::zeros(IxDyn(&full));
    for (t, &nu) in tau.iter_mut().zip(tp.nu.iter()) {
        let pdf = Gamma::new(nu / 2.0, 2.0 / nu)
            .map_err(|e| ParamError::numeric(format!("gamma({}, {}): {:?}", nu / 2.0, 2.0 / nu, e)))?;
        *t = rng.sample(pdf);
    }
    let prec = (&tau / &tp.psi).mapv(|p| p.max(f32::MIN_POSITIVE));
    Ok(gaussian_sample(&tp.mu, &prec, rng))
}

fn t_mode(params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
    let full = params.full_shape();
    Ok(TParams::expand(params, &full)?.mu)
}

fn t_log_density(params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
    let (target, x) = evidence(params, value)?;
    let tp = TParams::expand(params, &target)?;
    Ok(Zip::from(&x)
        .and(&tp.mu)
        .and(&tp.psi)
        .and(&tp.nu)
        .map_collect(|&x, &m, &p, &n| t_llh(x, m, p, n)))
}

fn t_fit(params: &ParamTable, data: &ArrayD<f32>, fit_nu: bool) -> anyhow::Result<Params> {
    let (target, x) = evidence(params, data)?;
    let tp = TParams::expand(params, &target)?;
    let ww = expected_tau(&x, &tp);

    let mut ret = Params::new();

    let mu_new = if params.contains("mu") {
        let shape = params.get("mu")?.shape().to_vec();
        let num = (&ww * &x).sum_to_shape(&shape)?;
        let denom = ww.sum_to_shape(&shape)?;
        let mu = num / denom;
        ret.insert("mu".into(), mu.clone());
        mu.broadcast_to(&target)?
    } else {
        ArrayD::zeros(IxDyn(&target))
    };

    let dev = &x - &mu_new;
    let psi_new = (&ww * &dev * &dev).mean_to_shape(params.get("Psi")?.shape())?;
    ret.insert("Psi".into(), psi_new.clone());

    let nu_shape = params.get("nu")?.shape().to_vec();
    let nu_new = if fit_nu {
        let avg = ww.mapv(|w| w.ln() - w).mean_to_shape(&nu_shape)?;
        let nu_old = params.get("nu")?;
        Zip::from(&avg)
            .and(nu_old)
            .map_collect(|&a, &n| solve_nu(a, n))
    } else {
        params.get("nu")?.clone()
    };
    ret.insert("nu".into(), nu_new.clone());

    let tp_new = TParams {
        mu: mu_new,
        psi: psi_new.broadcast_to(&target)?,
        nu: nu_new.broadcast_to(&target)?,
    };
    let tau = expected_tau(&x, &tp_new).mean_to_shape(params.get("tau")?.shape())?;
    check_finite("latent scale update", &tau)?;
    ret.insert("tau".into(), tau);

    Ok(ret)
}

fn t_fit_latents(params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
    let (target, x) = evidence(params, data)?;
    let tp = TParams::expand(params, &target)?;
    let tau = expected_tau(&x, &tp).mean_to_shape(params.get("tau")?.shape())?;
    let mut ret = Params::new();
    ret.insert("tau".into(), tau);
    Ok(ret)
}

impl Algorithms for TAlgorithms {
    fn name(&self) -> &'static str {
        "TAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        t_sample(params, rng)
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        t_mode(params)
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        t_log_density(params, value)
    }

    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        t_fit(params, data, true)
    }

    fn fit_latents(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        t_fit_latents(params, data)
    }
}

impl Algorithms for TFixedNuAlgorithms {
    fn name(&self) -> &'static str {
        "TFixedNuAlgorithms"
    }

    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        t_sample(params, rng)
    }

    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>> {
        t_mode(params)
    }

    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        t_log_density(params, value)
    }

    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        t_fit(params, data, false)
    }

    fn fit_latents(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        t_fit_latents(params, data)
    }
}

/// Normal with the location of `params` and precision `tau / Psi`
/// over `latent_shape + shape`
fn t_cond(params: &ParamTable, properties: &Properties) -> anyhow::Result<Box<dyn Distribution>> {
    let full = params.full_shape();
    let tp = TParams::expand(params, &full)?;
    let tau = params.expand("tau", &full)?;
    let prec = &tau / &tp.psi;
    let normal = Normal::new(
        cond_properties(properties, "Cond"),
        params.shape(),
        params.latent_shape(),
        tp.mu,
        prec,
    )?;
    Ok(Box::new(normal))
}

fn t_initializers(
    shape: &[usize],
    latent_shape: &[usize],
    centered: bool,
    rng: &mut dyn RngCore,
) -> anyhow::Result<Params> {
    let event = IxDyn(shape);
    let full = IxDyn(&full_shape(shape, latent_shape));
    let mut ret = Params::new();
    if !centered {
        ret.insert("mu".into(), ArrayD::<f32>::rnorm(event.clone(), rng));
    }
    ret.insert("Psi".into(), ArrayD::<f32>::rexp(event.clone(), 1.0, rng)?);
    ret.insert("nu".into(), ArrayD::<f32>::rexp(event, 1.0, rng)?);
    ret.insert("tau".into(), ArrayD::<f32>::rexp(full, 1.0, rng)?);
    Ok(ret)
}

impl Distribution for T {
    fn info(&self) -> &'static FamilyInfo {
        &T_INFO
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
        t_cond(&self.core.table, &self.core.properties)
    }
}

impl Family for T {
    fn family_info() -> &'static FamilyInfo {
        &T_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(TAlgorithms)
    }

    fn initializers(
        shape: &[usize],
        latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        t_initializers(shape, latent_shape, false, rng)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }
}

impl Distribution for CenT {
    fn info(&self) -> &'static FamilyInfo {
        &CEN_T_INFO
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
        t_cond(&self.core.table, &self.core.properties)
    }
}

impl Family for CenT {
    fn family_info() -> &'static FamilyInfo {
        &CEN_T_INFO
    }

    fn default_algorithms() -> Arc<dyn Algorithms> {
        Arc::new(TAlgorithms)
    }

    fn initializers(
        shape: &[usize],
        latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params> {
        t_initializers(shape, latent_shape, true, rng)
    }

    fn from_core(core: DistributionCore) -> Self {
        Self { core }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::param_error;
    use crate::properties::{DrawType, UpdateType};
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn t_dist(rng: &mut SmallRng) -> anyhow::Result<T> {
        let props = Properties::new("t").with_draw_type(DrawType::Mode);
        T::random(props, &[3], &[4], rng)
    }

    #[test]
    fn cond_is_normal_with_scaled_precision() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(11);
        let dist = t_dist(&mut rng)?;
        let cond = dist.cond()?;

        assert_eq!(cond.info().name, "Normal");
        // one precision per latent row
        assert!(!cond.homogenous());
        assert!(!cond.properties().persistent);
        assert_eq!(cond.properties().draw_type, DrawType::Mode);
        assert_eq!(cond.properties().update_type, dist.properties().update_type);

        let expected = dist.param("tau")? / &dist.param("Psi")?.broadcast_to(&[4, 3])?;
        assert_abs_diff_eq!(cond.param("tau")?, &expected, epsilon = 1e-6);

        let mu = dist.param("mu")?.broadcast_to(&[4, 3])?;
        assert_eq!(cond.param("mu")?, &mu);
        Ok(())
    }

    #[test]
    fn centered_cond_has_zero_mean() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(12);
        let dist = CenT::random(Properties::new("ct"), &[2], &[5], &mut rng)?;
        let cond = dist.cond()?;
        assert_eq!(cond.param("mu")?, &ArrayD::<f32>::zeros(IxDyn(&[5, 2])));
        Ok(())
    }

    #[test]
    fn cauchy_density() -> anyhow::Result<()> {
        let mut params = Params::new();
        params.insert("mu".into(), arr1(&[0.0]).into_dyn());
        params.insert("Psi".into(), arr1(&[1.0]).into_dyn());
        params.insert("nu".into(), arr1(&[1.0]).into_dyn());
        params.insert("tau".into(), arr1(&[1.0]).into_dyn());
        let dist = T::from_params(Properties::new("t"), &[1], &[], params)?;

        // nu = 1 is a standard Cauchy
        let llh = dist
            .llh(&arr1(&[0.0, 1.0]).into_dyn())?
            .into_dimensionality::<Ix1>()?;
        let ln_pi = std::f32::consts::PI.ln();
        assert_abs_diff_eq!(llh[0], -ln_pi, epsilon = 1e-5);
        assert_abs_diff_eq!(llh[1], -ln_pi - 2f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn nu_root_is_bracketed() {
        // heavy tails push nu down, light tails push it up
        let heavy = solve_nu(-3.0, 5.0);
        let light = solve_nu(-1.0001, 5.0);
        assert!(heavy < light);
        assert!((NU_MIN as f32..=NU_MAX as f32).contains(&heavy));
        assert!((NU_MIN as f32..=NU_MAX as f32).contains(&light));
    }

    #[test]
    fn ecm_step_keeps_parameters_valid() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(13);
        let mut dist = t_dist(&mut rng)?;
        let data = ArrayD::<f32>::rnorm(IxDyn(&[4, 3]), &mut rng);

        for _ in 0..5 {
            dist.update(&data)?;
        }
        for (_, v) in dist.params().iter() {
            assert!(v.iter().all(|x| x.is_finite()));
        }
        assert_eq!(dist.param("tau")?.shape(), &[4, 3]);
        Ok(())
    }

    #[test]
    fn fixed_nu_and_only_latents() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(14);
        let data = ArrayD::<f32>::rnorm(IxDyn(&[4, 3]), &mut rng);

        let mut fixed = t_dist(&mut rng)?.with_algorithms(Arc::new(TFixedNuAlgorithms));
        let nu = fixed.param("nu")?.clone();
        fixed.update(&data)?;
        assert_eq!(fixed.param("nu")?, &nu);
        assert_eq!(fixed.algorithms().name(), "TFixedNuAlgorithms");

        let props = Properties::new("t").with_update_type(UpdateType::OnlyLatents);
        let mut latent_only = T::random(props, &[3], &[4], &mut rng)?;
        let mu = latent_only.param("mu")?.clone();
        let tau = latent_only.param("tau")?.clone();
        latent_only.update(&data)?;
        assert_eq!(latent_only.param("mu")?, &mu);
        assert_ne!(latent_only.param("tau")?, &tau);
        Ok(())
    }

    #[test]
    fn incompatible_tau_is_rejected() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(15);
        let mut dist = t_dist(&mut rng)?;
        let err = dist
            .set_param("tau", ArrayD::ones(IxDyn(&[5, 3])))
            .unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));
        Ok(())
    }
}
