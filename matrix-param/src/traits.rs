use crate::error::ParamError;
use crate::param_table::{ParamTable, Params, SlotSpec};
use crate::properties::*;
use ndarray::prelude::*;
use rand::RngCore;
use std::fmt::Debug;
use std::sync::Arc;

/// Static capability descriptor of a distribution family, queried
/// without an instance
#[derive(Debug)]
pub struct FamilyInfo {
    pub name: &'static str,
    /// support is the non-negative half line
    pub non_negative: bool,
    /// every latent slice may share the same parameters
    pub homogenous: bool,
    pub slots: &'static [SlotSpec],
}

/// Numeric routines of a family. Stateless; a distribution holds one
/// behind an `Arc` so that two instances of the same family may run
/// different algorithms.
pub trait Algorithms: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// A random draw of shape `latent_shape + shape`
    fn sample(&self, params: &ParamTable, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>>;

    /// The deterministic point estimate of shape `latent_shape + shape`
    fn mode(&self, params: &ParamTable) -> anyhow::Result<ArrayD<f32>>;

    /// Elementwise log-likelihood of `value`
    fn llh(&self, params: &ParamTable, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>>;

    /// Refit every parameter from `data`
    fn fit(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let _ = (params, data);
        Err(ParamError::unsupported(format!(
            "{} cannot fit parameters",
            self.name()
        )))
    }

    /// Refit only the latent slots from `data`
    fn fit_latents(&self, params: &ParamTable, data: &ArrayD<f32>) -> anyhow::Result<Params> {
        let _ = (params, data);
        Ok(Params::new())
    }
}

/// Bookkeeping shared by every family
#[derive(Clone, Debug)]
pub struct DistributionCore {
    pub properties: Properties,
    pub table: ParamTable,
    pub algorithms: Arc<dyn Algorithms>,
}

/// A parameterized distribution over a tensor-shaped variable
pub trait Distribution: Debug + Send + Sync {
    fn info(&self) -> &'static FamilyInfo;

    fn core(&self) -> &DistributionCore;

    fn core_mut(&mut self) -> &mut DistributionCore;

    fn clone_box(&self) -> Box<dyn Distribution>;

    /// Conditional distribution of this variable given its current
    /// parameters. The result is a throwaway (`persistent = false`)
    /// and inherits the draw and update types.
    fn cond(&self) -> anyhow::Result<Box<dyn Distribution>> {
        Err(ParamError::unsupported(format!(
            "{} has no closed-form conditional",
            self.info().name
        )))
    }

    /// Coefficient `eta` of a log-density that is linear on the
    /// support, `log f(x) = eta * x + const`, over
    /// `latent_shape + shape`
    fn linear_term(&self) -> anyhow::Result<ArrayD<f32>> {
        Err(ParamError::unsupported(format!(
            "{} has no log-linear density",
            self.info().name
        )))
    }

    fn name(&self) -> &str {
        &self.core().properties.name
    }

    fn properties(&self) -> &Properties {
        &self.core().properties
    }

    fn non_negative(&self) -> bool {
        self.info().non_negative
    }

    /// Every latent slice has the same parameters
    fn homogenous(&self) -> bool {
        self.info().homogenous && !self.core().table.varies_over_latents()
    }

    fn shape(&self) -> &[usize] {
        self.core().table.shape()
    }

    fn latent_shape(&self) -> &[usize] {
        self.core().table.latent_shape()
    }

    fn params(&self) -> &ParamTable {
        &self.core().table
    }

    fn param(&self, name: &str) -> anyhow::Result<&ArrayD<f32>> {
        self.core().table.get(name)
    }

    fn set_param(&mut self, name: &str, value: ArrayD<f32>) -> anyhow::Result<()> {
        self.core_mut().table.set(name, value)
    }

    fn algorithms(&self) -> &Arc<dyn Algorithms> {
        &self.core().algorithms
    }

    fn set_algorithms(&mut self, algorithms: Arc<dyn Algorithms>) {
        self.core_mut().algorithms = algorithms;
    }

    fn llh(&self, value: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let core = self.core();
        core.algorithms.llh(&core.table, value)
    }

    fn sample(&self, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        let core = self.core();
        core.algorithms.sample(&core.table, rng)
    }

    fn mode(&self) -> anyhow::Result<ArrayD<f32>> {
        let core = self.core();
        core.algorithms.mode(&core.table)
    }

    /// Sample or mode, whichever the draw type asks for
    fn draw(&self, rng: &mut dyn RngCore) -> anyhow::Result<ArrayD<f32>> {
        match self.properties().draw_type {
            DrawType::Sample => self.sample(rng),
            DrawType::Mode => self.mode(),
        }
    }

    /// Refit the parameters the update type allows from `data`. The
    /// new values are validated together and committed at once.
    fn update(&mut self, data: &ArrayD<f32>) -> anyhow::Result<()> {
        let updates = {
            let core = self.core();
            match core.properties.update_type {
                UpdateType::Nothing => return Ok(()),
                UpdateType::OnlyLatents => core.algorithms.fit_latents(&core.table, data)?,
                UpdateType::All => core.algorithms.fit(&core.table, data)?,
            }
        };
        self.core_mut().table.replace(updates)
    }
}

impl Clone for Box<dyn Distribution> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Construction of a concrete family
pub trait Family: Distribution + Sized + 'static {
    fn family_info() -> &'static FamilyInfo;

    fn default_algorithms() -> Arc<dyn Algorithms>;

    /// Random initial parameters, each slot drawn from a default
    /// distribution of the family
    fn initializers(
        shape: &[usize],
        latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Params>;

    fn from_core(core: DistributionCore) -> Self;

    fn from_params(
        properties: Properties,
        shape: &[usize],
        latent_shape: &[usize],
        params: Params,
    ) -> anyhow::Result<Self> {
        let table = ParamTable::new(Self::family_info().slots, shape, latent_shape, params)?;
        Ok(Self::from_core(DistributionCore {
            properties,
            table,
            algorithms: Self::default_algorithms(),
        }))
    }

    fn random(
        properties: Properties,
        shape: &[usize],
        latent_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Self> {
        let params = Self::initializers(shape, latent_shape, rng)?;
        Self::from_params(properties, shape, latent_shape, params)
    }

    fn with_algorithms(mut self, algorithms: Arc<dyn Algorithms>) -> Self {
        self.set_algorithms(algorithms);
        self
    }
}

/// Copy of `source` as a throwaway conditional
pub(crate) fn cond_properties(source: &Properties, suffix: &str) -> Properties {
    Properties {
        name: format!("{}{}", source.name, suffix),
        persistent: false,
        ..source.clone()
    }
}

/// `latent_shape + shape`
pub(crate) fn full_shape(shape: &[usize], latent_shape: &[usize]) -> Vec<usize> {
    latent_shape.iter().chain(shape.iter()).cloned().collect()
}

/// Check that every element of a freshly computed array is finite
pub(crate) fn check_finite(what: &str, x: &ArrayD<f32>) -> anyhow::Result<()> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ParamError::numeric(format!("{} produced non-finite values", what)))
    }
}
