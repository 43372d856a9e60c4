use crate::error::ParamError;
use matrix_util::ndarray_util::is_broadcast_compatible;
use matrix_util::traits::BroadcastOps;
use ndarray::prelude::*;
use ndarray::IxDyn;
use std::collections::BTreeMap;

/// Parameter tensors keyed by name
pub type Params = BTreeMap<String, ArrayD<f32>>;

/// Which shape a slot must broadcast to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRule {
    /// global parameter, broadcast-compatible with `latent_shape + shape`
    Event,
    /// per-observation latent parameter, broadcast-compatible with
    /// `latent_shape + shape`; the only slots refit by
    /// `UpdateType::OnlyLatents`
    Latent,
    /// a vector as long as one axis of the event shape
    Axis(usize),
}

/// Value check run on every write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotCheck {
    Finite,
    Positive,
}

#[derive(Clone, Copy, Debug)]
pub struct SlotSpec {
    pub name: &'static str,
    pub rule: SlotRule,
    pub check: SlotCheck,
}

impl SlotSpec {
    pub const fn new(name: &'static str, rule: SlotRule, check: SlotCheck) -> Self {
        Self { name, rule, check }
    }

    pub fn is_latent(&self) -> bool {
        self.rule == SlotRule::Latent
    }
}

/// Named parameter slots with a validate-on-write contract. Every
/// stored tensor satisfies its slot's shape rule and value check;
/// the table is never left half-updated.
#[derive(Clone, Debug)]
pub struct ParamTable {
    shape: Vec<usize>,
    latent_shape: Vec<usize>,
    specs: &'static [SlotSpec],
    values: BTreeMap<&'static str, ArrayD<f32>>,
}

impl ParamTable {
    /// Build a table from a complete set of parameters
    ///
    /// * `specs` - slot table of the family
    /// * `shape` - event shape
    /// * `latent_shape` - leading replication dimensions
    /// * `params` - one tensor per slot, no more, no less
    pub fn new(
        specs: &'static [SlotSpec],
        shape: &[usize],
        latent_shape: &[usize],
        mut params: Params,
    ) -> anyhow::Result<Self> {
        let mut ret = Self {
            shape: shape.to_vec(),
            latent_shape: latent_shape.to_vec(),
            specs,
            values: BTreeMap::new(),
        };

        for spec in specs {
            let value = params
                .remove(spec.name)
                .ok_or_else(|| ParamError::shape(format!("missing parameter `{}`", spec.name)))?;
            ret.validate(spec, &value)?;
            ret.values.insert(spec.name, value);
        }

        if let Some(name) = params.keys().next() {
            return Err(ParamError::shape(format!("unknown parameter `{}`", name)));
        }

        Ok(ret)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn latent_shape(&self) -> &[usize] {
        &self.latent_shape
    }

    /// `latent_shape + shape`
    pub fn full_shape(&self) -> Vec<usize> {
        self.latent_shape
            .iter()
            .chain(self.shape.iter())
            .cloned()
            .collect()
    }

    pub fn specs(&self) -> &'static [SlotSpec] {
        self.specs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> anyhow::Result<&ArrayD<f32>> {
        self.values
            .get(name)
            .ok_or_else(|| ParamError::shape(format!("no parameter `{}`", name)))
    }

    /// Stable enumeration of every slot, in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().cloned()
    }

    pub fn to_params(&self) -> Params {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Overwrite one slot after validating the new value
    pub fn set(&mut self, name: &str, value: ArrayD<f32>) -> anyhow::Result<()> {
        let spec = self.spec(name)?;
        self.validate(&spec, &value)?;
        self.values.insert(spec.name, value);
        Ok(())
    }

    /// Overwrite several slots at once. Nothing is written unless every
    /// value passes validation.
    pub fn replace(&mut self, updates: Params) -> anyhow::Result<()> {
        let mut checked = Vec::with_capacity(updates.len());
        for (name, value) in updates {
            let spec = self.spec(&name)?;
            self.validate(&spec, &value)?;
            checked.push((spec.name, value));
        }
        for (name, value) in checked {
            self.values.insert(name, value);
        }
        Ok(())
    }

    /// Materialize a slot at `target` shape. Axis slots are laid along
    /// their axis of the event shape (right-aligned in `target`).
    pub fn expand(&self, name: &str, target: &[usize]) -> anyhow::Result<ArrayD<f32>> {
        let spec = self.spec(name)?;
        let value = self.get(name)?;

        let value = match spec.rule {
            SlotRule::Axis(a) => {
                let mut dims = vec![1; self.shape.len()];
                dims[a] = value.len();
                value
                    .clone()
                    .into_shape_with_order(IxDyn(&dims))
                    .map_err(|e| ParamError::shape(e.to_string()))?
            }
            _ => value.clone(),
        };

        value
            .broadcast_to(target)
            .map_err(|e| ParamError::shape(format!("`{}`: {}", name, e)))
    }

    /// Does any slot carry separate values along the latent dimensions?
    pub fn varies_over_latents(&self) -> bool {
        let nevent = self.shape.len();
        self.specs
            .iter()
            .filter(|spec| !matches!(spec.rule, SlotRule::Axis(_)))
            .filter_map(|spec| self.values.get(spec.name))
            .any(|v| v.ndim() > nevent && v.shape()[..(v.ndim() - nevent)].iter().any(|&d| d > 1))
    }

    /// Shape of the result of combining `data` with the parameters
    pub fn broadcast_with(&self, data_shape: &[usize]) -> anyhow::Result<Vec<usize>> {
        matrix_util::ndarray_util::broadcast_shapes(data_shape, &self.full_shape())
            .map_err(|e| ParamError::shape(e.to_string()))
    }

    fn spec(&self, name: &str) -> anyhow::Result<SlotSpec> {
        self.specs
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ParamError::shape(format!("no parameter `{}`", name)))
    }

    fn validate(&self, spec: &SlotSpec, value: &ArrayD<f32>) -> anyhow::Result<()> {
        let shape_ok = match spec.rule {
            SlotRule::Event | SlotRule::Latent => {
                is_broadcast_compatible(value.shape(), &self.full_shape())
            }
            SlotRule::Axis(a) => a < self.shape.len() && value.shape() == [self.shape[a]],
        };

        if !shape_ok {
            return Err(ParamError::shape(format!(
                "`{}` of shape {:?} does not fit latent {:?} + event {:?}",
                spec.name,
                value.shape(),
                self.latent_shape,
                self.shape
            )));
        }

        let value_ok = match spec.check {
            SlotCheck::Finite => value.iter().all(|x| x.is_finite()),
            SlotCheck::Positive => value.iter().all(|&x| x.is_finite() && x > 0.0),
        };

        if !value_ok {
            return Err(ParamError::numeric(format!(
                "`{}` must be {}",
                spec.name,
                match spec.check {
                    SlotCheck::Finite => "finite",
                    SlotCheck::Positive => "finite and positive",
                }
            )));
        }

        Ok(())
    }
}
