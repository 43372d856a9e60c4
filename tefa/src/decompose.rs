use crate::tensor_factorisation::*;
use matrix_param::ParamError;
use ndarray::prelude::*;

/// Fit/transform front end of [`TensorFactorisation`]
#[derive(Debug)]
pub struct Decompose {
    options: FactorisationOptions,
    model: Option<TensorFactorisation>,
    variance_ratio: Option<Array1<f32>>,
}

impl Decompose {
    pub fn new(options: FactorisationOptions) -> Self {
        Self {
            options,
            model: None,
            variance_ratio: None,
        }
    }

    /// Rebuild a fitted model; the variance ratio is not part of a
    /// checkpoint
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> anyhow::Result<Self> {
        Ok(Self {
            options: checkpoint.options.clone(),
            model: Some(TensorFactorisation::from_checkpoint(checkpoint)?),
            variance_ratio: None,
        })
    }

    /// Fit a fresh model to `x`
    pub fn fit(&mut self, x: &ArrayD<f32>) -> anyhow::Result<&mut Self> {
        let mut model = TensorFactorisation::new(x.shape(), self.options.clone())?;
        model.fit(x)?;
        self.variance_ratio = Some(model.explained_variance_ratio(x)?);
        self.model = Some(model);
        Ok(self)
    }

    /// Fit and return `U[0]`
    pub fn fit_transform(&mut self, x: &ArrayD<f32>) -> anyhow::Result<Array2<f32>> {
        self.fit(x)?;
        Ok(self.model()?.factors()[0].clone())
    }

    /// `U[0]` of new data under the fitted factors of the other modes
    pub fn transform(&self, x: &ArrayD<f32>) -> anyhow::Result<Array2<f32>> {
        self.model()?.transform(x)
    }

    /// Fitted `U[1..F]`
    pub fn components(&self) -> anyhow::Result<Vec<Array2<f32>>> {
        Ok(self.model()?.factors()[1..].to_vec())
    }

    /// Explained variance ratio of each component on the training data
    pub fn variance_ratio(&self) -> anyhow::Result<&Array1<f32>> {
        self.variance_ratio
            .as_ref()
            .ok_or_else(|| ParamError::state("no variance ratio; call `fit` first"))
    }

    /// Entries the fit used (one) and held out (zero); `None` when
    /// every entry was used
    pub fn mask(&self) -> anyhow::Result<Option<&ArrayD<f32>>> {
        Ok(self.model()?.mask())
    }

    /// Every persistent parameter of the fitted model
    pub fn parameters(&self) -> anyhow::Result<Checkpoint> {
        self.model()?.checkpoint()
    }

    pub fn model(&self) -> anyhow::Result<&TensorFactorisation> {
        self.model
            .as_ref()
            .ok_or_else(|| ParamError::state("the model is not fitted; call `fit` first"))
    }
}
