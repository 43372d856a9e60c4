use crate::likelihood::*;
use matrix_param::*;
use ndarray::prelude::*;
use rand::RngCore;

/// Normal noise on a matrix with a precision for every row and every
/// column, `x[i,j] ~ N(xhat[i,j], 1 / (tau0[i] * tau1[j]))`
#[derive(Clone, Debug)]
pub struct AllSpecificNormal2dLikelihood {
    m: Vec<usize>,
    k: usize,
    properties: Properties,
    noise: Option<CenNormalRankOne>,
    mask: Option<ArrayD<f32>>,
}

impl AllSpecificNormal2dLikelihood {
    /// * `m` - the two mode sizes `(M, N)`
    /// * `k` - number of components
    /// * `properties` - settings of the noise distribution
    pub fn new(m: &[usize], k: usize, properties: Properties) -> anyhow::Result<Self> {
        if m.len() != 2 {
            return Err(ParamError::shape(format!(
                "a 2-way likelihood needs two modes, got {:?}",
                m
            )));
        }
        Ok(Self {
            m: m.to_vec(),
            k,
            properties,
            noise: None,
            mask: None,
        })
    }

    pub fn with_default_properties(m: &[usize], k: usize) -> anyhow::Result<Self> {
        Self::new(m, k, Properties::new("likelihood"))
    }

    fn precision_vector(&self, name: &str) -> anyhow::Result<Array1<f32>> {
        Ok(self
            .noise_distribution()?
            .param(name)?
            .view()
            .into_dimensionality::<Ix1>()?
            .to_owned())
    }
}

impl Likelihood for AllSpecificNormal2dLikelihood {
    fn name(&self) -> &'static str {
        "AllSpecificNormal2dLikelihood"
    }

    fn m(&self) -> &[usize] {
        &self.m
    }

    fn k(&self) -> usize {
        self.k
    }

    /// `tau0` and `tau1` start from `U(0,1)`
    fn init(&mut self, data: &ArrayD<f32>, rng: &mut dyn RngCore) -> anyhow::Result<()> {
        if self.noise.is_some() {
            return Err(ParamError::state(format!("{} is already initialized", self.id())));
        }
        if data.shape() != self.m.as_slice() {
            return Err(ParamError::shape(format!(
                "data of shape {:?}, expected {:?}",
                data.shape(),
                self.m
            )));
        }
        let noise = CenNormalRankOne::random(self.properties.clone(), &self.m, &[], rng)?;
        self.noise = Some(noise);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.noise.is_some()
    }

    fn noise_distribution(&self) -> anyhow::Result<&dyn Distribution> {
        match self.noise.as_ref() {
            Some(noise) => Ok(noise),
            None => Err(ParamError::state("the noise distribution needs `init`")),
        }
    }

    fn noise_distribution_mut(&mut self) -> anyhow::Result<&mut dyn Distribution> {
        match self.noise.as_mut() {
            Some(noise) => Ok(noise),
            None => Err(ParamError::state("the noise distribution needs `init`")),
        }
    }

    fn precision(&self) -> anyhow::Result<ArrayD<f32>> {
        let params = self.noise_distribution()?.params();
        Ok(params.expand("tau0", &self.m)? * params.expand("tau1", &self.m)?)
    }

    fn mask(&self) -> Option<&ArrayD<f32>> {
        self.mask.as_ref()
    }

    fn set_mask(&mut self, mask: Option<ArrayD<f32>>) -> anyhow::Result<()> {
        if let Some(mask) = mask.as_ref() {
            check_mask(&self.m, mask)?;
        }
        self.mask = mask;
        Ok(())
    }

    /// For `f = 0`, with `V = U1`, `a = X (V' * tau1)`, `b = (V * tau1) V'`
    /// and `alpha = tau0`. For `f = 1` the same with `X'`, `V = U0` and
    /// the roles of `tau0` and `tau1` swapped. Held-out entries drop
    /// out of both sums, which makes `b` row specific.
    fn prep_vars(&self, f: usize, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<SuffStats> {
        self.check_ready()?;
        self.check_args(u, x)?;

        let tau0 = self.precision_vector("tau0")?;
        let tau1 = self.precision_vector("tau1")?;
        let xx = x.view().into_dimensionality::<Ix2>()?;
        let mask = match self.mask.as_ref() {
            Some(mask) => Some(mask.view().into_dimensionality::<Ix2>()?),
            None => None,
        };

        let (other, alpha_other, alpha, xx, mask) = match f {
            0 => (&u[1], tau1, tau0, xx, mask),
            1 => (
                &u[0],
                tau0,
                tau1,
                xx.reversed_axes(),
                mask.map(|w| w.reversed_axes()),
            ),
            _ => {
                return Err(ParamError::shape(format!(
                    "mode {} out of range for a 2-way likelihood",
                    f
                )))
            }
        };

        let weighted = other * &alpha_other.insert_axis(Axis(0));
        let a = match mask.as_ref() {
            Some(w) => (&xx * w).dot(&weighted.t()),
            None => xx.dot(&weighted.t()),
        };
        let b = gram(&weighted, other, mask);

        Ok(SuffStats { a, b, alpha })
    }
}
