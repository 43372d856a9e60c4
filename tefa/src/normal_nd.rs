use crate::likelihood::*;
use matrix_param::*;
use matrix_util::tensor_util::{khatri_rao_rows, unfold};
use ndarray::prelude::*;
use rand::RngCore;

/// Homoscedastic Normal noise on an array of any order `F >= 2`,
/// one precision shared by every entry
#[derive(Clone, Debug)]
pub struct NormalNdLikelihood {
    m: Vec<usize>,
    k: usize,
    tau: f32,
    properties: Properties,
    noise: Option<CenNormal>,
    mask: Option<ArrayD<f32>>,
}

impl NormalNdLikelihood {
    /// * `m` - mode sizes
    /// * `k` - number of components
    /// * `tau` - initial noise precision
    /// * `properties` - settings of the noise distribution
    pub fn new(m: &[usize], k: usize, tau: f32, properties: Properties) -> anyhow::Result<Self> {
        if m.len() < 2 {
            return Err(ParamError::shape(format!(
                "need at least two modes, got {:?}",
                m
            )));
        }
        if !(tau.is_finite() && tau > 0.0) {
            return Err(ParamError::numeric(format!("noise precision {}", tau)));
        }
        Ok(Self {
            m: m.to_vec(),
            k,
            tau,
            properties,
            noise: None,
            mask: None,
        })
    }

    /// Current shared precision
    pub fn tau(&self) -> anyhow::Result<f32> {
        let tau = self.noise_distribution()?.param("tau")?;
        tau.iter()
            .next()
            .cloned()
            .ok_or_else(|| ParamError::shape("empty noise precision"))
    }
}

impl Likelihood for NormalNdLikelihood {
    fn name(&self) -> &'static str {
        "NormalNdLikelihood"
    }

    fn m(&self) -> &[usize] {
        &self.m
    }

    fn k(&self) -> usize {
        self.k
    }

    fn init(&mut self, data: &ArrayD<f32>, _rng: &mut dyn RngCore) -> anyhow::Result<()> {
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
        let tau = ArrayD::from_elem(IxDyn(&[1]), self.tau);
        self.noise = Some(CenNormal::new(self.properties.clone(), &self.m, &[], tau)?);
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
        self.noise_distribution()?.params().expand("tau", &self.m)
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

    /// `a = X_(f) W'` and `b = W W'` where `W` are the Khatri-Rao rows
    /// of the other factors; `alpha = tau` on every row. Held-out
    /// entries drop out of both sums.
    fn prep_vars(&self, f: usize, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<SuffStats> {
        self.check_ready()?;
        self.check_args(u, x)?;

        if f >= self.f() {
            return Err(ParamError::shape(format!(
                "mode {} out of range for a {}-way likelihood",
                f,
                self.f()
            )));
        }

        let others: Vec<&Array2<f32>> = u
            .iter()
            .enumerate()
            .filter(|&(g, _)| g != f)
            .map(|(_, ug)| ug)
            .collect();

        let ww = khatri_rao_rows(&others)?;
        let xf = unfold(x, f)?;
        let alpha = Array1::from_elem(self.m[f], self.tau()?);

        Ok(match self.mask.as_ref() {
            Some(mask) => {
                let wf = unfold(mask, f)?;
                SuffStats {
                    a: (&xf * &wf).dot(&ww.t()),
                    b: gram(&ww, &ww, Some(wf.view())),
                    alpha,
                }
            }
            None => SuffStats {
                a: xf.dot(&ww.t()),
                b: gram(&ww, &ww, None),
                alpha,
            },
        })
    }
}
