use matrix_param::*;
use matrix_util::tensor_util::contract_factors;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::RngCore;
use std::fmt::Debug;

/// Weighted Gram matrix of the other factors
#[derive(Clone, Debug)]
pub enum Gram {
    /// `K x K`, the same for every row
    Shared(Array2<f32>),
    /// `M_f x K x K`, one per row when entries are held out
    PerRow(Array3<f32>),
}

impl Gram {
    pub fn for_row(&self, m: usize) -> ArrayView2<'_, f32> {
        match self {
            Gram::Shared(b) => b.view(),
            Gram::PerRow(b) => b.index_axis(Axis(0), m),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Gram::Shared(_))
    }
}

/// Normal equations of one factor update.
///
/// Row `m` of factor `f` maximizes
/// `alpha[m] * (a[m,] u - 0.5 u' b[m] u)` plus the prior term.
#[derive(Clone, Debug)]
pub struct SuffStats {
    /// data contracted with the other factors, `M_f x K`
    pub a: Array2<f32>,
    pub b: Gram,
    /// noise precision of each row, `M_f`
    pub alpha: Array1<f32>,
}

/// `b[m] = sum_c mask[m, c] w[, c] v[, c]'` for `w` and `v` of shape
/// `K x C`; without a mask one shared `w v'`
pub fn gram(w: &Array2<f32>, v: &Array2<f32>, mask: Option<ArrayView2<f32>>) -> Gram {
    match mask {
        None => Gram::Shared(w.dot(&v.t())),
        Some(mask) => {
            let kk = w.nrows();
            let mut ret = Array3::<f32>::zeros((mask.nrows(), kk, kk));
            for (m, mut bm) in ret.outer_iter_mut().enumerate() {
                let wm = w * &mask.row(m).insert_axis(Axis(0));
                bm.assign(&wm.dot(&v.t()));
            }
            Gram::PerRow(ret)
        }
    }
}

/// A mask covers the data and holds only zeros and ones
pub fn check_mask(m: &[usize], mask: &ArrayD<f32>) -> anyhow::Result<()> {
    if mask.shape() != m {
        return Err(ParamError::shape(format!(
            "mask of shape {:?}, expected {:?}",
            mask.shape(),
            m
        )));
    }
    if !mask.iter().all(|&w| w == 0.0 || w == 1.0) {
        return Err(ParamError::numeric("mask entries must be zero or one"));
    }
    Ok(())
}

/// Noise model linking the reconstruction `contract(U)` to the data.
///
/// `init` must run once before anything else; every other method
/// fails with a state error until then.
pub trait Likelihood: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// per-mode sizes
    fn m(&self) -> &[usize];

    /// number of components
    fn k(&self) -> usize;

    fn f(&self) -> usize {
        self.m().len()
    }

    fn id(&self) -> String {
        format!("{}{}", self.name(), self.k())
    }

    /// Build the noise distribution from the data shape
    fn init(&mut self, data: &ArrayD<f32>, rng: &mut dyn RngCore) -> anyhow::Result<()>;

    fn is_ready(&self) -> bool;

    fn noise_distribution(&self) -> anyhow::Result<&dyn Distribution>;

    fn noise_distribution_mut(&mut self) -> anyhow::Result<&mut dyn Distribution>;

    /// Precision of every entry under the current noise, shape `M`
    fn precision(&self) -> anyhow::Result<ArrayD<f32>>;

    /// Entries that enter the fit (one) and those held out (zero)
    fn mask(&self) -> Option<&ArrayD<f32>>;

    /// Restrict every sum over the data to the entries where `mask` is
    /// one; `None` uses every entry
    fn set_mask(&mut self, mask: Option<ArrayD<f32>>) -> anyhow::Result<()>;

    /// `X - contract(U)`, zero at held-out entries
    fn residuals(&self, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        self.check_ready()?;
        self.check_args(u, x)?;
        let xhat = contract_factors(u)?;
        let resid = x - &xhat;
        Ok(match self.mask() {
            Some(mask) => resid * mask,
            None => resid,
        })
    }

    /// Sum of the elementwise noise log-likelihood of the residuals
    fn llh(&self, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<f32> {
        let resid = self.residuals(u, x)?;
        let llh = self.noise_distribution()?.llh(&resid)?;
        Ok(match self.mask() {
            Some(mask) => (llh * mask).sum(),
            None => llh.sum(),
        })
    }

    /// Sum of squared residuals, whatever the noise model
    fn loss(&self, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<f32> {
        let resid = self.residuals(u, x)?;
        Ok(resid.iter().map(|r| r * r).sum())
    }

    /// Refit the noise distribution to the residuals, only if its
    /// update type is `All`. A held-out entry stands in with its
    /// expected square `1 / precision` under the current noise.
    fn update(&mut self, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<()> {
        if self.noise_distribution()?.properties().update_type != UpdateType::All {
            return Ok(());
        }
        let resid = self.residuals(u, x)?;
        let resid = match self.mask() {
            Some(mask) => {
                let prec = self.precision()?;
                Zip::from(&resid)
                    .and(mask)
                    .and(&prec)
                    .map_collect(|&r, &w, &p| if w > 0.0 { r } else { p.sqrt().recip() })
            }
            None => resid,
        };
        self.noise_distribution_mut()?.update(&resid)
    }

    /// Sufficient statistics to update factor `f`
    fn prep_vars(&self, f: usize, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<SuffStats>;

    fn check_ready(&self) -> anyhow::Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ParamError::state(format!(
                "{}: call `init` before using the likelihood",
                self.id()
            )))
        }
    }

    /// Factors are `K x M_f`, one per mode, and the data is `M`
    fn check_args(&self, u: &[Array2<f32>], x: &ArrayD<f32>) -> anyhow::Result<()> {
        if x.shape() != self.m() {
            return Err(ParamError::shape(format!(
                "data of shape {:?}, expected {:?}",
                x.shape(),
                self.m()
            )));
        }
        if u.len() != self.f() {
            return Err(ParamError::shape(format!(
                "{} factors for a {}-way array",
                u.len(),
                self.f()
            )));
        }
        for (f, uf) in u.iter().enumerate() {
            if uf.dim() != (self.k(), self.m()[f]) {
                return Err(ParamError::shape(format!(
                    "factor {} is {:?}, expected ({}, {})",
                    f,
                    uf.dim(),
                    self.k(),
                    self.m()[f]
                )));
            }
        }
        Ok(())
    }
}
