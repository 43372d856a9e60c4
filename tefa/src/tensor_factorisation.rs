use crate::all_specific_normal_2d::AllSpecificNormal2dLikelihood;
use crate::likelihood::*;
use crate::normal_nd::NormalNdLikelihood;
use crate::stop_criterion::*;

use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use matrix_param::*;
use matrix_util::dmatrix_util::*;
use matrix_util::ndarray_stat::RunningStatistics;
use matrix_util::tensor_util::contract_component;
use matrix_util::traits::{BroadcastOps, SampleOps};
use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// added to the diagonal of every row precision matrix, relative to
/// its average diagonal when that exceeds one
const JITTER: f32 = 1e-6;

/// lower bound of factors under a non-negative prior
const NON_NEGATIVE_FLOOR: f32 = 1e-8;

/// fewest rows of a factor from which its prior is refit
const MIN_ROWS_TO_FIT_PRIOR: usize = 2;

/// Prior family of a factor matrix
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorFamily {
    Normal,
    CenNormal,
    T,
    CenT,
    Exponential,
}

impl PriorFamily {
    /// A prior over the rows of `U[f]'`: event shape `(K,)`; the
    /// Student-t families keep one latent scale per row, `(M_f,)`
    pub fn build(
        &self,
        f: usize,
        k: usize,
        m_f: usize,
        rng: &mut dyn RngCore,
    ) -> anyhow::Result<Box<dyn Distribution>> {
        let props = Properties::new(&format!("prior{}", f));
        let event = [k];
        let rows = [m_f];
        Ok(match self {
            PriorFamily::Normal => Box::new(Normal::random(props, &event, &[], rng)?),
            PriorFamily::CenNormal => Box::new(CenNormal::random(props, &event, &[], rng)?),
            PriorFamily::T => Box::new(T::random(props, &event, &rows, rng)?),
            PriorFamily::CenT => Box::new(CenT::random(props, &event, &rows, rng)?),
            PriorFamily::Exponential => Box::new(Exponential::random(props, &event, &[], rng)?),
        })
    }
}

/// Noise model of the data
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseModel {
    /// a precision per row and per column (2-way data only)
    AllSpecific,
    /// one shared precision, any number of modes
    Normal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactorisationOptions {
    /// number of components `K` (3)
    pub n_components: usize,
    /// one prior per mode; a single entry is used for every mode
    /// (`[CenNormal]`)
    pub priors: Vec<PriorFamily>,
    /// (`AllSpecific`)
    pub noise: NoiseModel,
    /// initial noise precision of the `Normal` noise model (0.01)
    pub tau: f32,
    /// chance of each entry to enter the fit; the others are held out
    /// (1.0)
    pub trainset_prob: f32,
    /// hard ceiling over all phases (100000)
    pub max_iterations: usize,
    /// balance component norms across modes after every step (true)
    pub do_rescale: bool,
    /// stop rule of the initial sampling phase (`Stall(10, STALL_TOLERANCE)`)
    pub stop_init: StopRule,
    /// stop rule of the EM phase (`Stall(100, STALL_TOLERANCE)`)
    pub stop_em: StopRule,
    /// stop rule of the block coordinate descent phase
    /// (`Improvement(0.1, Absolute)`)
    pub stop_bcd: StopRule,
    pub seed: u64,
    /// log the log-likelihood every so many iterations; 0 turns it off
    pub log_every: usize,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for FactorisationOptions {
    fn default() -> Self {
        Self {
            n_components: 3,
            priors: vec![PriorFamily::CenNormal],
            noise: NoiseModel::AllSpecific,
            tau: 0.01,
            trainset_prob: 1.0,
            max_iterations: 100_000,
            do_rescale: true,
            stop_init: StopRule::Stall(10, STALL_TOLERANCE),
            stop_em: StopRule::Stall(100, STALL_TOLERANCE),
            stop_bcd: StopRule::Improvement(0.1, Improvement::Absolute),
            seed: 42,
            log_every: 100,
            show_progress: false,
            verbose: false,
        }
    }
}

/// Inference phases, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// sampled factors, noise held fixed
    Init,
    /// sampled factors, noise refit
    Em,
    /// posterior-mode factors, noise refit
    Bcd,
    Done,
}

impl Phase {
    fn next(self) -> Self {
        match self {
            Phase::Init => Phase::Em,
            Phase::Em => Phase::Bcd,
            Phase::Bcd | Phase::Done => Phase::Done,
        }
    }

    fn index(self) -> Option<usize> {
        match self {
            Phase::Init => Some(0),
            Phase::Em => Some(1),
            Phase::Bcd => Some(2),
            Phase::Done => None,
        }
    }
}

/// Every persistent parameter of a fitted model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub options: FactorisationOptions,
    pub m: Vec<usize>,
    /// likelihood id, name and number of components
    pub likelihood: String,
    pub iteration: usize,
    pub phase: Phase,
    /// `U/{f}`, `prior/{f}/{slot}`, `likelihood/noise/{slot}` and
    /// `data_mask` when entries are held out
    pub variables: BTreeMap<String, ArrayD<f32>>,
}

/// Per-row prior terms of a factor update: the row log-density is
/// `-0.5 u' diag(tau) u + eta' u` up to a constant
struct PriorTerms {
    tau: Array2<f32>,
    eta: Array2<f32>,
    shared: bool,
    project: bool,
}

/// CP factorisation `X ~ contract(U[0], ..., U[F-1])` fitted by
/// sampling and block coordinate updates
#[derive(Debug)]
pub struct TensorFactorisation {
    options: FactorisationOptions,
    m: Vec<usize>,
    factors: Vec<Array2<f32>>,
    priors: Vec<Box<dyn Distribution>>,
    likelihood: Box<dyn Likelihood>,
    stops: Vec<Box<dyn StopCriterion>>,
    fixed: Vec<bool>,
    phase: Phase,
    iteration: usize,
    llh_trace: Vec<f32>,
    posterior: Vec<RunningStatistics<Ix2>>,
    rng: SmallRng,
}

impl TensorFactorisation {
    /// * `m` - mode sizes of the data
    /// * `options` - model and inference settings
    pub fn new(m: &[usize], options: FactorisationOptions) -> anyhow::Result<Self> {
        let nmodes = m.len();
        let kk = options.n_components;

        if nmodes < 2 {
            return Err(ParamError::shape(format!(
                "need at least two modes, got {:?}",
                m
            )));
        }
        if kk == 0 {
            return Err(ParamError::shape("need at least one component"));
        }
        if !(options.trainset_prob > 0.0 && options.trainset_prob <= 1.0) {
            return Err(ParamError::numeric(format!(
                "training set probability {} outside (0, 1]",
                options.trainset_prob
            )));
        }
        if options.priors.len() != 1 && options.priors.len() != nmodes {
            return Err(ParamError::shape(format!(
                "{} priors for {} modes",
                options.priors.len(),
                nmodes
            )));
        }

        let mut rng = SmallRng::seed_from_u64(options.seed);

        let families: Vec<PriorFamily> = (0..nmodes)
            .map(|f| options.priors[f.min(options.priors.len() - 1)])
            .collect();

        let priors = families
            .iter()
            .enumerate()
            .map(|(f, fam)| fam.build(f, kk, m[f], &mut rng))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let factors: Vec<Array2<f32>> = m
            .iter()
            .zip(priors.iter())
            .map(|(&mf, prior)| {
                let u = Array2::<f32>::rnorm(Ix2(kk, mf), &mut rng);
                if prior.non_negative() {
                    u.mapv(|v| v.abs().max(NON_NEGATIVE_FLOOR))
                } else {
                    u
                }
            })
            .collect();

        let props = Properties::new("likelihood");
        let mut likelihood: Box<dyn Likelihood> = match options.noise {
            NoiseModel::AllSpecific => Box::new(AllSpecificNormal2dLikelihood::new(m, kk, props)?),
            NoiseModel::Normal => Box::new(NormalNdLikelihood::new(m, kk, options.tau, props)?),
        };

        if options.trainset_prob < 1.0 {
            let p = options.trainset_prob;
            let mask = ArrayD::<f32>::runif(IxDyn(m), &mut rng).mapv(|u| if u < p { 1.0 } else { 0.0 });
            info!(
                "holding out {} of {} entries",
                mask.iter().filter(|&&w| w == 0.0).count(),
                mask.len()
            );
            likelihood.set_mask(Some(mask))?;
        }

        let stops = vec![
            options.stop_init.build(),
            options.stop_em.build(),
            options.stop_bcd.build(),
        ];

        let posterior = m
            .iter()
            .map(|&mf| RunningStatistics::new(Ix2(kk, mf)))
            .collect();

        Ok(Self {
            options,
            m: m.to_vec(),
            factors,
            priors,
            likelihood,
            stops,
            fixed: vec![false; nmodes],
            phase: Phase::Init,
            iteration: 0,
            llh_trace: vec![],
            posterior,
            rng,
        })
    }

    /// A model with the configuration and parameters of `checkpoint`
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> anyhow::Result<Self> {
        let mut ret = Self::new(&checkpoint.m, checkpoint.options.clone())?;
        ret.restore(checkpoint)?;
        Ok(ret)
    }

    pub fn options(&self) -> &FactorisationOptions {
        &self.options
    }

    pub fn m(&self) -> &[usize] {
        &self.m
    }

    pub fn num_modes(&self) -> usize {
        self.m.len()
    }

    /// `U[f]` of shape `(K, M_f)`
    pub fn factors(&self) -> &[Array2<f32>] {
        &self.factors
    }

    pub fn priors(&self) -> &[Box<dyn Distribution>] {
        &self.priors
    }

    pub fn likelihood(&self) -> &dyn Likelihood {
        self.likelihood.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// log-likelihood after every iteration
    pub fn llh_trace(&self) -> &[f32] {
        &self.llh_trace
    }

    /// Entries used for fitting (one) and held out (zero), if any
    pub fn mask(&self) -> Option<&ArrayD<f32>> {
        self.likelihood.mask()
    }

    /// Average of the factor draws of the EM phase
    pub fn posterior_mean(&self, f: usize) -> Option<Array2<f32>> {
        self.posterior.get(f).map(|s| s.mean())
    }

    /// Standard deviation of the factor draws of the EM phase
    pub fn posterior_sd(&self, f: usize) -> Option<Array2<f32>> {
        self.posterior.get(f).map(|s| s.std())
    }

    /// Keep `U[f]` at `value` from now on
    pub fn fix_factor(&mut self, f: usize, value: Array2<f32>) -> anyhow::Result<()> {
        self.check_factor(f, &value)?;
        self.factors[f] = value;
        self.fixed[f] = true;
        Ok(())
    }

    /// Run the phases on `x` until the last one converges or the
    /// iteration ceiling is hit
    pub fn fit(&mut self, x: &ArrayD<f32>) -> anyhow::Result<()> {
        if x.shape() != self.m.as_slice() {
            return Err(ParamError::shape(format!(
                "data of shape {:?}, expected {:?}",
                x.shape(),
                self.m
            )));
        }

        if !self.likelihood.is_ready() {
            self.likelihood.init(x, &mut self.rng)?;
        }

        let pb = ProgressBar::new(self.options.max_iterations as u64);
        if !self.options.show_progress || self.options.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_position(self.iteration as u64);

        info!(
            "fitting {} component(s) of a {:?} array, {}",
            self.options.n_components,
            self.m,
            self.likelihood.id()
        );

        while self.phase != Phase::Done && self.iteration < self.options.max_iterations {
            let llh = self.step(x)?;
            pb.inc(1);

            if self.options.log_every > 0 && self.iteration % self.options.log_every == 0 {
                info!(
                    "[{}] {:?} llh: {}, loss: {}",
                    self.iteration,
                    self.phase,
                    llh,
                    self.likelihood.loss(&self.factors, x)?
                );
            }
        }
        pb.finish_and_clear();

        if self.phase != Phase::Done {
            warn!(
                "stopped at the ceiling of {} iterations in phase {:?}",
                self.options.max_iterations, self.phase
            );
        }

        info!(
            "finished after {} iterations, llh: {}, loss: {}",
            self.iteration,
            self.llh_trace.last().cloned().unwrap_or(f32::NAN),
            self.likelihood.loss(&self.factors, x)?
        );
        Ok(())
    }

    /// One sweep over the factors, the noise update and the stop rule
    /// of the current phase. Returns the new log-likelihood.
    pub fn step(&mut self, x: &ArrayD<f32>) -> anyhow::Result<f32> {
        let Some(phase_index) = self.phase.index() else {
            return Err(ParamError::state("inference has already finished"));
        };

        let draw_type = match self.phase {
            Phase::Init | Phase::Em => DrawType::Sample,
            _ => DrawType::Mode,
        };

        for f in 0..self.num_modes() {
            if !self.fixed[f] {
                self.update_factor(f, x, draw_type)?;
            }
        }

        if self.phase != Phase::Init {
            self.likelihood.update(&self.factors, x)?;
        }

        if self.options.do_rescale && !self.fixed.iter().any(|&b| b) {
            self.rescale();
        }

        let llh = self.likelihood.llh(&self.factors, x)?;
        if !llh.is_finite() {
            return Err(ParamError::numeric(format!(
                "log-likelihood {} at iteration {}",
                llh, self.iteration
            )));
        }
        self.llh_trace.push(llh);
        self.iteration += 1;

        if self.phase == Phase::Em {
            for (stat, u) in self.posterior.iter_mut().zip(self.factors.iter()) {
                stat.add(u)?;
            }
        }

        if self.stops[phase_index].update(llh) {
            let next = self.phase.next();
            info!(
                "{:?} converged at iteration {} (llh: {}), moving on to {:?}",
                self.phase, self.iteration, llh, next
            );
            self.phase = next;
            if let Some(i) = next.index() {
                self.stops[i].reset();
            }
        }
        Ok(llh)
    }

    /// Resample (or maximize) `U[f]` given the other factors, then
    /// refit its prior unless `U[f]` has too few rows to fit it
    fn update_factor(
        &mut self,
        f: usize,
        x: &ArrayD<f32>,
        draw_type: DrawType,
    ) -> anyhow::Result<()> {
        let SuffStats { a, b, alpha } = self.likelihood.prep_vars(f, &self.factors, x)?;
        let prior = self.prior_terms(f)?;

        let (mf, kk) = a.dim();
        let zz = match draw_type {
            DrawType::Sample => Some(Array2::<f32>::rnorm(Ix2(mf, kk), &mut self.rng)),
            DrawType::Mode => None,
        };

        let row_solver = |m: usize| -> anyhow::Result<GaussianInfoSolver> {
            let mut pp = &b.for_row(m) * alpha[m];
            for (j, t) in prior.tau.row(m).iter().enumerate() {
                pp[[j, j]] += t;
            }
            let jitter = JITTER * pp.diag().mean().unwrap_or(1.0).max(1.0);
            pp.diag_mut().mapv_inplace(|d| d + jitter);
            GaussianInfoSolver::new(to_dmatrix(&pp.view())).ok_or_else(|| {
                ParamError::numeric(format!(
                    "precision of row {} of factor {} is not positive definite",
                    m, f
                ))
            })
        };

        let solve_row = |m: usize, solver: &GaussianInfoSolver| -> anyhow::Result<Array1<f32>> {
            let hh = &a.row(m) * alpha[m] + &prior.eta.row(m);
            let hh = to_dvector(&hh.view());
            let u = match zz.as_ref() {
                Some(zz) => solver
                    .sample(&hh, &to_dvector(&zz.row(m)))
                    .ok_or_else(|| ParamError::numeric("triangular solve failed"))?,
                None => solver.mean(&hh),
            };
            Ok(to_array1(&u))
        };

        let constant_alpha = alpha.iter().all(|&v| v == alpha[0]);

        let rows: Vec<Array1<f32>> = if prior.shared && constant_alpha && b.is_shared() && mf > 0 {
            debug!("factor {}: one solver for all rows", f);
            let solver = row_solver(0)?;
            (0..mf)
                .into_par_iter()
                .map(|m| solve_row(m, &solver))
                .collect::<anyhow::Result<_>>()?
        } else {
            (0..mf)
                .into_par_iter()
                .map(|m| solve_row(m, &row_solver(m)?))
                .collect::<anyhow::Result<_>>()?
        };

        let mut uf = Array2::<f32>::zeros((kk, mf));
        for (m, row) in rows.iter().enumerate() {
            uf.column_mut(m).assign(row);
        }
        if prior.project {
            uf.mapv_inplace(|v| v.max(NON_NEGATIVE_FLOOR));
        }

        if !uf.iter().all(|v| v.is_finite()) {
            return Err(ParamError::numeric(format!(
                "factor {} has non-finite values at iteration {}",
                f, self.iteration
            )));
        }

        let refit = mf >= MIN_ROWS_TO_FIT_PRIOR
            || self.priors[f].properties().update_type != UpdateType::All;
        if refit {
            self.priors[f].update(&uf.t().to_owned().into_dyn())?;
        }
        self.factors[f] = uf;
        Ok(())
    }

    /// Prior precision and linear term of every row of `U[f]'`, read
    /// off the conditional of the prior
    fn prior_terms(&self, f: usize) -> anyhow::Result<PriorTerms> {
        let prior = &self.priors[f];
        let full = [self.m[f], self.options.n_components];

        match prior.cond() {
            Ok(cond) => {
                let tau = cond.params().expand("tau", &full)?;
                let eta = if cond.params().contains("mu") {
                    &cond.params().expand("mu", &full)? * &tau
                } else {
                    ArrayD::zeros(IxDyn(&full))
                };
                Ok(PriorTerms {
                    tau: tau.into_dimensionality::<Ix2>()?,
                    eta: eta.into_dimensionality::<Ix2>()?,
                    shared: prior.homogenous(),
                    project: prior.non_negative(),
                })
            }
            Err(err) => {
                let unsupported = matches!(param_error(&err), Some(ParamError::Unsupported(_)));
                if unsupported && prior.non_negative() {
                    let eta = prior.linear_term()?.broadcast_to(&full)?;
                    Ok(PriorTerms {
                        tau: Array2::zeros(full),
                        eta: eta.into_dimensionality::<Ix2>()?,
                        shared: prior.homogenous(),
                        project: true,
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Scale every component to the same norm in every mode; the
    /// reconstruction does not change
    fn rescale(&mut self) {
        let nmodes = self.num_modes() as f32;
        for k in 0..self.options.n_components {
            let norms: Vec<f32> = self
                .factors
                .iter()
                .map(|u| u.row(k).iter().map(|v| v * v).sum::<f32>().sqrt())
                .collect();

            if norms.iter().any(|&n| !(n.is_finite() && n > 0.0)) {
                continue;
            }

            let log_mean = norms.iter().map(|n| n.ln()).sum::<f32>() / nmodes;
            let target = log_mean.exp();
            for (u, n) in self.factors.iter_mut().zip(norms.iter()) {
                let scale = target / n;
                u.row_mut(k).mapv_inplace(|v| v * scale);
            }
        }
    }

    /// Variance of each rank-one reconstruction over the variance of `x`
    pub fn explained_variance_ratio(&self, x: &ArrayD<f32>) -> anyhow::Result<Array1<f32>> {
        if x.shape() != self.m.as_slice() {
            return Err(ParamError::shape(format!(
                "data of shape {:?}, expected {:?}",
                x.shape(),
                self.m
            )));
        }
        let total = variance(x);
        if total.is_nan() || total <= 0.0 {
            return Err(ParamError::numeric("data with zero variance"));
        }
        (0..self.options.n_components)
            .map(|k| Ok(variance(&contract_component(&self.factors, k)?) / total))
            .collect::<anyhow::Result<Vec<f32>>>()
            .map(Array1::from)
    }

    /// Every persistent parameter, keyed by `U/{f}`,
    /// `prior/{f}/{slot}` and `likelihood/noise/{slot}`
    pub fn checkpoint(&self) -> anyhow::Result<Checkpoint> {
        let noise = self.likelihood.noise_distribution()?;
        let mut variables = BTreeMap::new();

        for (f, u) in self.factors.iter().enumerate() {
            variables.insert(format!("U/{}", f), u.clone().into_dyn());
        }

        for (f, prior) in self.priors.iter().enumerate() {
            if prior.properties().persistent {
                for (name, value) in prior.params().iter() {
                    variables.insert(format!("prior/{}/{}", f, name), value.clone());
                }
            }
        }

        if noise.properties().persistent {
            for (name, value) in noise.params().iter() {
                variables.insert(format!("likelihood/noise/{}", name), value.clone());
            }
        }

        if let Some(mask) = self.likelihood.mask() {
            variables.insert("data_mask".to_string(), mask.clone());
        }

        Ok(Checkpoint {
            options: self.options.clone(),
            m: self.m.clone(),
            likelihood: self.likelihood.id(),
            iteration: self.iteration,
            phase: self.phase,
            variables,
        })
    }

    /// Load the parameters of `checkpoint` through the validated
    /// setters. The model must have the same shape and likelihood.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        if checkpoint.m != self.m || checkpoint.likelihood != self.likelihood.id() {
            return Err(ParamError::shape(format!(
                "checkpoint of {} on {:?} does not match {} on {:?}",
                checkpoint.likelihood,
                checkpoint.m,
                self.likelihood.id(),
                self.m
            )));
        }

        if !self.likelihood.is_ready() {
            let placeholder = ArrayD::<f32>::zeros(IxDyn(&self.m));
            self.likelihood.init(&placeholder, &mut self.rng)?;
        }

        for (key, value) in checkpoint.variables.iter() {
            let parts: Vec<&str> = key.split('/').collect();
            match parts.as_slice() {
                ["U", f] => {
                    let f = self.mode_index(f)?;
                    let u = value.clone().into_dimensionality::<Ix2>()?;
                    self.check_factor(f, &u)?;
                    self.factors[f] = u;
                }
                ["prior", f, name] => {
                    let f = self.mode_index(f)?;
                    self.priors[f].set_param(name, value.clone())?;
                }
                ["likelihood", "noise", name] => {
                    self.likelihood
                        .noise_distribution_mut()?
                        .set_param(name, value.clone())?;
                }
                ["data_mask"] => {
                    self.likelihood.set_mask(Some(value.clone()))?;
                }
                _ => {
                    return Err(ParamError::shape(format!(
                        "unknown checkpoint variable `{}`",
                        key
                    )))
                }
            }
        }

        self.iteration = checkpoint.iteration;
        self.phase = checkpoint.phase;
        Ok(())
    }

    /// Infer `U[0]` of new data `x_new` with the factors of the other
    /// modes held at their fitted values
    pub fn transform(&self, x_new: &ArrayD<f32>) -> anyhow::Result<Array2<f32>> {
        if x_new.ndim() != self.num_modes() || x_new.shape()[1..] != self.m[1..] {
            return Err(ParamError::shape(format!(
                "new data of shape {:?} against a model of {:?}",
                x_new.shape(),
                self.m
            )));
        }

        let mut m = self.m.clone();
        m[0] = x_new.shape()[0];

        let options = FactorisationOptions {
            show_progress: false,
            trainset_prob: 1.0,
            ..self.options.clone()
        };
        let mut other = Self::new(&m, options)?;

        for f in 1..self.num_modes() {
            other.fix_factor(f, self.factors[f].clone())?;
        }
        other.priors[0] = frozen_prior(self.priors[0].as_ref(), other.priors[0].clone())?;

        other.fit(x_new)?;
        Ok(other.factors[0].clone())
    }

    fn mode_index(&self, f: &str) -> anyhow::Result<usize> {
        f.parse::<usize>()
            .ok()
            .filter(|&f| f < self.num_modes())
            .ok_or_else(|| ParamError::shape(format!("no mode `{}`", f)))
    }

    fn check_factor(&self, f: usize, u: &Array2<f32>) -> anyhow::Result<()> {
        let Some(&mf) = self.m.get(f) else {
            return Err(ParamError::shape(format!("no mode {}", f)));
        };
        let expected = (self.options.n_components, mf);
        if u.dim() != expected {
            return Err(ParamError::shape(format!(
                "factor {} of shape {:?}, expected {:?}",
                f,
                u.dim(),
                expected
            )));
        }
        Ok(())
    }
}

/// The fitted prior of mode 0 carried over to new rows: without
/// latent slots a copy that is never refit, otherwise `fresh` with the
/// fitted global slots and only its latent slots refit
fn frozen_prior(
    fitted: &dyn Distribution,
    mut fresh: Box<dyn Distribution>,
) -> anyhow::Result<Box<dyn Distribution>> {
    if fitted.latent_shape().is_empty() {
        let mut ret = fitted.clone_box();
        ret.core_mut().properties.update_type = UpdateType::Nothing;
        return Ok(ret);
    }
    for spec in fitted.params().specs().iter().filter(|s| !s.is_latent()) {
        fresh.set_param(spec.name, fitted.param(spec.name)?.clone())?;
    }
    fresh.core_mut().properties.update_type = UpdateType::OnlyLatents;
    Ok(fresh)
}

/// Population variance of all elements
fn variance(x: &ArrayD<f32>) -> f32 {
    let n = x.len().max(1) as f32;
    let mean = x.sum() / n;
    x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use matrix_util::tensor_util::contract_factors;

    fn quick_options() -> FactorisationOptions {
        FactorisationOptions {
            n_components: 2,
            max_iterations: 50,
            stop_init: StopRule::Stall(2, STALL_TOLERANCE),
            stop_em: StopRule::Stall(3, STALL_TOLERANCE),
            stop_bcd: StopRule::Improvement(1e-3, Improvement::Absolute),
            log_every: 0,
            ..Default::default()
        }
    }

    #[test]
    fn rescaling_keeps_the_reconstruction() -> anyhow::Result<()> {
        let options = FactorisationOptions {
            noise: NoiseModel::Normal,
            ..quick_options()
        };
        let mut model = TensorFactorisation::new(&[4, 3, 5], options)?;
        model.factors[0] *= 10.0;
        let before = contract_factors(&model.factors)?;
        model.rescale();
        let after = contract_factors(&model.factors)?;
        assert_abs_diff_eq!(before, after, epsilon = 1e-3);

        for k in 0..2 {
            let norms: Vec<f32> = model
                .factors
                .iter()
                .map(|u| u.row(k).dot(&u.row(k)).sqrt())
                .collect();
            assert_abs_diff_eq!(norms[0], norms[1], epsilon = 1e-3);
            assert_abs_diff_eq!(norms[1], norms[2], epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn phases_advance_in_order() {
        assert_eq!(Phase::Init.next(), Phase::Em);
        assert_eq!(Phase::Em.next(), Phase::Bcd);
        assert_eq!(Phase::Bcd.next(), Phase::Done);
        assert_eq!(Phase::Done.index(), None);
    }

    #[test]
    fn prior_terms_follow_the_conditional() -> anyhow::Result<()> {
        let options = FactorisationOptions {
            priors: vec![PriorFamily::Normal, PriorFamily::T],
            ..quick_options()
        };
        let model = TensorFactorisation::new(&[4, 5], options)?;

        let normal = model.prior_terms(0)?;
        assert!(normal.shared);
        assert!(!normal.project);
        let mu = model.priors[0].param("mu")?.clone().into_dimensionality::<Ix1>()?;
        let tau = model.priors[0].param("tau")?.clone().into_dimensionality::<Ix1>()?;
        for m in 0..4 {
            assert_abs_diff_eq!(normal.tau.row(m), tau.view());
            assert_abs_diff_eq!(normal.eta.row(m).to_owned(), &mu * &tau, epsilon = 1e-6);
        }

        let t = model.prior_terms(1)?;
        assert!(!t.shared);
        assert_eq!(t.tau.dim(), (5, 2));
        Ok(())
    }

    #[test]
    fn exponential_prior_has_linear_terms() -> anyhow::Result<()> {
        let options = FactorisationOptions {
            priors: vec![PriorFamily::Exponential],
            ..quick_options()
        };
        let model = TensorFactorisation::new(&[4, 5], options)?;
        assert!(model.factors.iter().all(|u| u.iter().all(|&v| v > 0.0)));

        let terms = model.prior_terms(1)?;
        assert!(terms.project);
        assert!(terms.shared);
        assert!(terms.tau.iter().all(|&v| v == 0.0));

        let beta = model.priors[1].param("beta")?.clone().into_dimensionality::<Ix1>()?;
        for m in 0..5 {
            assert_abs_diff_eq!(terms.eta.row(m).to_owned(), beta.mapv(|b| -1.0 / b), epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn transform_keeps_the_fitted_prior() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(3);
        let fitted = PriorFamily::CenNormal.build(0, 2, 6, &mut rng)?;
        let fresh = PriorFamily::CenNormal.build(0, 2, 1, &mut rng)?;
        let frozen = frozen_prior(fitted.as_ref(), fresh)?;
        assert_eq!(frozen.properties().update_type, UpdateType::Nothing);
        assert_eq!(frozen.param("tau")?, fitted.param("tau")?);

        let fitted = PriorFamily::T.build(0, 2, 6, &mut rng)?;
        let fresh = PriorFamily::T.build(0, 2, 1, &mut rng)?;
        let frozen = frozen_prior(fitted.as_ref(), fresh)?;
        assert_eq!(frozen.properties().update_type, UpdateType::OnlyLatents);
        assert_eq!(frozen.latent_shape(), &[1]);
        for name in ["mu", "Psi", "nu"] {
            assert_eq!(frozen.param(name)?, fitted.param(name)?);
        }
        Ok(())
    }

    #[test]
    fn single_row_modes_keep_their_prior() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(4);
        let x = ArrayD::<f32>::rnorm(IxDyn(&[1, 4, 5]), &mut rng);
        let options = FactorisationOptions {
            priors: vec![PriorFamily::Normal],
            noise: NoiseModel::Normal,
            max_iterations: 20,
            ..quick_options()
        };
        let mut model = TensorFactorisation::new(&[1, 4, 5], options)?;
        let before = model.priors[0].params().to_params();
        model.fit(&x)?;

        assert_eq!(model.priors[0].params().to_params(), before);
        assert!(model.llh_trace().iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn held_out_entries_are_drawn_and_checkpointed() -> anyhow::Result<()> {
        let options = FactorisationOptions {
            trainset_prob: 0.5,
            ..quick_options()
        };
        let model = TensorFactorisation::new(&[20, 10], options.clone())?;
        let mask = model.mask().expect("a mask");
        assert_eq!(mask.shape(), &[20, 10]);
        let kept = mask.sum();
        assert!(kept > 0.0 && kept < 200.0, "{}", kept);

        // the same seed draws the same mask
        let again = TensorFactorisation::new(&[20, 10], options)?;
        assert_eq!(again.mask(), Some(mask));

        let full = TensorFactorisation::new(&[20, 10], quick_options())?;
        assert!(full.mask().is_none());

        let bad = FactorisationOptions {
            trainset_prob: 0.0,
            ..quick_options()
        };
        let err = TensorFactorisation::new(&[20, 10], bad).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Numeric(_))));
        Ok(())
    }

    #[test]
    fn bad_configuration() {
        let err = TensorFactorisation::new(&[4], quick_options()).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));

        let options = FactorisationOptions {
            priors: vec![PriorFamily::Normal; 3],
            ..quick_options()
        };
        let err = TensorFactorisation::new(&[4, 5], options).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));

        // per-row and per-column noise only exists for matrices
        let err = TensorFactorisation::new(&[4, 5, 6], quick_options()).unwrap_err();
        assert!(matches!(param_error(&err), Some(ParamError::Shape(_))));
    }

    #[test]
    fn variance_ratio_of_an_exact_rank_one_fit() -> anyhow::Result<()> {
        let options = FactorisationOptions {
            n_components: 1,
            ..quick_options()
        };
        let model = TensorFactorisation::new(&[3, 4], options)?;
        let x = contract_factors(&model.factors)?;
        let evr = model.explained_variance_ratio(&x)?;
        assert_abs_diff_eq!(evr[0], 1.0, epsilon = 1e-4);
        Ok(())
    }
}
