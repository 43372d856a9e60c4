use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Decides when an inference phase has converged, fed one
/// log-likelihood per iteration
pub trait StopCriterion: Debug + Send + Sync {
    /// Record `llh` and return whether the phase has converged
    fn update(&mut self, llh: f32) -> bool;

    /// Forget the history; called when a phase starts
    fn reset(&mut self);

    fn converged(&self) -> bool;
}

/// relative gain below which a log-likelihood counts as no improvement
pub const STALL_TOLERANCE: f32 = 1e-6;

/// Converged once the best log-likelihood so far has not improved for
/// `patience` consecutive observations. A gain counts only when it
/// exceeds `tolerance * max(|best|, 1)`.
#[derive(Clone, Debug)]
pub struct LlhStall {
    patience: usize,
    tolerance: f32,
    best: Option<f32>,
    stalled: usize,
}

impl LlhStall {
    pub fn new(patience: usize, tolerance: f32) -> Self {
        Self {
            patience,
            tolerance,
            best: None,
            stalled: 0,
        }
    }
}

impl StopCriterion for LlhStall {
    fn update(&mut self, llh: f32) -> bool {
        let improved = match self.best {
            None => true,
            Some(best) => llh - best > self.tolerance * best.abs().max(1.0),
        };
        if improved {
            self.best = Some(llh);
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }
        self.converged()
    }

    fn reset(&mut self) {
        self.best = None;
        self.stalled = 0;
    }

    fn converged(&self) -> bool {
        self.stalled >= self.patience
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Improvement {
    /// `llh - previous`
    Absolute,
    /// `(llh - previous) / |previous|`
    Relative,
}

/// Converged once the improvement between two consecutive
/// observations drops below `threshold`
#[derive(Clone, Debug)]
pub struct LlhImprovementThreshold {
    threshold: f32,
    improvement: Improvement,
    previous: Option<f32>,
    converged: bool,
}

impl LlhImprovementThreshold {
    pub fn new(threshold: f32, improvement: Improvement) -> Self {
        Self {
            threshold,
            improvement,
            previous: None,
            converged: false,
        }
    }
}

impl StopCriterion for LlhImprovementThreshold {
    fn update(&mut self, llh: f32) -> bool {
        if let Some(prev) = self.previous {
            let delta = llh - prev;
            let delta = match self.improvement {
                Improvement::Absolute => delta,
                Improvement::Relative => delta / prev.abs().max(f32::MIN_POSITIVE),
            };
            self.converged = delta < self.threshold;
        }
        self.previous = Some(llh);
        self.converged
    }

    fn reset(&mut self) {
        self.previous = None;
        self.converged = false;
    }

    fn converged(&self) -> bool {
        self.converged
    }
}

/// Serializable choice of a stop criterion
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum StopRule {
    /// patience and relative tolerance of [`LlhStall`]
    Stall(usize, f32),
    Improvement(f32, Improvement),
}

impl StopRule {
    pub fn build(&self) -> Box<dyn StopCriterion> {
        match *self {
            StopRule::Stall(n, tolerance) => Box::new(LlhStall::new(n, tolerance)),
            StopRule::Improvement(threshold, improvement) => {
                Box::new(LlhImprovementThreshold::new(threshold, improvement))
            }
        }
    }
}
