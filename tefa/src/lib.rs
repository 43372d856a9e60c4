pub mod all_specific_normal_2d;
pub mod decompose;
pub mod likelihood;
pub mod normal_nd;
pub mod stop_criterion;
pub mod tensor_factorisation;

pub use all_specific_normal_2d::AllSpecificNormal2dLikelihood;
pub use decompose::Decompose;
pub use likelihood::{Likelihood, SuffStats};
pub use normal_nd::NormalNdLikelihood;
pub use stop_criterion::{
    Improvement, LlhImprovementThreshold, LlhStall, StopCriterion, StopRule, STALL_TOLERANCE,
};
pub use tensor_factorisation::{
    Checkpoint, FactorisationOptions, NoiseModel, Phase, PriorFamily, TensorFactorisation,
};
