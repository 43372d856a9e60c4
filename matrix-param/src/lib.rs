pub mod cen_normal_rank_one;
pub mod error;
pub mod exponential;
pub mod io;
pub mod normal;
pub mod param_table;
pub mod properties;
pub mod student_t;
pub mod traits;

pub use cen_normal_rank_one::{CenNormalRankOne, CenNormalRankOneAlgorithms};
pub use error::{param_error, ParamError};
pub use exponential::{Exponential, ExponentialAlgorithms};
pub use io::ParamSnapshot;
pub use normal::{CenNormal, CenNormalAlgorithms, Normal, NormalAlgorithms};
pub use param_table::{ParamTable, Params};
pub use properties::{DrawType, Properties, UpdateType};
pub use student_t::{CenT, TAlgorithms, TFixedNuAlgorithms, T};
pub use traits::{Algorithms, Distribution, Family, FamilyInfo};
