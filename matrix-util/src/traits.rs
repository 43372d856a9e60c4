use crate::common_io::Delimiter;
use rand::Rng;

/// Operations to sample random arrays of any rank. The caller owns
/// the random number generator so that every draw can be seeded.
pub trait SampleOps {
    type Mat;
    type Shape;
    type Scalar;

    /// Sample an array from a uniform distribution `U(0,1)`,
    /// excluding both ends
    fn runif<R: Rng + ?Sized>(shape: Self::Shape, rng: &mut R) -> Self::Mat;

    /// Sample an array from a normal distribution `N(0,1)`
    fn rnorm<R: Rng + ?Sized>(shape: Self::Shape, rng: &mut R) -> Self::Mat;

    /// Sample an array from an exponential distribution with `rate` λ
    ///
    /// $$f(x|\lambda) = \lambda e^{-\lambda x}$$
    fn rexp<R: Rng + ?Sized>(
        shape: Self::Shape,
        rate: Self::Scalar,
        rng: &mut R,
    ) -> anyhow::Result<Self::Mat>;
}

/// Numpy-style broadcasting between arrays of different rank. Shapes
/// are aligned from the right; a dimension of size one (or a missing
/// leading dimension) stretches to match the other side.
pub trait BroadcastOps {
    type Mat;

    /// Materialize `self` stretched to `shape`
    fn broadcast_to(&self, shape: &[usize]) -> anyhow::Result<Self::Mat>;

    /// Sum over every axis that `shape` collapses, the reverse of
    /// `broadcast_to`
    fn sum_to_shape(&self, shape: &[usize]) -> anyhow::Result<Self::Mat>;

    /// Average over every axis that `shape` collapses
    fn mean_to_shape(&self, shape: &[usize]) -> anyhow::Result<Self::Mat>;
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }

    fn to_csv(&self, csv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(csv_file, ",")
    }
}
