use ndarray::{ArrayBase, Data, Dimension, OwnedRepr};

/// Running first and second moments of a stream of same-shape arrays
/// (e.g., posterior draws of a factor matrix). Non-finite entries are
/// skipped element by element.
///
/// # Type parameters
/// - `S` : The shape of the array
///
#[derive(Clone, Debug)]
pub struct RunningStatistics<S>
where
    S: Dimension,
{
    s0: ArrayBase<OwnedRepr<f32>, S>,
    s1: ArrayBase<OwnedRepr<f32>, S>,
    s2: ArrayBase<OwnedRepr<f32>, S>,
}

impl<S> RunningStatistics<S>
where
    S: Dimension,
{
    /// Create a new RunningStatistics object
    ///
    /// # Arguments
    ///
    /// * `shape` - The shape of the array
    ///
    /// # Examples
    ///
    /// ```
    /// use matrix_util::ndarray_stat::RunningStatistics;
    /// use ndarray::Ix2;
    /// let stat = RunningStatistics::new(Ix2(3, 10));
    /// assert_eq!(stat.shape(), &[3, 10]);
    /// ```
    ///
    pub fn new(shape: S) -> Self {
        let s0 = ArrayBase::zeros(shape.clone());
        let s1 = ArrayBase::zeros(shape.clone());
        let s2 = ArrayBase::zeros(shape);
        RunningStatistics { s0, s1, s2 }
    }

    pub fn add<V>(&mut self, xx: &ArrayBase<V, S>) -> anyhow::Result<()>
    where
        V: Data<Elem = f32>,
    {
        if xx.shape() != self.s0.shape() {
            anyhow::bail!(
                "expected shape {:?}, got {:?}",
                self.s0.shape(),
                xx.shape()
            );
        }
        self.s0 += &xx.mapv(Self::_is_finite);
        self.s1 += &xx.mapv(Self::_finite);
        self.s2 += &xx.mapv(|v| Self::_finite(v) * Self::_finite(v));
        Ok(())
    }

    /// Average statistic
    pub fn mean(&self) -> ArrayBase<OwnedRepr<f32>, S> {
        &self.s1 / &self.s0.mapv(Self::_add_pseudo_count)
    }

    /// Variance
    pub fn variance(&self) -> ArrayBase<OwnedRepr<f32>, S> {
        let mean = self.mean();
        let nn = self.s0.mapv(Self::_add_pseudo_count);
        (&self.s2 / &nn - &mean * &mean).mapv(|v| v.max(0.0))
    }

    /// Standard deviation
    pub fn std(&self) -> ArrayBase<OwnedRepr<f32>, S> {
        self.variance().mapv(f32::sqrt)
    }

    pub fn shape(&self) -> &[usize] {
        self.s0.shape()
    }

    //////////////////////
    // helper functions //
    //////////////////////

    fn _finite(x: f32) -> f32 {
        if x.is_finite() {
            x
        } else {
            0_f32
        }
    }

    fn _is_finite(x: f32) -> f32 {
        if x.is_finite() {
            1_f32
        } else {
            0_f32
        }
    }

    fn _add_pseudo_count(x: f32) -> f32 {
        x.max(1_f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::prelude::*;

    #[test]
    fn moments_of_draws() -> anyhow::Result<()> {
        let mut stat = RunningStatistics::new(Ix2(1, 2));
        stat.add(&array![[1.0, f32::NAN]])?;
        stat.add(&array![[3.0, 2.0]])?;

        assert_abs_diff_eq!(stat.mean(), array![[2.0, 2.0]]);
        assert_abs_diff_eq!(stat.std(), array![[1.0, 0.0]]);

        assert!(stat.add(&array![[1.0, 2.0, 3.0]]).is_err());

        // nothing observed yet
        let empty = RunningStatistics::new(Ix2(1, 2));
        assert_eq!(empty.mean(), array![[0.0, 0.0]]);
        Ok(())
    }
}
