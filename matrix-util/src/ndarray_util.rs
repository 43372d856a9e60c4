pub use ndarray::prelude::*;
pub use rand::Rng;
pub use rand_distr::StandardNormal;

use crate::traits::*;
use ndarray::{Dimension, IxDyn};
use num_traits::{Float, FromPrimitive};
use rand::distr::Open01;
use rand_distr::Exp;

impl<D> SampleOps for Array<f32, D>
where
    D: Dimension,
{
    type Mat = Self;
    type Shape = D;
    type Scalar = f32;

    fn runif<R: Rng + ?Sized>(shape: D, rng: &mut R) -> Self::Mat {
        Array::from_shape_simple_fn(shape, || rng.sample(Open01))
    }

    fn rnorm<R: Rng + ?Sized>(shape: D, rng: &mut R) -> Self::Mat {
        Array::from_shape_simple_fn(shape, || rng.sample(StandardNormal))
    }

    fn rexp<R: Rng + ?Sized>(shape: D, rate: f32, rng: &mut R) -> anyhow::Result<Self::Mat> {
        let pdf = Exp::new(rate)
            .map_err(|e| anyhow::anyhow!("invalid exponential rate {}: {:?}", rate, e))?;
        Ok(Array::from_shape_simple_fn(shape, || rng.sample(&pdf)))
    }
}

/// Can an array of shape `from` be stretched to `to`?
pub fn is_broadcast_compatible(from: &[usize], to: &[usize]) -> bool {
    from.len() <= to.len()
        && from
            .iter()
            .rev()
            .zip(to.iter().rev())
            .all(|(&a, &b)| a == b || a == 1)
}

/// Broadcast two shapes against each other
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> anyhow::Result<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut ret = vec![1; n];
    for i in 0..n {
        let da = if i < n - a.len() { 1 } else { a[i - (n - a.len())] };
        let db = if i < n - b.len() { 1 } else { b[i - (n - b.len())] };
        ret[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => anyhow::bail!("incompatible shapes {:?} and {:?}", a, b),
        };
    }
    Ok(ret)
}

impl<T> BroadcastOps for ArrayD<T>
where
    T: Float + FromPrimitive,
{
    type Mat = Self;

    fn broadcast_to(&self, shape: &[usize]) -> anyhow::Result<Self::Mat> {
        self.broadcast(IxDyn(shape))
            .map(|v| v.to_owned())
            .ok_or_else(|| {
                anyhow::anyhow!("cannot broadcast {:?} to {:?}", self.shape(), shape)
            })
    }

    fn sum_to_shape(&self, shape: &[usize]) -> anyhow::Result<Self::Mat> {
        if !is_broadcast_compatible(shape, self.shape()) {
            anyhow::bail!("cannot reduce {:?} to {:?}", self.shape(), shape);
        }

        let offset = self.ndim() - shape.len();
        let mut ret = self.clone();

        // from the last axis so that earlier axis indexes stay valid
        for ax in (0..self.ndim()).rev() {
            let keep = ax >= offset && shape[ax - offset] == self.shape()[ax];
            if !keep {
                ret = ret.sum_axis(Axis(ax));
            }
        }

        Ok(ret.into_shape_with_order(IxDyn(shape))?)
    }

    fn mean_to_shape(&self, shape: &[usize]) -> anyhow::Result<Self::Mat> {
        let nout: usize = shape.iter().product();
        if nout == 0 || self.is_empty() {
            anyhow::bail!("empty reduction from {:?} to {:?}", self.shape(), shape);
        }
        let denom = T::from_usize(self.len() / nout)
            .ok_or_else(|| anyhow::anyhow!("failed to convert the count"))?;
        Ok(self.sum_to_shape(shape)?.mapv(|x| x / denom))
    }
}
