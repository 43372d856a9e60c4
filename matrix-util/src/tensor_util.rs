//! CP (CANDECOMP/PARAFAC) contractions over factor matrices.
//!
//! Every factor is stored as a `K x M_f` matrix (components by mode
//! size). The reconstruction of a rank-`K` tensor is
//!
//! ```text
//! X[i_0, ..., i_{F-1}] = sum_k U_0[k, i_0] * ... * U_{F-1}[k, i_{F-1}]
//! ```
//!
//! and its mode-`f` unfolding satisfies `X_(f) = U_f' W_{-f}` where
//! `W_{-f}` are the Khatri-Rao rows of the remaining factors, taken in
//! increasing mode order with the last mode running fastest.

use ndarray::prelude::*;
use ndarray::IxDyn;

/// Khatri-Rao product along the component axis.
///
/// For factors `U_g` of shape `(K, M_g)` returns `W` of shape
/// `(K, prod_g M_g)` with `W[k, (i_1, ..., i_n)] = prod_g U_g[k, i_g]`,
/// the multi-index flattened in row-major order.
pub fn khatri_rao_rows(factors: &[&Array2<f32>]) -> anyhow::Result<Array2<f32>> {
    let kk = factors
        .first()
        .map(|u| u.nrows())
        .ok_or_else(|| anyhow::anyhow!("need at least one factor"))?;

    let mut ret = Array2::<f32>::ones((kk, 1));

    for u in factors {
        if u.nrows() != kk {
            anyhow::bail!(
                "factors disagree on the number of components: {} vs {}",
                kk,
                u.nrows()
            );
        }
        let (m_prev, m_g) = (ret.ncols(), u.ncols());
        let mut next = Array2::<f32>::zeros((kk, m_prev * m_g));
        for k in 0..kk {
            for a in 0..m_prev {
                let w = ret[[k, a]];
                let mut dst = next.slice_mut(s![k, (a * m_g)..((a + 1) * m_g)]);
                dst.assign(&u.row(k).mapv(|x| w * x));
            }
        }
        ret = next;
    }
    Ok(ret)
}

/// Mode-`mode` matricization: `(M_mode, prod_{g != mode} M_g)`, the
/// remaining axes in increasing order, the last one running fastest.
pub fn unfold(x: &ArrayD<f32>, mode: usize) -> anyhow::Result<Array2<f32>> {
    if mode >= x.ndim() {
        anyhow::bail!("mode {} out of range for a {}-way array", mode, x.ndim());
    }

    let perm: Vec<usize> = std::iter::once(mode)
        .chain((0..x.ndim()).filter(|&a| a != mode))
        .collect();

    let nrow = x.shape()[mode];
    let ncol: usize = (0..x.ndim())
        .filter(|&a| a != mode)
        .map(|a| x.shape()[a])
        .product();

    let permuted = x.view().permuted_axes(perm.as_slice());
    Ok(permuted
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((nrow, ncol))?)
}

/// Reconstruct the full tensor from `F >= 2` factors `U_f (K x M_f)`.
///
/// For two factors this is exactly `U_0' U_1`.
pub fn contract_factors(factors: &[Array2<f32>]) -> anyhow::Result<ArrayD<f32>> {
    if factors.len() < 2 {
        anyhow::bail!("need at least two factors, got {}", factors.len());
    }

    let rest: Vec<&Array2<f32>> = factors[1..].iter().collect();
    let w = khatri_rao_rows(&rest)?;
    let u0 = &factors[0];

    if u0.nrows() != w.nrows() {
        anyhow::bail!(
            "factors disagree on the number of components: {} vs {}",
            u0.nrows(),
            w.nrows()
        );
    }

    let shape: Vec<usize> = factors.iter().map(|u| u.ncols()).collect();
    Ok(u0.t().dot(&w).into_shape_with_order(IxDyn(&shape))?)
}

/// Rank-one reconstruction of a single component `k`
pub fn contract_component(factors: &[Array2<f32>], k: usize) -> anyhow::Result<ArrayD<f32>> {
    let single: Vec<Array2<f32>> = factors
        .iter()
        .map(|u| {
            if k < u.nrows() {
                Ok(u.slice(s![k..(k + 1), ..]).to_owned())
            } else {
                Err(anyhow::anyhow!("component {} out of range", k))
            }
        })
        .collect::<anyhow::Result<_>>()?;
    contract_factors(&single)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_way_contraction_is_a_matrix_product() -> anyhow::Result<()> {
        let u0 = array![[1., 2., 0.], [0., 1., 3.]];
        let u1 = array![[1., -1.], [2., 1.]];
        let x = contract_factors(&[u0.clone(), u1.clone()])?;
        let expected = u0.t().dot(&u1).into_dyn();
        assert_eq!(x, expected);
        Ok(())
    }

    #[test]
    fn unfolding_matches_khatri_rao() -> anyhow::Result<()> {
        let u0 = array![[1., 2.], [3., 0.]];
        let u1 = array![[1., 0., 2.], [1., 1., -1.]];
        let u2 = array![[2., 1.], [0., 4.]];
        let factors = vec![u0.clone(), u1.clone(), u2.clone()];
        let x = contract_factors(&factors)?;
        assert_eq!(x.shape(), &[2, 3, 2]);

        // spot check one entry
        let v = (0..2).map(|k| u0[[k, 1]] * u1[[k, 2]] * u2[[k, 0]]).sum::<f32>();
        assert_eq!(x[[1, 2, 0]], v);

        for f in 0..3 {
            let others: Vec<&Array2<f32>> = (0..3)
                .filter(|&g| g != f)
                .map(|g| &factors[g])
                .collect();
            let w = khatri_rao_rows(&others)?;
            let lhs = unfold(&x, f)?;
            let rhs = factors[f].t().dot(&w);
            assert_eq!(lhs, rhs);
        }
        Ok(())
    }

    #[test]
    fn components_add_up() -> anyhow::Result<()> {
        let u0 = array![[1., 2.], [3., 1.]];
        let u1 = array![[1., 0., 2.], [1., 1., -1.]];
        let factors = vec![u0, u1];
        let total = contract_factors(&factors)?;
        let parts = &contract_component(&factors, 0)? + &contract_component(&factors, 1)?;
        assert_eq!(total, parts);
        assert!(contract_component(&factors, 2).is_err());
        Ok(())
    }

    #[test]
    fn mismatched_components_fail() {
        let u0 = Array2::<f32>::zeros((2, 3));
        let u1 = Array2::<f32>::zeros((3, 3));
        assert!(contract_factors(&[u0.clone(), u1]).is_err());
        assert!(contract_factors(&[u0]).is_err());
    }
}
