// ─────────────────────────────────────────────────────────────────────
// StructGate — Dense Linear Algebra Helpers
// ─────────────────────────────────────────────────────────────────────
//! Softmax and singular values for the probes.
//!
//! Singular values come from a one-sided (Hestenes) Jacobi SVD that
//! rotates pairs of rows of `C` until they are mutually orthogonal; the
//! row norms are then the singular values. Working on `C` itself keeps
//! the small singular values accurate to about `ε·σ₁`, where squaring
//! into a Gram matrix would lose half the digits.

use structgate_types::{StructGateError, StructGateResult};

/// Numerically stable softmax (shift by max, then exponentiate).
///
/// Returns `None` for an empty input, any NaN, a `+∞` score, or when every
/// score is `−∞`. Individual `−∞` scores (masked tokens) get probability 0.
pub fn softmax(scores: &[f64]) -> Option<Vec<f64>> {
    if scores.is_empty() || scores.iter().any(|s| s.is_nan()) {
        return None;
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    // total >= 1 because the max entry contributes exp(0).
    Some(exps.into_iter().map(|e| e / total).collect())
}

/// Euclidean dot product of two equal-length slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2 norm.
pub fn l2_norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Subtract the column-wise mean from a row-major `rows × cols` matrix.
pub fn center_columns(m: &mut [f64], rows: usize, cols: usize) {
    if rows == 0 {
        return;
    }
    for c in 0..cols {
        let mean = (0..rows).map(|r| m[r * cols + c]).sum::<f64>() / rows as f64;
        for r in 0..rows {
            m[r * cols + c] -= mean;
        }
    }
}

/// Singular values of a row-major `rows × cols` matrix, descending.
///
/// Returns `rows` values; when `rows > cols` the surplus ones are zero up
/// to rounding. Fails with [`StructGateError::Numerical`] on non-finite
/// input or when the rotations do not converge.
pub fn singular_values(m: &[f64], rows: usize, cols: usize) -> StructGateResult<Vec<f64>> {
    if m.len() != rows * cols {
        return Err(StructGateError::Validation(format!(
            "matrix has {} values, expected {rows}x{cols}",
            m.len()
        )));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(StructGateError::Numerical(
            "non-finite value in matrix".to_string(),
        ));
    }
    let mut a = m.to_vec();
    orthogonalize_rows(&mut a, rows, cols)?;

    let mut sv: Vec<f64> = a.chunks(cols.max(1)).take(rows).map(l2_norm).collect();
    if sv.iter().any(|v| !v.is_finite()) {
        return Err(StructGateError::Numerical(
            "non-finite singular value".to_string(),
        ));
    }
    sv.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Ok(sv)
}

/// Cyclic one-sided Jacobi: rotate row pairs of `a` (row-major
/// `rows × cols`) until every pair is orthogonal to working precision.
pub fn orthogonalize_rows(a: &mut [f64], rows: usize, cols: usize) -> StructGateResult<()> {
    const MAX_SWEEPS: usize = 60;
    const REL_TOL: f64 = 1e-15;

    let frobenius = l2_norm(a);
    if !frobenius.is_finite() {
        return Err(StructGateError::Numerical("matrix norm overflowed".to_string()));
    }
    // Rows this small carry no information at the matrix scale.
    let negligible = (f64::EPSILON * frobenius).powi(2);

    for _ in 0..MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..rows {
            for q in (p + 1)..rows {
                let (head, tail) = a.split_at_mut(q * cols);
                let rp = &mut head[p * cols..(p + 1) * cols];
                let rq = &mut tail[..cols];

                let alpha = dot(rp, rp);
                let beta = dot(rq, rq);
                let gamma = dot(rp, rq);
                if alpha.min(beta) <= negligible
                    || gamma.abs() <= REL_TOL * (alpha * beta).sqrt()
                {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                // Smaller root for numerical stability.
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;
                for (x, y) in rp.iter_mut().zip(rq.iter_mut()) {
                    let (xp, yq) = (*x, *y);
                    *x = c * xp - s * yq;
                    *y = s * xp + c * yq;
                }
            }
        }
        if !rotated {
            return Ok(());
        }
    }
    Err(StructGateError::Numerical(format!(
        "one-sided Jacobi did not converge in {MAX_SWEEPS} sweeps"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]).unwrap();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let p = softmax(&[1000.0, 1000.0]).unwrap();
        assert!((p[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_masked_token() {
        let p = softmax(&[0.0, f64::NEG_INFINITY]).unwrap();
        assert_eq!(p, vec![1.0, 0.0]);
    }

    #[test]
    fn test_softmax_invalid() {
        assert!(softmax(&[]).is_none());
        assert!(softmax(&[1.0, f64::NAN]).is_none());
        assert!(softmax(&[f64::INFINITY, 1.0]).is_none());
        assert!(softmax(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).is_none());
    }

    #[test]
    fn test_center_columns() {
        let mut m = vec![1.0, 10.0, 3.0, 20.0];
        center_columns(&mut m, 2, 2);
        assert_eq!(m, vec![-1.0, -5.0, 1.0, 5.0]);
    }

    #[test]
    fn test_orthogonalize_rows_makes_rows_orthogonal() {
        let mut a = vec![4.0, 1.0, 0.5, 1.0, 3.0, 0.8, 0.5, 0.8, 2.0];
        let before = l2_norm(&a);
        orthogonalize_rows(&mut a, 3, 3).unwrap();
        for p in 0..3 {
            for q in (p + 1)..3 {
                let g = dot(&a[p * 3..p * 3 + 3], &a[q * 3..q * 3 + 3]);
                assert!(g.abs() < 1e-12, "rows {p},{q}: {g}");
            }
        }
        // Rotations preserve the Frobenius norm.
        assert!((l2_norm(&a) - before).abs() < 1e-12);
    }

    #[test]
    fn test_singular_values_known_matrix() {
        // diag(3, 2) padded with a zero column: singular values 3, 2.
        let m = vec![3.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let sv = singular_values(&m, 2, 3).unwrap();
        assert!((sv[0] - 3.0).abs() < 1e-10);
        assert!((sv[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_singular_values_rank_one() {
        // Every row a multiple of (1, 2): one non-zero singular value.
        let m = vec![1.0, 2.0, 2.0, 4.0, -1.0, -2.0];
        let sv = singular_values(&m, 3, 2).unwrap();
        let expected = (6.0_f64 * 5.0).sqrt(); // ||(1,2,-1)|| * ||(1,2)||
        assert!((sv[0] - expected).abs() < 1e-9);
        assert!(sv[1] < 1e-6 && sv[2] < 1e-6);
    }

    #[test]
    fn test_singular_values_rank_one_large_scale() {
        // Zero singular values stay at rounding level relative to σ₁.
        let dir = [1.0, -2.0, 0.5, 3.0];
        let m: Vec<f64> = (0..10)
            .flat_map(|k| dir.iter().map(move |d| d * 1e4 * (k as f64 - 4.5)))
            .collect();
        let sv = singular_values(&m, 10, 4).unwrap();
        assert_eq!(sv.len(), 10);
        assert!(sv[0] > 1e5);
        for s in &sv[1..] {
            assert!(*s < 1e-9 * sv[0], "residual σ = {s}");
        }
    }

    #[test]
    fn test_singular_values_more_rows_than_columns() {
        let m = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let sv = singular_values(&m, 3, 2).unwrap();
        // Cᵀ·C = [[2, 1], [1, 2]]: eigenvalues 3 and 1.
        assert!((sv[0] - 3.0_f64.sqrt()).abs() < 1e-12);
        assert!((sv[1] - 1.0).abs() < 1e-12);
        assert!(sv[2] < 1e-12);
    }

    #[test]
    fn test_singular_values_rejects_nan() {
        let m = vec![1.0, f64::NAN, 0.0, 1.0];
        assert!(matches!(
            singular_values(&m, 2, 2),
            Err(StructGateError::Numerical(_))
        ));
    }

    #[test]
    fn test_singular_values_shape_mismatch() {
        assert!(matches!(
            singular_values(&[1.0, 2.0, 3.0], 2, 2),
            Err(StructGateError::Validation(_))
        ));
    }
}
