//! Least-squares polynomial fitting.
//!
//! Coefficients are stored in ascending order: `c[0] + c[1] x + c[2] x^2 ...`
//! The abscissa is rescaled to [-1, 1] internally to keep the normal
//! equations well conditioned at the orders used here (up to 6).

use crate::types::{GmError, GmResult};

/// Fit a polynomial of the given order to (x, y) by least squares.
pub fn polyfit(x: &[f64], y: &[f64], order: usize) -> GmResult<Vec<f64>> {
    if x.len() != y.len() {
        return Err(GmError::Data(
            "polyfit: x and y must have the same length".to_string(),
        ));
    }
    if x.len() <= order {
        return Err(GmError::Data(format!(
            "polyfit: need more than {} points for order {}",
            order, order
        )));
    }

    // Rescale x to [-1, 1]
    let xmin = x.iter().cloned().fold(f64::INFINITY, f64::min);
    let xmax = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let half_span = 0.5 * (xmax - xmin);
    let mid = 0.5 * (xmax + xmin);
    let scale = if half_span > 0.0 { half_span } else { 1.0 };
    let xs: Vec<f64> = x.iter().map(|&v| (v - mid) / scale).collect();

    let m = order + 1;

    // Normal equations A^T A c = A^T y with A the Vandermonde matrix
    let mut ata = vec![vec![0.0f64; m]; m];
    let mut aty = vec![0.0f64; m];
    for (&xi, &yi) in xs.iter().zip(y.iter()) {
        let mut powers = vec![1.0f64; m];
        for j in 1..m {
            powers[j] = powers[j - 1] * xi;
        }
        for i in 0..m {
            aty[i] += powers[i] * yi;
            for j in 0..m {
                ata[i][j] += powers[i] * powers[j];
            }
        }
    }

    let cs = solve(&mut ata, &mut aty)?;

    // Undo the rescaling: expand c((x - mid)/scale) into powers of x
    let mut coeffs = vec![0.0f64; m];
    // basis = ((x - mid)/scale)^j expanded in powers of x, built iteratively
    let mut basis = vec![0.0f64; m];
    basis[0] = 1.0;
    for (j, &cj) in cs.iter().enumerate() {
        if j > 0 {
            // multiply basis by (x - mid)/scale
            let mut next = vec![0.0f64; m];
            for (k, &bk) in basis.iter().enumerate() {
                if bk == 0.0 {
                    continue;
                }
                next[k] += bk * (-mid / scale);
                if k + 1 < m {
                    next[k + 1] += bk / scale;
                }
            }
            basis = next;
        }
        for k in 0..m {
            coeffs[k] += cj * basis[k];
        }
    }
    Ok(coeffs)
}

/// Evaluate a polynomial with ascending coefficients at x (Horner).
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    let mut acc = 0.0;
    for &c in coeffs.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

/// Gaussian elimination with partial pivoting.
fn solve(a: &mut [Vec<f64>], b: &mut [f64]) -> GmResult<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        // Pivot
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-300 {
            return Err(GmError::Processing(
                "polyfit: singular normal equations".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    // Back substitution
    let mut x = vec![0.0f64; n];
    for col in (0..n).rev() {
        let mut acc = b[col];
        for k in (col + 1)..n {
            acc -= a[col][k] * x[k];
        }
        x[col] = acc / a[col][col];
    }
    Ok(x)
}
