//! Dense least-squares solvers shared by the state-space and additive families

use ndarray::{Array1, Array2};

use crate::error::{ForecastError, Result};

/// Solve `A x = b` for symmetric positive definite `A` via Cholesky.
///
/// A matrix that is not positive definite gets a small diagonal ridge and one
/// more attempt.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    cholesky_factor(a)
        .or_else(|| {
            let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
            let mut a_reg = a.clone();
            for k in 0..n {
                a_reg[[k, k]] += ridge.max(1e-12);
            }
            cholesky_factor(&a_reg)
        })
        .map(|l| cholesky_substitute(&l, b))
}

fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                // Relative tolerance so near-singular systems take the ridge retry
                if diag <= a[[i, i]].abs() * 1e-12 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn cholesky_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    // L y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// Gauss-Jordan elimination with partial pivoting (fallback)
fn gauss_jordan_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| aug[[r1, col]].abs().total_cmp(&aug[[r2, col]].abs()))?;
        if aug[[pivot_row, col]].abs() < 1e-10 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        for j in 0..=n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                if factor != 0.0 {
                    for j in 0..=n {
                        aug[[row, j]] -= factor * aug[[col, j]];
                    }
                }
            }
        }
    }

    Some(aug.column(n).to_owned())
}

/// Ordinary least squares via the normal equations
pub fn solve_least_squares(x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>> {
    let penalties = Array1::zeros(x.ncols());
    solve_ridge(x, y, &penalties)
}

/// Least squares with a per-coefficient L2 penalty on the diagonal
pub fn solve_ridge(x: &Array2<f64>, y: &Array1<f64>, penalties: &Array1<f64>) -> Result<Array1<f64>> {
    if x.nrows() != y.len() {
        return Err(ForecastError::TrainingError(format!(
            "design matrix has {} rows but target has {}",
            x.nrows(),
            y.len()
        )));
    }
    if penalties.len() != x.ncols() {
        return Err(ForecastError::TrainingError(
            "penalty vector does not match the number of coefficients".to_string(),
        ));
    }

    let mut xtx = x.t().dot(x);
    for (k, p) in penalties.iter().enumerate() {
        xtx[[k, k]] += p;
    }
    let xty = x.t().dot(y);

    cholesky_solve(&xtx, &xty)
        .or_else(|| gauss_jordan_solve(&xtx, &xty))
        .filter(|beta| beta.iter().all(|v| v.is_finite()))
        .ok_or_else(|| {
            ForecastError::TrainingError("least-squares system is singular".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_exact_fit() {
        // y = 2 + 3x
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![2.0, 5.0, 8.0, 11.0];
        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-9);
        assert!((beta[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ridge_shrinks() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![2.0, 4.0, 6.0];
        let ols = solve_least_squares(&x, &y).unwrap();
        let ridge = solve_ridge(&x, &y, &array![10.0]).unwrap();
        assert!((ols[0] - 2.0).abs() < 1e-9);
        // 28 / (14 + 10)
        assert!((ridge[0] - 28.0 / 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_gauss_jordan_fallback() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let b = array![3.0, 4.0];
        let x = gauss_jordan_solve(&a, &b).unwrap();
        assert_eq!(x.to_vec(), vec![4.0, 3.0]);
    }

    #[test]
    fn test_singular() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let y = array![1.0, 2.0, 3.0];
        // Collinear columns still solve thanks to the ridge retry
        let beta = solve_least_squares(&x, &y).unwrap();
        let fitted = x.dot(&beta);
        assert!((fitted[2] - 3.0).abs() < 1e-3);

        assert!(solve_least_squares(&x, &array![1.0]).is_err());
    }
}
