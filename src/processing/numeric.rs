//! Small linear-algebra and integration helpers shared by the smoothing,
//! baseline and quantification code.

use crate::error::{EngineError, Result};

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// `a` is row-major `n × n`. Returns `None` for a (numerically) singular
/// system.
pub fn solve_dense(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Least-squares polynomial fit of `y` against `t`, evaluated at every `t`.
///
/// `t` should be well scaled (e.g. mapped into `[-1, 1]`).
pub fn polyfit_eval(t: &[f64], y: &[f64], order: usize) -> Result<Vec<f64>> {
    let terms = order + 1;
    if t.len() < terms {
        return Err(EngineError::insufficient_data(format!(
            "polynomial order {order} needs at least {terms} points, got {}",
            t.len()
        )));
    }

    let mut normal = vec![vec![0.0; terms]; terms];
    let mut rhs = vec![0.0; terms];
    let mut powers = vec![1.0; 2 * terms - 1];
    for (&ti, &yi) in t.iter().zip(y) {
        for p in 1..powers.len() {
            powers[p] = powers[p - 1] * ti;
        }
        for r in 0..terms {
            rhs[r] += powers[r] * yi;
            for c in 0..terms {
                normal[r][c] += powers[r + c];
            }
        }
    }

    let coeffs = solve_dense(normal, rhs).ok_or_else(|| {
        EngineError::insufficient_data(format!("polynomial fit of order {order} is singular"))
    })?;

    Ok(t.iter().map(|&ti| horner(&coeffs, ti)).collect())
}

/// Evaluate `c[0] + c[1]·t + c[2]·t² + …`.
pub fn horner(coeffs: &[f64], t: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

/// Map `x` linearly onto `[-1, 1]` (a zero-width axis maps to 0).
pub fn scale_to_unit(x: &[f64]) -> Vec<f64> {
    let (min, max) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = max - min;
    if !(span > 0.0) {
        return vec![0.0; x.len()];
    }
    x.iter().map(|&v| 2.0 * (v - min) / span - 1.0).collect()
}

/// Trapezoidal rule ∫ y dx over paired samples.
///
/// The sign follows the direction of `x`: a descending axis yields the
/// negated area, the same as numpy's `trapezoid`.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Median of a slice (average of the two central values for even lengths).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ---------------------------------------------------------------------------
// Banded symmetric positive-definite systems
// ---------------------------------------------------------------------------

/// Lower band of a symmetric matrix with half-bandwidth `bw`.
///
/// Entry `(i, j)` with `i - bw <= j <= i` lives at `i * (bw + 1) + (j + bw - i)`.
#[derive(Debug, Clone)]
pub struct BandedMatrix {
    n: usize,
    bw: usize,
    data: Vec<f64>,
}

impl BandedMatrix {
    pub fn zeros(n: usize, bw: usize) -> Self {
        BandedMatrix {
            n,
            bw,
            data: vec![0.0; n * (bw + 1)],
        }
    }

    fn slot(&self, i: usize, j: usize) -> usize {
        debug_assert!(j <= i && i - j <= self.bw);
        i * (self.bw + 1) + (j + self.bw - i)
    }

    /// Value at `(i, j)`; symmetric access, zero outside the band.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (i, j) = if i >= j { (i, j) } else { (j, i) };
        if i - j > self.bw {
            return 0.0;
        }
        self.data[self.slot(i, j)]
    }

    /// Add `v` at `(i, j)` (and implicitly at `(j, i)`).
    pub fn add(&mut self, i: usize, j: usize, v: f64) {
        let (i, j) = if i >= j { (i, j) } else { (j, i) };
        let slot = self.slot(i, j);
        self.data[slot] += v;
    }

    /// Solve `A · x = b` via banded Cholesky factorisation.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>> {
        let n = self.n;
        let bw = self.bw;
        let mut l = self.clone();

        for i in 0..n {
            let j0 = i.saturating_sub(bw);
            for j in j0..=i {
                let k0 = j0.max(j.saturating_sub(bw));
                let mut sum = l.get(i, j);
                for k in k0..j {
                    sum -= l.get(i, k) * l.get(j, k);
                }
                let slot = l.slot(i, j);
                if i == j {
                    if sum <= 0.0 || !sum.is_finite() {
                        return Err(EngineError::invalid_data(
                            "banded system is not positive definite",
                        ));
                    }
                    l.data[slot] = sum.sqrt();
                } else {
                    l.data[slot] = sum / l.get(j, j);
                }
            }
        }

        let mut z = vec![0.0; n];
        for i in 0..n {
            let k0 = i.saturating_sub(bw);
            let tail: f64 = (k0..i).map(|k| l.get(i, k) * z[k]).sum();
            z[i] = (b[i] - tail) / l.get(i, i);
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let k1 = (i + bw).min(n - 1);
            let tail: f64 = (i + 1..=k1).map(|k| l.get(k, i) * x[k]).sum();
            x[i] = (z[i] - tail) / l.get(i, i);
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn dense_solver() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_dense(a, vec![3.0, 5.0]).unwrap();
        assert!(close(x[0], 0.8) && close(x[1], 1.4));
        assert!(solve_dense(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn polyfit_recovers_quadratic() {
        let x: Vec<f64> = (0..9).map(|i| 4000.0 - 250.0 * i as f64).collect();
        let t = scale_to_unit(&x);
        assert!(close(t[0], 1.0) && close(t[8], -1.0));
        let y: Vec<f64> = t.iter().map(|v| 1.0 - 2.0 * v + 3.0 * v * v).collect();
        let fit = polyfit_eval(&t, &y, 2).unwrap();
        for (a, b) in fit.iter().zip(&y) {
            assert!(close(*a, *b));
        }
        assert!(polyfit_eval(&t[..2], &y[..2], 2).is_err());
    }

    #[test]
    fn trapezoid_follows_axis_direction() {
        assert!(close(trapezoid(&[0.0, 0.0, 10.0, 0.0, 0.0], &[0.0, 1.0, 2.0, 3.0, 4.0]), 10.0));
        assert!(close(trapezoid(&[1.0, 1.0], &[2.0, 0.0]), -2.0));
        assert_eq!(trapezoid(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn banded_matches_dense() {
        let n = 6;
        let mut band = BandedMatrix::zeros(n, 2);
        let mut dense = vec![vec![0.0; n]; n];
        for i in 0..n {
            band.add(i, i, 6.0);
            dense[i][i] += 6.0;
            if i + 1 < n {
                band.add(i + 1, i, -2.0);
                dense[i + 1][i] -= 2.0;
                dense[i][i + 1] -= 2.0;
            }
            if i + 2 < n {
                band.add(i + 2, i, 0.5);
                dense[i + 2][i] += 0.5;
                dense[i][i + 2] += 0.5;
            }
        }
        let b: Vec<f64> = (0..n).map(|i| i as f64 + 1.0).collect();
        let xb = band.solve(&b).unwrap();
        let xd = solve_dense(dense, b).unwrap();
        for (a, c) in xb.iter().zip(&xd) {
            assert!(close(*a, *c));
        }
    }

    #[test]
    fn median_and_std() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(close(std_dev(&[1.0, 1.0, 1.0]), 0.0));
        assert!(close(std_dev(&[0.0, 2.0]), 1.0));
    }
}
