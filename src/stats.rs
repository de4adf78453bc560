//! Numerical helpers shared by the samplers: log-weight normalisation,
//! effective sample size, multinomial resampling counts, Cholesky factors and
//! multivariate normal draws, plus running chain diagnostics.

use nalgebra as na;
use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::QuantileExt;
use num_traits::Float;
use rand::Rng;
use rand_distr::{Binomial, Distribution, StandardNormal};

use crate::error::{McmcError, Result};

/// Numerically stable `ln(sum(exp(x)))`.
///
/// Returns `-inf` for an empty input or when every entry is `-inf`.
pub fn log_sum_exp<T: Float>(x: ArrayView1<T>) -> T {
    let max = x.iter().fold(T::neg_infinity(), |m, &v| m.max(v));
    if !max.is_finite() {
        return max;
    }
    let sum = x.iter().fold(T::zero(), |acc, &v| acc + (v - max).exp());
    max + sum.ln()
}

/// Turns unnormalized log-weights into weights that sum to one.
pub fn normalize_log_weights(log_weights: ArrayView1<f64>) -> Result<Array1<f64>> {
    let lse = log_sum_exp(log_weights);
    if !lse.is_finite() {
        return Err(McmcError::DegenerateWeights);
    }
    Ok(log_weights.mapv(|w| (w - lse).exp()))
}

/// Effective sample size `1 / sum(w_i^2)` of normalized weights.
pub fn effective_sample_size(weights: ArrayView1<f64>) -> f64 {
    1.0 / weights.iter().map(|w| w * w).sum::<f64>()
}

/// Draws replication counts `~ Multinomial(n, weights)`.
///
/// Uses the conditional binomial decomposition. Entries with zero weight
/// always get a count of zero, and the counts always add up to `n`.
pub fn multinomial_counts<R: Rng + ?Sized>(
    n: usize,
    weights: ArrayView1<f64>,
    rng: &mut R,
) -> Vec<usize> {
    let mut counts = vec![0; weights.len()];
    let Some(last) = weights.iter().rposition(|&w| w > 0.0) else {
        return counts;
    };
    let mut remaining = n;
    let mut mass_left: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    for (i, &w) in weights.iter().enumerate().take(last + 1) {
        if remaining == 0 {
            break;
        }
        if w <= 0.0 {
            continue;
        }
        if i == last {
            counts[i] = remaining;
            break;
        }
        let p = if mass_left > 0.0 {
            (w / mass_left).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let k = match Binomial::new(remaining as u64, p) {
            Ok(binomial) => binomial.sample(rng) as usize,
            Err(_) => 0,
        };
        counts[i] = k;
        remaining -= k;
        mass_left -= w;
    }
    counts
}

fn to_nalgebra(a: ArrayView2<f64>) -> na::DMatrix<f64> {
    na::DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_nalgebra(m: &na::DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Cholesky decomposition of a symmetric positive definite matrix.
///
/// Only the lower triangle of `a` is read.
fn decompose(a: ArrayView2<f64>) -> Result<na::Cholesky<f64, na::Dyn>> {
    if a.ncols() != a.nrows() {
        return Err(McmcError::config(format!(
            "covariance must be square, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(McmcError::config("covariance must be finite"));
    }
    na::Cholesky::new(to_nalgebra(a))
        .ok_or_else(|| McmcError::config("covariance must be symmetric positive definite"))
}

/// Lower triangular Cholesky factor `L` with `L L^T = a`.
pub fn cholesky(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    decompose(a).map(|c| from_nalgebra(&c.l()))
}

/// Cholesky factor and inverse of a symmetric positive definite matrix,
/// from a single decomposition.
pub fn cholesky_and_inverse(a: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    let c = decompose(a)?;
    Ok((from_nalgebra(&c.l()), from_nalgebra(&c.inverse())))
}

/// Draws `mean + L z` with `z ~ N(0, I)`, where `chol` is a Cholesky factor.
pub fn sample_multivariate_normal<R: Rng + ?Sized>(
    mean: ArrayView1<f64>,
    chol: ArrayView2<f64>,
    rng: &mut R,
) -> Array1<f64> {
    let z: Array1<f64> = (0..mean.len())
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    &mean + &chol.dot(&z)
}

/// Running acceptance rate of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceTracker {
    n: u64,
    n_accepted: u64,
}

impl AcceptanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, accepted: bool) {
        self.n += 1;
        self.n_accepted += accepted as u64;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    /// Fraction of accepted proposals since the start, `0` before any step.
    pub fn rate(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.n_accepted as f64 / self.n as f64
    }
}

/// Running potential scale reduction factor (R-hat) over several chains.
///
/// Feed it one `n_chains x n_params` array per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_chains x n_params
    mean_sq: Array2<f64>, // n_chains x n_params
}

impl RhatMulti {
    pub fn new(n_chains: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::zeros((n_chains, n_params)),
            mean_sq: Array2::zeros((n_chains, n_params)),
        }
    }

    pub fn step(&mut self, x: ArrayView2<f64>) -> Result<()> {
        if x.dim() != self.mean.dim() {
            return Err(McmcError::Dimension {
                expected: self.mean.len(),
                got: x.len(),
            });
        }
        self.n += 1;
        let n = self.n as f64;
        Zip::from(&mut self.mean)
            .and(&mut self.mean_sq)
            .and(&x)
            .for_each(|m, m2, &v| {
                *m += (v - *m) / n;
                *m2 += (v * v - *m2) / n;
            });
        Ok(())
    }

    /// R-hat per parameter. Needs at least two chains and two iterations.
    pub fn all(&self) -> Result<Array1<f64>> {
        let n_chains = self.mean.nrows();
        if n_chains < 2 || self.n < 2 {
            return Err(McmcError::config(
                "R-hat needs at least two chains and two iterations",
            ));
        }
        let n = self.n as f64;
        let mean_chain = self
            .mean
            .mean_axis(Axis(0))
            .ok_or_else(|| McmcError::config("no chains to average"))?;
        let between = (&self.mean - &mean_chain.insert_axis(Axis(0)))
            .mapv(|d| d * d)
            .sum_axis(Axis(0))
            * (n / (n_chains as f64 - 1.0));
        let sm2 = (&self.mean_sq - &self.mean.mapv(|m| m * m)) * (n / (n - 1.0));
        let within = sm2
            .mean_axis(Axis(0))
            .ok_or_else(|| McmcError::config("no chains to average"))?;
        let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
        Ok((var / within).mapv(f64::sqrt))
    }

    pub fn max(&self) -> Result<f64> {
        let all = self.all()?;
        all.max()
            .copied()
            .map_err(|e| McmcError::config(format!("R-hat undefined: {e}")))
    }
}
