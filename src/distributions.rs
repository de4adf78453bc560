/*!
Target densities and priors.

The samplers never call a density themselves: they only produce points and
consume [`Evaluation`](crate::core::Evaluation)s. The traits here describe what
a *driver* (such as the [controller](crate::controller)) needs in order to
produce those evaluations, and what the sequential Monte Carlo sampler needs
from its prior.

# Examples

```rust
use asktell_mcmc::distributions::{IsotropicGaussian, Prior, Target, UniformPrior};
use ndarray::arr1;
use rand::SeedableRng;

let target = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 1.0).unwrap();
let (logp, grad) = target.unnorm_log_prob_and_grad(arr1(&[1.0, 0.0]).view()).unwrap();
assert_eq!(logp, -0.5);
assert_eq!(grad, arr1(&[-1.0, 0.0]));

let prior = UniformPrior::new(arr1(&[-1.0, 0.0]), arr1(&[1.0, 5.0])).unwrap();
let mut rng = rand::rngs::SmallRng::seed_from_u64(0);
let draws = prior.sample(10, &mut rng);
assert_eq!(draws.dim(), (10, 2));
assert!(prior.unnorm_log_prob(arr1(&[2.0, 1.0]).view()).is_infinite());
```
*/

use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::core::check_dim;
use crate::error::{McmcError, Result};
use crate::stats::{cholesky_and_inverse, sample_multivariate_normal};

/// An unnormalized log-density over a real vector.
pub trait Target: Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Log of the unnormalized density at `theta`; `-inf` outside the support.
    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64;

    /// Log-density together with its gradient, for targets that provide one.
    fn unnorm_log_prob_and_grad(&self, _theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        None
    }
}

/// A prior that can both be evaluated and sampled from.
pub trait Prior: Target {
    /// Draws `n` independent points, one per row.
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64>;
}

/**
An isotropic Gaussian `N(mean, std^2 I)`.

Useful both as a target with an analytic gradient and as a prior.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct IsotropicGaussian {
    pub mean: Array1<f64>,
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(mean: Array1<f64>, std: f64) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) {
            return Err(McmcError::config(format!(
                "standard deviation must be positive, got {std}"
            )));
        }
        Ok(Self { mean, std })
    }

    /// Standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            std: 1.0,
        }
    }

    /// Fully normalized log-density.
    pub fn log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let d = self.mean.len() as f64;
        self.unnorm_log_prob(theta) - 0.5 * d * (2.0 * PI * self.std * self.std).ln()
    }
}

impl Target for IsotropicGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let sq: f64 = theta
            .iter()
            .zip(self.mean.iter())
            .map(|(x, m)| (x - m) * (x - m))
            .sum();
        -0.5 * sq / (self.std * self.std)
    }

    fn unnorm_log_prob_and_grad(&self, theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        let grad = (&self.mean - &theta) / (self.std * self.std);
        Some((self.unnorm_log_prob(theta), grad))
    }
}

impl Prior for IsotropicGaussian {
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let d = self.mean.len();
        Array2::from_shape_fn((n, d), |(_, j)| {
            self.mean[j] + self.std * rng.sample::<f64, _>(StandardNormal)
        })
    }
}

/**
A multivariate Gaussian with full covariance.

The precision matrix and Cholesky factor are computed once at construction,
so the parameters are read-only afterwards.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Array1<f64>,
    cov: Array2<f64>,
    chol: Array2<f64>,
    precision: Array2<f64>,
    log_det: f64,
}

impl Gaussian {
    pub fn new(mean: Array1<f64>, cov: Array2<f64>) -> Result<Self> {
        check_dim(mean.len(), cov.nrows())?;
        let (chol, precision) = cholesky_and_inverse(cov.view())?;
        let log_det = 2.0 * chol.diag().iter().map(|d| d.ln()).sum::<f64>();
        Ok(Self {
            mean,
            cov,
            chol,
            precision,
            log_det,
        })
    }

    pub fn mean(&self) -> ArrayView1<f64> {
        self.mean.view()
    }

    pub fn cov(&self) -> ArrayView2<f64> {
        self.cov.view()
    }

    /// Inverse of the covariance matrix.
    pub fn precision(&self) -> ArrayView2<f64> {
        self.precision.view()
    }

    /// Fully normalized log-density.
    pub fn log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let d = self.mean.len() as f64;
        self.unnorm_log_prob(theta) - 0.5 * (d * (2.0 * PI).ln() + self.log_det)
    }
}

impl Target for Gaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let diff = &theta - &self.mean;
        -0.5 * diff.dot(&self.precision.dot(&diff))
    }

    fn unnorm_log_prob_and_grad(&self, theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        let diff = &theta - &self.mean;
        let p_diff = self.precision.dot(&diff);
        Some((-0.5 * diff.dot(&p_diff), -p_diff))
    }
}

impl Prior for Gaussian {
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let mut out = Array2::zeros((n, self.mean.len()));
        for mut row in out.rows_mut() {
            row.assign(&sample_multivariate_normal(
                self.mean.view(),
                self.chol.view(),
                rng,
            ));
        }
        out
    }
}

/// Independent Gaussians per dimension, `N(mean_i, std_i^2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPrior {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl GaussianPrior {
    pub fn new(mean: Array1<f64>, std: Array1<f64>) -> Result<Self> {
        check_dim(mean.len(), std.len())?;
        if std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(McmcError::config("standard deviations must be positive"));
        }
        Ok(Self { mean, std })
    }
}

impl Target for GaussianPrior {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        theta
            .iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(x, (m, s))| {
                let z = (x - m) / s;
                -0.5 * z * z - s.ln() - 0.5 * (2.0 * PI).ln()
            })
            .sum()
    }

    fn unnorm_log_prob_and_grad(&self, theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        let grad = Zip::from(&theta)
            .and(&self.mean)
            .and(&self.std)
            .map_collect(|x, m, s| (m - x) / (s * s));
        Some((self.unnorm_log_prob(theta), grad))
    }
}

impl Prior for GaussianPrior {
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        Array2::from_shape_fn((n, self.mean.len()), |(_, j)| {
            self.mean[j] + self.std[j] * rng.sample::<f64, _>(StandardNormal)
        })
    }
}

/// A uniform prior on the box `[lower, upper)`.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformPrior {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
    log_density: f64,
}

impl UniformPrior {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        check_dim(lower.len(), upper.len())?;
        if lower
            .iter()
            .zip(upper.iter())
            .any(|(l, u)| !(l.is_finite() && u.is_finite() && l < u))
        {
            return Err(McmcError::config(
                "uniform prior needs finite bounds with lower < upper",
            ));
        }
        let log_density = -(&upper - &lower).mapv(f64::ln).sum();
        Ok(Self {
            lower,
            upper,
            log_density,
        })
    }
}

impl Target for UniformPrior {
    fn dim(&self) -> usize {
        self.lower.len()
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let inside = theta
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(x, (l, u))| l <= x && x < u);
        if inside {
            self.log_density
        } else {
            f64::NEG_INFINITY
        }
    }

    fn unnorm_log_prob_and_grad(&self, theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        Some((self.unnorm_log_prob(theta), Array1::zeros(theta.len())))
    }
}

impl Prior for UniformPrior {
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        Array2::from_shape_fn((n, self.lower.len()), |(_, j)| {
            let u: f64 = rng.gen();
            self.lower[j] + u * (self.upper[j] - self.lower[j])
        })
    }
}

#[cfg(test)]
mod distributions_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn iso_gauss_log_prob_test_1() {
        let distr = IsotropicGaussian::new(arr1(&[0.0]), 1.0).unwrap();
        let p = distr.log_prob(arr1(&[1.0]).view()).exp();
        let true_p = 0.24197072451914337;
        let diff = (p - true_p).abs();
        assert!(
            diff < 1e-12,
            "Expected diff < 1e-12, got {diff} with p={p} (expected ~{true_p})."
        );
    }

    #[test]
    fn iso_gauss_log_prob_test_2() {
        let distr = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 2.0).unwrap();
        let p = distr.log_prob(arr1(&[0.42, 9.6]).view()).exp();
        let true_p = 3.864661987252467e-7;
        let diff = (p - true_p).abs();
        assert!(
            diff < 1e-15,
            "Expected diff < 1e-15, got {diff} with p={p} (expected ~{true_p})"
        );
    }

    #[test]
    fn iso_gauss_rejects_bad_std() {
        assert!(IsotropicGaussian::new(arr1(&[0.0]), 0.0).is_err());
        assert!(IsotropicGaussian::new(arr1(&[0.0]), f64::NAN).is_err());
    }

    #[test]
    fn gaussian_matches_isotropic_when_diagonal() {
        let full = Gaussian::new(arr1(&[1.0, -1.0]), arr2(&[[4.0, 0.0], [0.0, 4.0]])).unwrap();
        let iso = IsotropicGaussian::new(arr1(&[1.0, -1.0]), 2.0).unwrap();
        let x = arr1(&[0.3, 2.0]);
        assert_abs_diff_eq!(full.log_prob(x.view()), iso.log_prob(x.view()), epsilon = 1e-12);
        let (_, g_full) = full.unnorm_log_prob_and_grad(x.view()).unwrap();
        let (_, g_iso) = iso.unnorm_log_prob_and_grad(x.view()).unwrap();
        assert_abs_diff_eq!(g_full, g_iso, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_correlated_log_prob() {
        // det = 4*3 - 2*2 = 8, precision = [[3, -2], [-2, 4]] / 8
        let g = Gaussian::new(arr1(&[0.0, 0.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        let x = arr1(&[1.0, 1.0]);
        let quad = (3.0 - 2.0 - 2.0 + 4.0) / 8.0;
        assert_abs_diff_eq!(g.unnorm_log_prob(x.view()), -0.5 * quad, epsilon = 1e-12);
        let expected = -0.5 * quad - (2.0 * PI).ln() - 0.5 * 8f64.ln();
        assert_abs_diff_eq!(g.log_prob(x.view()), expected, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_parameters_and_precision() {
        let cov = arr2(&[[2.0, 0.3, 0.1], [0.3, 1.0, -0.4], [0.1, -0.4, 0.8]]);
        let g = Gaussian::new(arr1(&[0.5, -0.2, 1.0]), cov.clone()).unwrap();
        assert_eq!(g.mean(), arr1(&[0.5, -0.2, 1.0]));
        assert_eq!(g.cov(), cov);
        assert_abs_diff_eq!(g.precision().dot(&g.cov()), Array2::<f64>::eye(3), epsilon = 1e-12);
    }

    #[test]
    fn gaussian_rejects_bad_covariance() {
        let not_pd = arr2(&[[1.0, 2.0], [2.0, 1.0]]);
        assert!(matches!(
            Gaussian::new(arr1(&[0.0, 0.0]), not_pd),
            Err(McmcError::Configuration(_))
        ));
        let nan = arr2(&[[1.0, f64::NAN], [f64::NAN, 1.0]]);
        assert!(matches!(
            Gaussian::new(arr1(&[0.0, 0.0]), nan),
            Err(McmcError::Configuration(_))
        ));
        assert!(Gaussian::new(arr1(&[0.0]), Array2::eye(2)).is_err());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let g = Gaussian::new(arr1(&[0.5, -0.2]), arr2(&[[2.0, 0.3], [0.3, 1.0]])).unwrap();
        let x = arr1(&[0.1, 0.7]);
        let (_, grad) = g.unnorm_log_prob_and_grad(x.view()).unwrap();
        let h = 1e-6;
        for i in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = (g.unnorm_log_prob(xp.view()) - g.unnorm_log_prob(xm.view())) / (2.0 * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn uniform_prior_support_and_samples() {
        let prior = UniformPrior::new(arr1(&[0.0, -2.0]), arr1(&[2.0, 2.0])).unwrap();
        assert_abs_diff_eq!(
            prior.unnorm_log_prob(arr1(&[1.0, 0.0]).view()),
            -(8f64.ln()),
            epsilon = 1e-12
        );
        assert_eq!(
            prior.unnorm_log_prob(arr1(&[-0.1, 0.0]).view()),
            f64::NEG_INFINITY
        );
        let mut rng = SmallRng::seed_from_u64(5);
        let draws = prior.sample(500, &mut rng);
        for row in draws.rows() {
            assert!(prior.unnorm_log_prob(row).is_finite());
        }
        assert!(UniformPrior::new(arr1(&[1.0]), arr1(&[1.0])).is_err());
    }

    #[test]
    fn gaussian_prior_samples_have_right_moments() {
        let prior = GaussianPrior::new(arr1(&[3.0, -1.0]), arr1(&[0.5, 2.0])).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let draws = prior.sample(20_000, &mut rng);
        let mean = draws.mean_axis(Axis(0)).unwrap();
        let std = draws.std_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(mean, arr1(&[3.0, -1.0]), epsilon = 0.05);
        assert_abs_diff_eq!(std, arr1(&[0.5, 2.0]), epsilon = 0.05);
        assert!(GaussianPrior::new(arr1(&[0.0]), arr1(&[-1.0])).is_err());
    }
}
