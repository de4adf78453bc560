//! Differential evolution MCMC on a two-dimensional standard normal.

use asktell_mcmc::controller::McmcController;
use asktell_mcmc::differential_evolution::DifferentialEvolutionMcmc;
use asktell_mcmc::distributions::IsotropicGaussian;
use ndarray::prelude::*;
use ndarray_stats::CorrelationExt;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SEED: u64 = 42;

    fn starting_points(n_chains: usize) -> Array2<f64> {
        let mut rng = SmallRng::seed_from_u64(SEED);
        Array2::from_shape_fn((n_chains, 2), |_| {
            1.0 + rng.sample::<f64, _>(StandardNormal)
        })
    }

    #[test]
    fn test_two_d_standard_normal() {
        const N_CHAINS: usize = 4;
        const ITERATIONS: usize = 5_000;
        const BURNIN: usize = 1_000;

        let mut de = DifferentialEvolutionMcmc::new(starting_points(N_CHAINS))
            .unwrap()
            .set_seed(SEED);
        assert!(de.warnings().is_empty());
        // Four chains only span a few difference directions, so the error
        // term has to be large enough to move the ensemble off them.
        de.set_relative_scaling(false);
        de.set_scale_coefficient(0.5).unwrap();

        let controller = McmcController::new(IsotropicGaussian::standard(2))
            .set_max_iterations(ITERATIONS)
            .set_log_interval(0);
        let chains = controller.run_multi(&mut de).unwrap();
        assert_eq!(chains.dim(), (N_CHAINS, ITERATIONS, 2));

        let kept = chains.slice(s![.., BURNIN.., ..]);
        let pooled = kept
            .to_owned()
            .into_shape_with_order((N_CHAINS * (ITERATIONS - BURNIN), 2))
            .unwrap();

        let mean = pooled.mean_axis(Axis(0)).unwrap();
        assert_abs_diff_eq!(mean, arr1(&[0.0, 0.0]), epsilon = 0.1);

        let cov = pooled.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(cov, Array2::<f64>::eye(2), epsilon = 0.1);

        let rates = de.acceptance_rates();
        assert!(rates.iter().all(|&r| r > 0.1 && r < 0.9), "{rates}");
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = || {
            let mut de = DifferentialEvolutionMcmc::new(starting_points(5))
                .unwrap()
                .set_seed(SEED);
            McmcController::new(IsotropicGaussian::standard(2))
                .set_max_iterations(300)
                .run_multi(&mut de)
                .unwrap()
        };
        assert_eq!(run(), run());
    }
}
