//! Sequential Monte Carlo on a conjugate normal model.
//!
//! Prior `N(0, 5^2)`, likelihood `N(x; 2, 0.5^2)`, so the posterior is normal
//! with precision `1/25 + 4` and mean `8 / 4.04`.

use asktell_mcmc::controller::McmcController;
use asktell_mcmc::core::Evaluation;
use asktell_mcmc::distributions::{GaussianPrior, Target};
use asktell_mcmc::smc::SequentialMonteCarlo;
use asktell_mcmc::stats::effective_sample_size;
use ndarray::prelude::*;

struct Posterior {
    prior: GaussianPrior,
}

impl Target for Posterior {
    fn dim(&self) -> usize {
        1
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        self.prior.unnorm_log_prob(theta) - 2.0 * (theta[0] - 2.0).powi(2)
    }
}

fn prior() -> GaussianPrior {
    GaussianPrior::new(arr1(&[0.0]), arr1(&[5.0])).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const POSTERIOR_MEAN: f64 = 8.0 / 4.04;

    fn sampler(seed: u64) -> SequentialMonteCarlo<GaussianPrior> {
        let mut smc = SequentialMonteCarlo::new(prior()).set_seed(seed);
        smc.set_n_particles(2_000).unwrap();
        smc.set_linear_schedule(10).unwrap();
        smc.set_n_kernel_samples(3).unwrap();
        smc.set_sigma0(arr2(&[[0.25]])).unwrap();
        smc
    }

    #[test]
    fn test_conjugate_normal_posterior() {
        let mut smc = sampler(42);
        let controller = McmcController::new(Posterior { prior: prior() }).set_parallel(true);
        let particles = controller.run_smc(&mut smc).unwrap();

        assert_eq!(particles.dim(), (2_000, 1));
        assert!(smc.is_finished());
        assert_eq!(smc.temperature(), 0.0);

        let mean = smc.weighted_mean().unwrap();
        assert_abs_diff_eq!(mean[0], POSTERIOR_MEAN, epsilon = 0.2);
        let sd = particles.column(0).std(0.0);
        assert_abs_diff_eq!(sd, (1.0_f64 / 4.04).sqrt(), epsilon = 0.15);
    }

    #[test]
    fn test_weights_survive_without_end_resampling() {
        let mut smc = sampler(42);
        smc.set_resample_end_2_3(false).unwrap();
        McmcController::new(Posterior { prior: prior() })
            .run_smc(&mut smc)
            .unwrap();

        let weights = smc.weights().unwrap();
        let ess = smc.ess().unwrap();
        assert_abs_diff_eq!(ess, effective_sample_size(weights), epsilon = 1e-9);
        assert!(ess >= smc.ess_threshold(), "ess {ess}");
        assert!(ess < 2_000.0, "ess {ess}");
        assert_abs_diff_eq!(weights.sum(), 1.0, epsilon = 1e-12);

        let mean = smc.weighted_mean().unwrap();
        assert_abs_diff_eq!(mean[0], POSTERIOR_MEAN, epsilon = 0.2);
    }

    #[test]
    fn test_manual_loop_matches_controller() {
        let target = Posterior { prior: prior() };
        let mut smc = sampler(3);
        let mut last = None;
        while !smc.is_finished() {
            let xs = smc.ask().unwrap();
            let fs: Vec<Evaluation> = xs
                .rows()
                .into_iter()
                .map(|x| Evaluation::value(target.unnorm_log_prob(x)))
                .collect();
            if let Some(p) = smc.tell(&fs).unwrap() {
                last = Some(p);
            }
        }

        let mut driven = sampler(3);
        let particles = McmcController::new(target).run_smc(&mut driven).unwrap();
        assert_eq!(last, Some(particles));
    }
}
