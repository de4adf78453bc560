//! Sequential Monte Carlo on a bimodal posterior.
//!
//! A uniform prior on `[-10, 10]^2` times a mixture of two well separated
//! Gaussians. Tempering lets the particles find both modes.

use asktell_mcmc::controller::McmcController;
use asktell_mcmc::distributions::{Target, UniformPrior};
use asktell_mcmc::smc::SequentialMonteCarlo;
use asktell_mcmc::stats::log_sum_exp;

use ndarray::{arr1, Array1, ArrayView1};
use std::error::Error;

struct TwoModes {
    prior: UniformPrior,
    modes: [Array1<f64>; 2],
}

impl Target for TwoModes {
    fn dim(&self) -> usize {
        2
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let terms: Array1<f64> = self
            .modes
            .iter()
            .map(|m| {
                let d = &theta - m;
                -0.5 * d.dot(&d) / 0.25
            })
            .collect();
        self.prior.unnorm_log_prob(theta) + log_sum_exp(terms.view())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let prior = UniformPrior::new(arr1(&[-10.0, -10.0]), arr1(&[10.0, 10.0]))?;
    let target = TwoModes {
        prior: prior.clone(),
        modes: [arr1(&[-4.0, -4.0]), arr1(&[4.0, 4.0])],
    };

    let mut smc = SequentialMonteCarlo::new(prior).set_seed(7);
    smc.set_n_particles(4_000)?;
    smc.set_temperature_schedule(vec![0.0, 0.001, 0.005, 0.02, 0.05, 0.1, 0.2, 0.4, 0.7, 1.0])?;
    smc.set_n_kernel_samples(5)?;

    let controller = McmcController::new(target)
        .set_parallel(true)
        .set_progress(true);
    let particles = controller.run_smc(&mut smc)?;

    let upper = particles.column(0).iter().filter(|&&x| x > 0.0).count();
    println!("Final ESS: {:.1}", smc.ess().unwrap_or(0.0));
    println!("Weighted mean: {:.2}", smc.weighted_mean()?);
    println!(
        "Particles near (4, 4): {upper} of {}",
        particles.nrows()
    );
    Ok(())
}
