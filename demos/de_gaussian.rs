//! Differential evolution MCMC on a correlated 2D Gaussian, with a progress bar.

use asktell_mcmc::controller::McmcController;
use asktell_mcmc::differential_evolution::DifferentialEvolutionMcmc;
use asktell_mcmc::distributions::Gaussian;

use ndarray::{arr1, arr2, s, Array2, Axis};
use ndarray_stats::CorrelationExt;
use rand::{thread_rng, Rng};
use std::error::Error;

#[cfg(feature = "csv")]
use asktell_mcmc::io::save_csv;

fn main() -> Result<(), Box<dyn Error>> {
    const ITERATIONS: usize = 10_000;
    const BURNIN: usize = 2_000;
    const N_CHAINS: usize = 6;
    let seed: u64 = thread_rng().gen();

    let target = Gaussian::new(arr1(&[1.0, -1.0]), arr2(&[[2.0, 1.0], [1.0, 2.0]]))?;
    let x0 = Array2::from_shape_fn((N_CHAINS, 2), |(i, j)| i as f64 - 2.0 * j as f64);
    let mut de = DifferentialEvolutionMcmc::new(x0)?.set_seed(seed);
    for warning in de.warnings() {
        println!("warning: {warning}");
    }

    let controller = McmcController::new(target)
        .set_max_iterations(ITERATIONS)
        .set_log_interval(0)
        .set_progress(true);
    let chains = controller.run_multi(&mut de)?;

    let kept = chains.slice(s![.., BURNIN.., ..]).to_owned();
    let pooled = kept.to_shape((N_CHAINS * (ITERATIONS - BURNIN), 2))?;
    let mean = pooled.mean_axis(Axis(0)).ok_or("no samples")?;
    let cov = pooled.t().cov(1.0)?;
    println!("Mean after burn-in: ({:.2}, {:.2})", mean[0], mean[1]);
    println!("Covariance after burn-in:\n{:.2}", cov);
    println!("Acceptance rates: {:.2}", de.acceptance_rates());

    #[cfg(feature = "csv")]
    {
        save_csv(chains.view(), "de_chains.csv")?;
        println!("Saved chains in file de_chains.csv.");
    }

    Ok(())
}
