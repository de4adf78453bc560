//! Drives Hamiltonian MCMC by hand, without the controller.
//!
//! The evaluation loop lives here: every `ask` is answered with the log
//! density and gradient of a 3D Gaussian with unequal scales.

use asktell_mcmc::core::{Evaluation, SingleChainMcmc};
use asktell_mcmc::distributions::Target;
use asktell_mcmc::hamiltonian::HamiltonianMcmc;

use ndarray::{arr1, s, Array1, Array2, ArrayView1, Axis};
use std::error::Error;

/// Independent normals with standard deviations 1, 2 and 0.5.
struct Scaled {
    std: Array1<f64>,
}

impl Target for Scaled {
    fn dim(&self) -> usize {
        self.std.len()
    }

    fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let z = &theta / &self.std;
        -0.5 * z.dot(&z)
    }

    fn unnorm_log_prob_and_grad(&self, theta: ArrayView1<f64>) -> Option<(f64, Array1<f64>)> {
        let grad = -(&theta / &self.std.mapv(|s| s * s));
        Some((self.unnorm_log_prob(theta), grad))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    const ITERATIONS: usize = 3_000;

    let target = Scaled {
        std: arr1(&[1.0, 2.0, 0.5]),
    };
    let mut hmc = HamiltonianMcmc::new(arr1(&[3.0, 3.0, 3.0]))?.set_seed(42);
    hmc.set_leapfrog_steps(15)?;
    hmc.set_leapfrog_step_size(0.15)?;

    let mut chain = Array2::zeros((ITERATIONS, target.dim()));
    let mut n = 0;
    let mut evaluations = 0;
    while n < ITERATIONS {
        let x = hmc.ask()?;
        let (f, g) = target
            .unnorm_log_prob_and_grad(x.view())
            .ok_or("target has no gradient")?;
        evaluations += 1;
        if let Some(t) = hmc.tell(Evaluation::with_gradient(f, g))? {
            chain.row_mut(n).assign(&t.sample);
            n += 1;
        }
    }

    let kept = chain.slice(s![500.., ..]);
    println!("{evaluations} evaluations for {ITERATIONS} samples");
    println!("Acceptance rate: {:.2}", hmc.acceptance_rate());
    println!("Divergent iterations: {:?}", hmc.divergent_iterations());
    println!("Mean: {:.2}", kept.mean_axis(Axis(0)).ok_or("no samples")?);
    println!("Std:  {:.2} (expected [1, 2, 0.5])", kept.std_axis(Axis(0), 1.0));
    Ok(())
}
