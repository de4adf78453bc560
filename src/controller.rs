/*!
Driving loops.

[`McmcController`] owns a [`Target`] and runs samplers through the ask/tell
cycle until a fixed number of samples has been collected:

1. `ask` the sampler for point(s),
2. evaluate the target at each point (with its gradient when the sampler
   [needs one](crate::core::SingleChainMcmc::needs_gradient)), in parallel
   with `rayon` if enabled,
3. `tell` the results back and record any new samples.

Progress goes to the `log` facade as fixed-width rows every `log_interval`
samples, and optionally to an `indicatif` progress bar.

# Example

```rust
use asktell_mcmc::controller::McmcController;
use asktell_mcmc::differential_evolution::DifferentialEvolutionMcmc;
use asktell_mcmc::distributions::IsotropicGaussian;
use ndarray::Array2;

let target = IsotropicGaussian::standard(2);
let x0 = Array2::from_shape_fn((4, 2), |(i, j)| 0.1 * (i + j) as f64);
let mut de = DifferentialEvolutionMcmc::new(x0).unwrap().set_seed(0);

let controller = McmcController::new(target).set_max_iterations(200);
let chains = controller.run_multi(&mut de).unwrap();
assert_eq!(chains.dim(), (4, 200, 2));
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::core::{check_dim, Evaluation, MultiChainMcmc, SingleChainMcmc};
use crate::distributions::{Prior, Target};
use crate::error::{McmcError, Result};
use crate::logging::{LogField, LogTable, Loggable};
use crate::smc::SequentialMonteCarlo;
use crate::stats::RhatMulti;

/// Runs samplers against a target density.
#[derive(Debug, Clone)]
pub struct McmcController<T: Target> {
    target: T,
    max_iterations: usize,
    log_interval: usize,
    initial_phase_iterations: usize,
    parallel: bool,
    progress: bool,
}

impl<T: Target> McmcController<T> {
    /// A controller collecting 10000 samples per chain, logging every 20.
    pub fn new(target: T) -> Self {
        Self {
            target,
            max_iterations: 10_000,
            log_interval: 20,
            initial_phase_iterations: 200,
            parallel: false,
            progress: false,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Number of samples to collect per chain.
    pub fn set_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Emit a log row every `interval` samples; `0` disables the rows.
    pub fn set_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }

    /// Number of samples during which samplers with an initial phase run
    /// without adaptation.
    pub fn set_initial_phase_iterations(mut self, iterations: usize) -> Self {
        self.initial_phase_iterations = iterations;
        self
    }

    /// Evaluate the points of a round (and independent chains) in parallel.
    pub fn set_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Show a progress bar on stderr.
    pub fn set_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn check_target(&self, dim: usize, needs_gradient: bool) -> Result<()> {
        check_dim(self.target.dim(), dim)?;
        if needs_gradient {
            let probe = Array1::zeros(dim);
            if self.target.unnorm_log_prob_and_grad(probe.view()).is_none() {
                return Err(McmcError::MissingGradient);
            }
        }
        Ok(())
    }

    fn evaluate(&self, x: ArrayView1<f64>, gradient: bool) -> Result<Evaluation> {
        check_dim(self.target.dim(), x.len())?;
        if gradient {
            self.target
                .unnorm_log_prob_and_grad(x)
                .map(Evaluation::from)
                .ok_or(McmcError::MissingGradient)
        } else {
            Ok(Evaluation::value(self.target.unnorm_log_prob(x)))
        }
    }

    fn evaluate_rows(&self, xs: &Array2<f64>, gradient: bool) -> Result<Vec<Evaluation>> {
        if self.parallel {
            (0..xs.nrows())
                .into_par_iter()
                .map(|i| self.evaluate(xs.row(i), gradient))
                .collect()
        } else {
            xs.rows()
                .into_iter()
                .map(|x| self.evaluate(x, gradient))
                .collect()
        }
    }

    /**
    Runs a single chain until `max_iterations` samples are collected.

    Samplers that [need an initial phase](SingleChainMcmc::needs_initial_phase)
    run it for the first `initial_phase_iterations` samples.

    # Returns

    The chain as an `iterations x dim` array, starting with the initial point.
    */
    pub fn run_single(&self, sampler: &mut dyn SingleChainMcmc) -> Result<Array2<f64>> {
        self.check_target(sampler.dim(), sampler.needs_gradient())?;
        let mut reporter = Reporter::new(sampler.name(), self.max_iterations, self);
        let chain = self.sample_chain(sampler, |n, s| reporter.update(n, &s.log_fields(), None))?;
        reporter.finish();
        Ok(chain)
    }

    fn sample_chain(
        &self,
        sampler: &mut dyn SingleChainMcmc,
        mut on_sample: impl FnMut(usize, &dyn SingleChainMcmc),
    ) -> Result<Array2<f64>> {
        let gradient = sampler.needs_gradient();
        let use_initial_phase = sampler.needs_initial_phase() && self.initial_phase_iterations > 0;
        if sampler.needs_initial_phase() {
            sampler.set_initial_phase(use_initial_phase);
        }

        let mut chain = Array2::zeros((self.max_iterations, sampler.dim()));
        let mut n = 0;
        while n < self.max_iterations {
            let x = sampler.ask()?;
            let reply = self.evaluate(x.view(), gradient)?;
            if let Some(t) = sampler.tell(reply)? {
                chain.row_mut(n).assign(&t.sample);
                n += 1;
                if use_initial_phase && n == self.initial_phase_iterations {
                    sampler.set_initial_phase(false);
                }
                on_sample(n, &*sampler);
            }
        }
        Ok(chain)
    }

    /**
    Runs several independent single-chain samplers side by side.

    With `parallel` on, each chain runs on its own `rayon` task.

    # Returns

    The chains as a `chain x iteration x dim` array.
    */
    pub fn run_independent(
        &self,
        samplers: &mut [Box<dyn SingleChainMcmc>],
    ) -> Result<Array3<f64>> {
        let Some(first) = samplers.first() else {
            return Err(McmcError::config("no samplers to run"));
        };
        let dim = first.dim();
        for s in samplers.iter() {
            check_dim(dim, s.dim())?;
            self.check_target(s.dim(), s.needs_gradient())?;
        }

        log::info!(
            "running {} independent {} chains for {} iterations",
            samplers.len(),
            first.name(),
            self.max_iterations
        );
        let chains: Vec<Array2<f64>> = if self.parallel {
            samplers
                .par_iter_mut()
                .map(|s| self.sample_chain(s.as_mut(), |_, _| {}))
                .collect::<Result<_>>()?
        } else {
            samplers
                .iter_mut()
                .map(|s| self.sample_chain(s.as_mut(), |_, _| {}))
                .collect::<Result<_>>()?
        };

        let mut out = Array3::zeros((chains.len(), self.max_iterations, dim));
        for (mut slot, chain) in out.outer_iter_mut().zip(chains.iter()) {
            slot.assign(chain);
        }
        Ok(out)
    }

    /**
    Runs a multi-chain sampler until every chain holds `max_iterations`
    samples.

    The progress bar also shows the largest R-hat over the parameters.

    # Returns

    The chains as a `chain x iteration x dim` array.
    */
    pub fn run_multi(&self, sampler: &mut dyn MultiChainMcmc) -> Result<Array3<f64>> {
        let (n_chains, dim) = (sampler.n_chains(), sampler.dim());
        let gradient = sampler.needs_gradient();
        self.check_target(dim, gradient)?;

        let mut out = Array3::zeros((n_chains, self.max_iterations, dim));
        let mut rhat = RhatMulti::new(n_chains, dim);
        let mut reporter = Reporter::new(sampler.name(), self.max_iterations, self);
        let mut n = 0;
        while n < self.max_iterations {
            let xs = sampler.ask()?;
            let replies = self.evaluate_rows(&xs, gradient)?;
            if let Some(current) = sampler.tell(&replies)? {
                out.slice_mut(s![.., n, ..]).assign(&current);
                rhat.step(current.view())?;
                n += 1;
                let extra = rhat.max().ok().map(|r| format!("max(rhat)={r:.2}"));
                reporter.update(n, &sampler.log_fields(), extra);
            }
        }
        reporter.finish();
        Ok(out)
    }

    /**
    Runs sequential Monte Carlo through its whole temperature schedule.

    The controller's target must be the log posterior, i.e. include the
    prior. `max_iterations` does not apply: the schedule decides the number
    of rounds.

    # Returns

    The final particles, one per row.
    */
    pub fn run_smc<P: Prior>(&self, smc: &mut SequentialMonteCarlo<P>) -> Result<Array2<f64>> {
        self.check_target(smc.dim(), false)?;
        let rounds = smc.temperature_schedule().len();
        let mut reporter = Reporter::new(smc.name(), rounds, self);
        let mut particles = None;
        let mut n = 0;
        while !smc.is_finished() {
            let xs = smc.ask()?;
            let replies = self.evaluate_rows(&xs, false)?;
            if let Some(p) = smc.tell(&replies)? {
                particles = Some(p);
                n += 1;
                reporter.update(n, &smc.log_fields(), None);
            }
        }
        reporter.finish();
        particles.ok_or(McmcError::Protocol("sampler produced no particles"))
    }
}

/// Log rows and progress bar of one run.
struct Reporter {
    table: LogTable,
    bar: Option<ProgressBar>,
    interval: usize,
    header_written: bool,
}

impl Reporter {
    fn new<T: Target>(name: &str, total: usize, controller: &McmcController<T>) -> Self {
        let bar = controller.progress.then(|| {
            let pb = ProgressBar::new(total as u64);
            let style = ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .map(|s| s.progress_chars("=>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb.set_prefix(name.to_string());
            pb
        });
        log::info!("running {name} for {total} iterations");
        Self {
            table: LogTable::default(),
            bar,
            interval: controller.log_interval,
            header_written: false,
        }
    }

    fn update(&mut self, iteration: usize, fields: &[LogField], extra: Option<String>) {
        if self.interval > 0 {
            if !self.header_written {
                log::info!("{}", self.table.header(fields));
                self.header_written = true;
            }
            if iteration == 1 || iteration % self.interval == 0 {
                log::info!("{}", self.table.row(fields));
            }
        }
        if let Some(pb) = &self.bar {
            pb.inc(1);
            let mut msg = LogTable::inline(fields);
            if let Some(extra) = extra {
                msg.push(' ');
                msg.push_str(&extra);
            }
            pb.set_message(msg);
        }
    }

    fn finish(&self) {
        if let Some(pb) = &self.bar {
            pb.finish_with_message("Done!");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive_covariance::AdaptiveCovarianceMcmc;
    use crate::differential_evolution::DifferentialEvolutionMcmc;
    use crate::distributions::{GaussianPrior, IsotropicGaussian};
    use crate::hamiltonian::HamiltonianMcmc;

    /// A target that only provides values.
    struct ValueOnly;

    impl Target for ValueOnly {
        fn dim(&self) -> usize {
            1
        }

        fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
            -0.5 * theta[0] * theta[0]
        }
    }

    #[test]
    fn test_run_single_hmc_shape() {
        let controller = McmcController::new(IsotropicGaussian::standard(2))
            .set_max_iterations(50)
            .set_log_interval(10);
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.5, 0.5])).unwrap().set_seed(1);
        let chain = controller.run_single(&mut hmc).unwrap();
        assert_eq!(chain.dim(), (50, 2));
        assert_eq!(chain.row(0), arr1(&[0.5, 0.5]));
    }

    #[test]
    fn test_missing_gradient() {
        let controller = McmcController::new(ValueOnly).set_max_iterations(5);
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0])).unwrap();
        assert_eq!(
            controller.run_single(&mut hmc),
            Err(McmcError::MissingGradient)
        );
        let mut mcmc = AdaptiveCovarianceMcmc::new(arr1(&[0.0]), arr2(&[[1.0]])).unwrap();
        assert!(controller.run_single(&mut mcmc).is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let controller = McmcController::new(IsotropicGaussian::standard(3));
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0])).unwrap();
        assert_eq!(
            controller.run_single(&mut hmc),
            Err(McmcError::Dimension {
                expected: 3,
                got: 1
            })
        );
    }

    #[test]
    fn test_initial_phase_is_switched_off() {
        let controller = McmcController::new(ValueOnly)
            .set_max_iterations(30)
            .set_initial_phase_iterations(10);
        let mut mcmc = AdaptiveCovarianceMcmc::new(arr1(&[0.0]), arr2(&[[1.0]]))
            .unwrap()
            .set_seed(8);
        controller.run_single(&mut mcmc).unwrap();
        assert!(!mcmc.in_initial_phase());
        assert_ne!(mcmc.log_lambda(), 0.0);
    }

    #[test]
    fn test_run_multi_parallel_matches_serial() {
        let x0 = Array2::from_shape_fn((5, 2), |(i, j)| 0.2 * i as f64 - 0.1 * j as f64);
        let run = |parallel: bool| {
            let controller = McmcController::new(IsotropicGaussian::standard(2))
                .set_max_iterations(100)
                .set_parallel(parallel);
            let mut de = DifferentialEvolutionMcmc::new(x0.clone()).unwrap().set_seed(12);
            controller.run_multi(&mut de).unwrap()
        };
        let serial = run(false);
        assert_eq!(serial.dim(), (5, 100, 2));
        assert_eq!(serial, run(true));
    }

    #[test]
    fn test_run_independent() {
        let controller = McmcController::new(IsotropicGaussian::standard(1))
            .set_max_iterations(40)
            .set_parallel(true);
        let mut samplers: Vec<Box<dyn SingleChainMcmc>> = (0..3)
            .map(|i| -> Box<dyn SingleChainMcmc> {
                Box::new(
                    HamiltonianMcmc::new(arr1(&[i as f64]))
                        .unwrap()
                        .set_seed(i),
                )
            })
            .collect();
        let chains = controller.run_independent(&mut samplers).unwrap();
        assert_eq!(chains.dim(), (3, 40, 1));
        assert_eq!(chains[[2, 0, 0]], 2.0);
        assert!(controller.run_independent(&mut []).is_err());
    }

    #[test]
    fn test_run_smc() {
        let prior = GaussianPrior::new(arr1(&[0.0]), arr1(&[2.0])).unwrap();
        // Posterior proportional to prior times N(x; 1, 0.5^2).
        let posterior = Gaussian1d { prior: prior.clone() };
        let mut smc = SequentialMonteCarlo::new(prior).set_seed(4);
        smc.set_n_particles(300).unwrap();
        smc.set_linear_schedule(6).unwrap();
        let controller = McmcController::new(posterior).set_parallel(true);
        let particles = controller.run_smc(&mut smc).unwrap();
        assert_eq!(particles.dim(), (300, 1));
        assert!(smc.is_finished());
    }

    struct Gaussian1d {
        prior: GaussianPrior,
    }

    impl Target for Gaussian1d {
        fn dim(&self) -> usize {
            1
        }

        fn unnorm_log_prob(&self, theta: ArrayView1<f64>) -> f64 {
            self.prior.unnorm_log_prob(theta) - 2.0 * (theta[0] - 1.0).powi(2)
        }
    }
}
