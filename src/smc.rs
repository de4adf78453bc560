/*!
# Sequential Monte Carlo

A population sampler that anneals `n_particles` weighted particles from the
prior to the posterior through a temperature schedule
`0 = beta_0 < beta_1 < ... < beta_K = 1`, with tempered densities

```text
log pi_beta(x) = beta * log p(x) + (1 - beta) * log prior(x)
```

where `log p` is the (unnormalized) log posterior supplied by the caller.

One sampler round per temperature:

1. Resample (multinomially) if the effective sample size dropped below the
   threshold.
2. Move every particle with `n_kernel_samples` steps of an inner
   single-chain MCMC sampler targeting `pi_beta_i`. The inner samplers are
   built by a [`ChainFactory`] and driven through the same ask/tell protocol.
3. Reweight with the incremental weights `pi_beta_(i+1) / pi_beta_i` and
   optionally resample again.

The first `ask` returns draws from the prior, whose evaluations set the
initial weights `w ∝ exp(beta_1 * (log p - log prior))`. Every completed
round returns a copy of the particles. An `ask` after the last temperature
fails with [`McmcError::ScheduleExhausted`].

## Example

```rust
use asktell_mcmc::core::Evaluation;
use asktell_mcmc::distributions::{GaussianPrior, Target};
use asktell_mcmc::smc::SequentialMonteCarlo;
use ndarray::arr1;

let prior = GaussianPrior::new(arr1(&[0.0]), arr1(&[3.0])).unwrap();
let mut smc = SequentialMonteCarlo::new(prior.clone()).set_seed(1);
smc.set_n_particles(200).unwrap();
smc.set_linear_schedule(5).unwrap();

while !smc.is_finished() {
    let xs = smc.ask().unwrap();
    let fs: Vec<Evaluation> = xs
        .rows()
        .into_iter()
        .map(|x| Evaluation::value(prior.unnorm_log_prob(x) - 0.5 * (x[0] - 1.0).powi(2)))
        .collect();
    smc.tell(&fs).unwrap();
}
assert_eq!(smc.particles().unwrap().nrows(), 200);
```
*/

use ndarray::prelude::*;
use ndarray_stats::SummaryStatisticsExt;
use rand::prelude::*;
use std::cmp::Ordering;

use crate::adaptive_covariance::AdaptiveCovarianceMcmc;
use crate::core::{check_count, check_dim, Evaluation, SingleChainMcmc};
use crate::distributions::Prior;
use crate::error::{McmcError, Result};
use crate::logging::{LogField, Loggable};
use crate::stats::{effective_sample_size, multinomial_counts, normalize_log_weights};

/// Builds the inner single-chain sampler of one particle.
pub trait ChainFactory: Send + Sync {
    /**
    Creates a sampler for one particle.

    # Arguments

    * `x0` - The particle's starting point.
    * `sigma0` - Initial proposal covariance shared by all particles.
    * `seed` - A seed for the sampler's random number generator, drawn from
      the SMC sampler's own generator.
    */
    fn build(
        &self,
        x0: Array1<f64>,
        sigma0: &Array2<f64>,
        seed: u64,
    ) -> Result<Box<dyn SingleChainMcmc>>;
}

impl<F> ChainFactory for F
where
    F: Fn(Array1<f64>, &Array2<f64>, u64) -> Result<Box<dyn SingleChainMcmc>> + Send + Sync,
{
    fn build(
        &self,
        x0: Array1<f64>,
        sigma0: &Array2<f64>,
        seed: u64,
    ) -> Result<Box<dyn SingleChainMcmc>> {
        self(x0, sigma0, seed)
    }
}

/// Builds [`AdaptiveCovarianceMcmc`] samplers, the default inner kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveCovarianceFactory;

impl ChainFactory for AdaptiveCovarianceFactory {
    fn build(
        &self,
        x0: Array1<f64>,
        sigma0: &Array2<f64>,
        seed: u64,
    ) -> Result<Box<dyn SingleChainMcmc>> {
        Ok(Box::new(
            AdaptiveCovarianceMcmc::new(x0, sigma0.clone())?.set_seed(seed),
        ))
    }
}

/// `beta * log p + (1 - beta) * log prior`, exact at both ends of the schedule.
pub fn temper(log_pdf: f64, log_prior: f64, beta: f64) -> f64 {
    if beta == 0.0 {
        log_prior
    } else if beta == 1.0 {
        log_pdf
    } else {
        beta * log_pdf + (1.0 - beta) * log_prior
    }
}

/// Weighted particles.
#[derive(Debug, Clone, PartialEq)]
struct Population {
    samples: Array2<f64>,
    log_pdfs: Array1<f64>,
    log_priors: Array1<f64>,
    weights: Array1<f64>,
}

impl Population {
    fn new(samples: Array2<f64>, log_pdfs: Array1<f64>, log_priors: Array1<f64>) -> Self {
        let n = samples.nrows();
        Self {
            samples,
            log_pdfs,
            log_priors,
            weights: Array1::from_elem(n, 1.0 / n as f64),
        }
    }

    fn len(&self) -> usize {
        self.samples.nrows()
    }

    /// Multiplies the weights by `pi_new / pi_old` and renormalizes.
    /// Returns the new effective sample size.
    fn reweight(&mut self, beta_old: f64, beta_new: f64) -> Result<f64> {
        let log_weights: Array1<f64> = (0..self.len())
            .map(|j| {
                let w = self.weights[j];
                let (f, prior) = (self.log_pdfs[j], self.log_priors[j]);
                let increment = temper(f, prior, beta_new) - temper(f, prior, beta_old);
                if w <= 0.0 || increment.is_nan() {
                    f64::NEG_INFINITY
                } else {
                    w.ln() + increment
                }
            })
            .collect();
        self.weights = normalize_log_weights(log_weights.view())?;
        Ok(effective_sample_size(self.weights.view()))
    }

    /// Multinomial resampling; weights become uniform.
    fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.len();
        let counts = multinomial_counts(n, self.weights.view(), rng);
        let selected: Vec<usize> = counts
            .iter()
            .enumerate()
            .flat_map(|(i, &c)| std::iter::repeat(i).take(c))
            .collect();
        self.samples = self.samples.select(Axis(0), &selected);
        self.log_pdfs = self.log_pdfs.select(Axis(0), &selected);
        self.log_priors = self.log_priors.select(Axis(0), &selected);
        self.weights = Array1::from_elem(n, 1.0 / n as f64);
    }
}

/**
Sequential Monte Carlo with adaptive resampling.

Defaults: 1000 particles, 10 evenly spaced temperatures, one inner MCMC step
per temperature, ESS threshold of half the particles, resampling at the end of
every round, and [`AdaptiveCovarianceMcmc`] inner samplers.

All settings are fixed once the first `ask` succeeded.
*/
pub struct SequentialMonteCarlo<P: Prior> {
    prior: P,
    sigma0: Option<Array2<f64>>,
    factory: Box<dyn ChainFactory>,
    chains: Vec<Box<dyn SingleChainMcmc>>,

    population: Option<Population>,
    proposals: Option<Array2<f64>>,

    schedule: Vec<f64>,
    n_particles: usize,
    n_kernel_samples: usize,
    ess_threshold: Option<f64>,
    resample_end_2_3: bool,

    i_temp: usize,
    i_mcmc: usize,
    last_ess: Option<f64>,
    resampled: bool,
    running: bool,
    seed: u64,
    rng: SmallRng,
}

impl<P: Prior> SequentialMonteCarlo<P> {
    pub fn new(prior: P) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            prior,
            sigma0: None,
            factory: Box::new(AdaptiveCovarianceFactory),
            chains: Vec::new(),
            population: None,
            proposals: None,
            schedule: linspace(10),
            n_particles: 1000,
            n_kernel_samples: 1,
            ess_threshold: None,
            resample_end_2_3: true,
            i_temp: 1,
            i_mcmc: 0,
            last_ess: None,
            resampled: false,
            running: false,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Re-seeds the generator used for prior draws, resampling and inner
    /// sampler seeds.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    pub fn prior(&self) -> &P {
        &self.prior
    }

    fn check_not_running(&self) -> Result<()> {
        if self.running {
            return Err(McmcError::config(
                "settings cannot change once sampling has started",
            ));
        }
        Ok(())
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    pub fn set_n_particles(&mut self, n: usize) -> Result<()> {
        self.check_not_running()?;
        if n < 2 {
            return Err(McmcError::config("need at least 2 particles"));
        }
        if let Some(t) = self.ess_threshold {
            if t > n as f64 {
                return Err(McmcError::config(format!(
                    "ESS threshold {t} exceeds the number of particles {n}"
                )));
            }
        }
        self.n_particles = n;
        Ok(())
    }

    pub fn n_kernel_samples(&self) -> usize {
        self.n_kernel_samples
    }

    /// Number of inner MCMC steps per temperature.
    pub fn set_n_kernel_samples(&mut self, k: usize) -> Result<()> {
        self.check_not_running()?;
        if k < 1 {
            return Err(McmcError::config("need at least 1 kernel sample per temperature"));
        }
        self.n_kernel_samples = k;
        Ok(())
    }

    pub fn temperature_schedule(&self) -> &[f64] {
        &self.schedule
    }

    /// Sets the values of `beta`. They must increase strictly from 0 to 1.
    pub fn set_temperature_schedule(&mut self, schedule: Vec<f64>) -> Result<()> {
        self.check_not_running()?;
        if schedule.len() < 2 {
            return Err(McmcError::config("temperature schedule needs at least 2 values"));
        }
        if schedule.first() != Some(&0.0) || schedule.last() != Some(&1.0) {
            return Err(McmcError::config("temperature schedule must run from 0 to 1"));
        }
        if schedule
            .windows(2)
            .any(|w| w[0].partial_cmp(&w[1]) != Some(Ordering::Less))
        {
            return Err(McmcError::config(
                "temperature schedule must be strictly increasing",
            ));
        }
        self.schedule = schedule;
        Ok(())
    }

    /// `n` evenly spaced values of `beta` from 0 to 1.
    pub fn set_linear_schedule(&mut self, n: usize) -> Result<()> {
        if n < 2 {
            return Err(McmcError::config("temperature schedule needs at least 2 values"));
        }
        self.set_temperature_schedule(linspace(n))
    }

    /// The ESS threshold, defaulting to half the number of particles.
    pub fn ess_threshold(&self) -> f64 {
        self.ess_threshold.unwrap_or(self.n_particles as f64 / 2.0)
    }

    /// Sets the ESS below which particles are resampled; `None` restores the
    /// default.
    pub fn set_ess_threshold(&mut self, threshold: Option<f64>) -> Result<()> {
        self.check_not_running()?;
        if let Some(t) = threshold {
            if t.is_nan() || t <= 0.0 {
                return Err(McmcError::config(format!(
                    "ESS threshold must be positive, got {t}"
                )));
            }
            if t > self.n_particles as f64 {
                return Err(McmcError::config(format!(
                    "ESS threshold {t} exceeds the number of particles {}",
                    self.n_particles
                )));
            }
        }
        self.ess_threshold = threshold;
        Ok(())
    }

    pub fn resample_end_2_3(&self) -> bool {
        self.resample_end_2_3
    }

    /// Whether to resample unconditionally at the end of every round.
    pub fn set_resample_end_2_3(&mut self, resample: bool) -> Result<()> {
        self.check_not_running()?;
        self.resample_end_2_3 = resample;
        Ok(())
    }

    /// Initial proposal covariance handed to the inner samplers.
    ///
    /// Defaults to the per-parameter variance of the initial prior draws,
    /// scaled by `2.38^2 / dim`.
    pub fn set_sigma0(&mut self, sigma0: Array2<f64>) -> Result<()> {
        self.check_not_running()?;
        check_dim(self.dim(), sigma0.nrows())?;
        check_dim(self.dim(), sigma0.ncols())?;
        self.sigma0 = Some(sigma0);
        Ok(())
    }

    /// Replaces the factory building the inner samplers.
    ///
    /// Samplers that need gradients are rejected at the first `ask`.
    pub fn set_chain_factory(&mut self, factory: impl ChainFactory + 'static) -> Result<()> {
        self.check_not_running()?;
        self.factory = Box::new(factory);
        Ok(())
    }

    /// Normalized weights of the particles.
    pub fn weights(&self) -> Option<ArrayView1<'_, f64>> {
        self.population.as_ref().map(|p| p.weights.view())
    }

    /// Effective sample size after the last weight update.
    pub fn ess(&self) -> Option<f64> {
        self.last_ess
    }

    pub fn particles(&self) -> Option<ArrayView2<'_, f64>> {
        self.population.as_ref().map(|p| p.samples.view())
    }

    /// Untempered log-densities of the particles.
    pub fn particle_log_pdfs(&self) -> Option<ArrayView1<'_, f64>> {
        self.population.as_ref().map(|p| p.log_pdfs.view())
    }

    /// `beta` of the last completed round.
    pub fn beta(&self) -> f64 {
        self.schedule[self.i_temp.min(self.schedule.len()) - 1]
    }

    /// `1 - beta` of the last completed round.
    pub fn temperature(&self) -> f64 {
        1.0 - self.beta()
    }

    /// Whether every temperature has been visited.
    pub fn is_finished(&self) -> bool {
        self.population.is_some() && self.i_temp >= self.schedule.len()
    }

    /// Importance-weighted mean of the particles.
    pub fn weighted_mean(&self) -> Result<Array1<f64>> {
        let population = self
            .population
            .as_ref()
            .ok_or(McmcError::Protocol("no particles before the first tell"))?;
        population
            .samples
            .weighted_mean_axis(Axis(0), &population.weights)
            .map_err(|e| McmcError::config(format!("weighted mean undefined: {e}")))
    }

    fn initialise(&mut self) -> Result<Array2<f64>> {
        let n = self.n_particles;
        if self.ess_threshold() > n as f64 {
            return Err(McmcError::config(format!(
                "ESS threshold {} exceeds the number of particles {n}",
                self.ess_threshold()
            )));
        }

        let samples = self.prior.sample(n, &mut self.rng);
        check_dim(self.dim(), samples.ncols())?;
        let sigma0 = match &self.sigma0 {
            Some(s) => s.clone(),
            None => {
                let d = self.dim() as f64;
                let var = samples.var_axis(Axis(0), 0.0);
                Array2::from_diag(&(var * (2.38 * 2.38 / d)))
            }
        };

        let mut chains = Vec::with_capacity(n);
        for row in samples.rows() {
            let mut chain = self.factory.build(row.to_owned(), &sigma0, self.rng.gen())?;
            if chain.needs_gradient() {
                return Err(McmcError::config(
                    "inner samplers of SMC must not need gradients",
                ));
            }
            if chain.needs_initial_phase() {
                chain.set_initial_phase(false);
            }
            chains.push(chain);
        }
        self.chains = chains;
        Ok(samples)
    }

    fn tell_initial(&mut self, proposals: Array2<f64>, replies: &[Evaluation]) -> Result<Array2<f64>> {
        let log_pdfs: Array1<f64> = replies.iter().map(|r| r.log_density).collect();
        let log_priors: Array1<f64> = proposals
            .rows()
            .into_iter()
            .map(|x| self.prior.unnorm_log_prob(x))
            .collect();

        let beta_0 = self.schedule[0];
        for (j, chain) in self.chains.iter_mut().enumerate() {
            chain.ask()?;
            chain.tell(Evaluation::value(temper(log_pdfs[j], log_priors[j], beta_0)))?;
        }

        let mut population = Population::new(proposals.clone(), log_pdfs, log_priors);
        let ess = population.reweight(beta_0, self.schedule[1])?;
        log::debug!("SMC initial ESS {ess:.1} of {}", population.len());
        self.last_ess = Some(ess);
        self.resampled = false;
        self.population = Some(population);
        Ok(proposals)
    }
}

impl<P: Prior> SequentialMonteCarlo<P> {
    pub fn name(&self) -> &'static str {
        "Sequential Monte Carlo"
    }

    /// Returns the points to evaluate next, one row per particle.
    pub fn ask(&mut self) -> Result<Array2<f64>> {
        if self.proposals.is_some() {
            return Err(McmcError::Protocol("ask called while expecting tell"));
        }
        if self.i_temp >= self.schedule.len() {
            return Err(McmcError::ScheduleExhausted {
                steps: self.schedule.len() - 1,
            });
        }

        if self.population.is_none() {
            let samples = self.initialise()?;
            self.running = true;
            self.proposals = Some(samples.clone());
            return Ok(samples);
        }

        let beta = self.schedule[self.i_temp];
        let threshold = self.ess_threshold();
        let Some(population) = self.population.as_mut() else {
            return Err(McmcError::Protocol("sampler is not initialised"));
        };
        if !self.resampled && self.last_ess.is_some_and(|ess| ess < threshold) {
            population.resample(&mut self.rng);
            self.resampled = true;
        }

        let mut proposals = Array2::zeros(population.samples.dim());
        for (j, chain) in self.chains.iter_mut().enumerate() {
            let tempered = temper(population.log_pdfs[j], population.log_priors[j], beta);
            chain.replace(population.samples.row(j), Evaluation::value(tempered))?;
            proposals.row_mut(j).assign(&chain.ask()?);
        }
        self.proposals = Some(proposals.clone());
        Ok(proposals)
    }

    /**
    Consumes one evaluation of the untempered log posterior per particle.

    Returns the prior draws after the first `tell`, `None` after inner MCMC
    steps that do not finish a temperature, and a copy of the particles when
    a round completes.
    */
    pub fn tell(&mut self, replies: &[Evaluation]) -> Result<Option<Array2<f64>>> {
        let Some(expected) = self.proposals.as_ref().map(|p| p.nrows()) else {
            return Err(McmcError::Protocol("tell called while expecting ask"));
        };
        check_count(expected, replies.len())?;
        let Some(proposals) = self.proposals.take() else {
            return Err(McmcError::Protocol("tell called while expecting ask"));
        };

        if self.population.is_none() {
            return self.tell_initial(proposals, replies).map(Some);
        }
        let Some(population) = self.population.as_mut() else {
            return Err(McmcError::Protocol("sampler is not initialised"));
        };

        let beta = self.schedule[self.i_temp];
        for (j, chain) in self.chains.iter_mut().enumerate() {
            let proposed = proposals.row(j);
            let log_pdf = replies[j].log_density;
            let log_prior = self.prior.unnorm_log_prob(proposed);
            let transition = chain.tell(Evaluation::value(temper(log_pdf, log_prior, beta)))?;
            if transition.is_some_and(|t| t.accepted) {
                population.samples.row_mut(j).assign(&proposed);
                population.log_pdfs[j] = log_pdf;
                population.log_priors[j] = log_prior;
            }
        }

        self.i_mcmc += 1;
        if self.i_mcmc < self.n_kernel_samples {
            return Ok(None);
        }
        self.i_mcmc = 0;

        let ess = match self.schedule.get(self.i_temp + 1) {
            Some(&beta_next) => {
                self.resampled = false;
                population.reweight(beta, beta_next)?
            }
            None => effective_sample_size(population.weights.view()),
        };
        self.last_ess = Some(ess);
        if self.resample_end_2_3 {
            population.resample(&mut self.rng);
            self.resampled = true;
        }
        self.i_temp += 1;
        Ok(Some(population.samples.clone()))
    }
}

impl<P: Prior> Loggable for SequentialMonteCarlo<P> {
    fn log_fields(&self) -> Vec<LogField> {
        vec![
            LogField::int("iter", (self.i_temp - 1) as u64),
            LogField::float("temperature", self.temperature()),
            LogField::float("ess", self.last_ess.unwrap_or(0.0)),
        ]
    }
}

fn linspace(n: usize) -> Vec<f64> {
    let last = (n - 1) as f64;
    (0..n)
        .map(|i| if i + 1 == n { 1.0 } else { i as f64 / last })
        .collect()
}
