/*!
Adaptive covariance Metropolis (Haario–Bardenet).

A random walk Metropolis sampler whose Gaussian proposal `N(x, lambda * Sigma)`
learns its covariance from the chain. After the `k`-th adapting step
(`k = 1, 2, ...`), with `gamma = (k + 1)^-eta`:

```text
mu           <- (1 - gamma) mu + gamma x
Sigma        <- (1 - gamma) Sigma + gamma (x - mu)(x - mu)^T
log(lambda)  <- log(lambda) + gamma (alpha - 0.234)
```

where `alpha = min(1, p(x') / p(x))` is the acceptance probability of the
step. Adaptation is skipped during the initial phase. This is the default
inner sampler of [sequential Monte Carlo](crate::smc), which switches the
initial phase off.
*/

use ndarray::prelude::*;
use rand::prelude::*;

use crate::core::{
    check_dim, metropolis_accept, Evaluation, SingleChainMcmc, Transition, TunableMethod,
};
use crate::error::{McmcError, Result};
use crate::logging::{LogField, Loggable};
use crate::stats::{cholesky, sample_multivariate_normal, AcceptanceTracker};

/// Random walk Metropolis with Haario–Bardenet covariance adaptation.
///
/// # Examples
///
/// ```rust
/// use asktell_mcmc::adaptive_covariance::AdaptiveCovarianceMcmc;
/// use asktell_mcmc::core::{Evaluation, SingleChainMcmc};
/// use ndarray::{arr1, arr2};
///
/// let mut mcmc = AdaptiveCovarianceMcmc::new(arr1(&[0.0]), arr2(&[[1.0]]))
///     .unwrap()
///     .set_seed(1);
/// mcmc.set_initial_phase(false);
/// for _ in 0..500 {
///     let x = mcmc.ask().unwrap();
///     let t = mcmc.tell(Evaluation::value(-0.5 * x[0] * x[0])).unwrap();
///     assert!(t.is_some());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AdaptiveCovarianceMcmc {
    x0: Array1<f64>,
    current: Option<Array1<f64>>,
    current_log_pdf: f64,
    proposed: Option<Array1<f64>>,

    mu: Array1<f64>,
    sigma: Array2<f64>,
    chol: Array2<f64>,
    log_lambda: f64,
    eta: f64,
    target_acceptance: f64,
    initial_phase: bool,
    adaptations: u64,

    iterations: u64,
    acceptance: AcceptanceTracker,
    seed: u64,
    rng: SmallRng,
}

impl AdaptiveCovarianceMcmc {
    /**
    Creates a sampler starting at `x0` with initial proposal covariance `sigma0`.

    The initial phase is on: call
    [`set_initial_phase(false)`](SingleChainMcmc::set_initial_phase) to start
    adapting.
    */
    pub fn new(x0: Array1<f64>, sigma0: Array2<f64>) -> Result<Self> {
        if x0.is_empty() {
            return Err(McmcError::config("points must have at least one parameter"));
        }
        check_dim(x0.len(), sigma0.nrows())?;
        let chol = cholesky(sigma0.view())?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            mu: x0.clone(),
            x0,
            current: None,
            current_log_pdf: f64::NEG_INFINITY,
            proposed: None,
            sigma: sigma0,
            chol,
            log_lambda: 0.0,
            eta: 0.6,
            target_acceptance: 0.234,
            initial_phase: true,
            adaptations: 0,
            iterations: 0,
            acceptance: AcceptanceTracker::default(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Re-seeds the internal random number generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Sets the decay exponent of the adaptation rate.
    pub fn set_eta(&mut self, eta: f64) -> Result<()> {
        if !(eta.is_finite() && eta > 0.0) {
            return Err(McmcError::config(format!("eta must be positive, got {eta}")));
        }
        self.eta = eta;
        Ok(())
    }

    pub fn target_acceptance(&self) -> f64 {
        self.target_acceptance
    }

    pub fn set_target_acceptance(&mut self, rate: f64) -> Result<()> {
        if !(rate > 0.0 && rate < 1.0) {
            return Err(McmcError::config(format!(
                "target acceptance rate must be in (0, 1), got {rate}"
            )));
        }
        self.target_acceptance = rate;
        Ok(())
    }

    pub fn log_lambda(&self) -> f64 {
        self.log_lambda
    }

    /// Current adapted proposal covariance (before scaling by `lambda`).
    pub fn sigma(&self) -> ArrayView2<'_, f64> {
        self.sigma.view()
    }

    pub fn mu(&self) -> ArrayView1<'_, f64> {
        self.mu.view()
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.acceptance.rate()
    }

    fn adapt(&mut self, x: &Array1<f64>, alpha: f64) {
        self.adaptations += 1;
        let gamma = ((self.adaptations + 1) as f64).powf(-self.eta);

        self.mu = &self.mu * (1.0 - gamma) + x * gamma;
        let dx = (x - &self.mu).insert_axis(Axis(1));
        self.sigma = &self.sigma * (1.0 - gamma) + dx.dot(&dx.t()) * gamma;
        self.log_lambda += gamma * (alpha - self.target_acceptance);

        match cholesky(self.sigma.view()) {
            Ok(chol) => self.chol = chol,
            Err(_) => log::debug!("adapted covariance is not positive definite, keeping last factor"),
        }
    }
}

impl SingleChainMcmc for AdaptiveCovarianceMcmc {
    fn name(&self) -> &'static str {
        "Haario-Bardenet adaptive covariance MCMC"
    }

    fn dim(&self) -> usize {
        self.x0.len()
    }

    fn ask(&mut self) -> Result<Array1<f64>> {
        if self.proposed.is_some() {
            return Err(McmcError::Protocol(
                "ask called while a proposal is awaiting tell",
            ));
        }
        let proposed = match &self.current {
            None => self.x0.clone(),
            Some(current) => {
                let scaled = &self.chol * (0.5 * self.log_lambda).exp();
                sample_multivariate_normal(current.view(), scaled.view(), &mut self.rng)
            }
        };
        self.proposed = Some(proposed.clone());
        Ok(proposed)
    }

    fn tell(&mut self, reply: Evaluation) -> Result<Option<Transition>> {
        let proposed = self
            .proposed
            .take()
            .ok_or(McmcError::Protocol("tell called without a preceding ask"))?;
        let log_pdf = reply.log_density;

        if self.current.is_none() {
            if !log_pdf.is_finite() {
                return Err(McmcError::InvalidInitialState);
            }
            self.current = Some(proposed.clone());
            self.current_log_pdf = log_pdf;
            self.iterations += 1;
            return Ok(Some(Transition {
                sample: proposed,
                accepted: true,
            }));
        }

        let log_ratio = log_pdf - self.current_log_pdf;
        let u: f64 = self.rng.gen();
        let accepted = metropolis_accept(u, log_ratio);
        if accepted {
            self.current = Some(proposed);
            self.current_log_pdf = log_pdf;
        }
        self.acceptance.step(accepted);
        self.iterations += 1;

        let sample = self.current.clone().unwrap_or_else(|| self.x0.clone());
        if !self.initial_phase {
            let alpha = if log_ratio.is_nan() {
                0.0
            } else {
                log_ratio.min(0.0).exp()
            };
            self.adapt(&sample, alpha);
        }
        Ok(Some(Transition { sample, accepted }))
    }

    fn current(&self) -> Option<ArrayView1<'_, f64>> {
        self.current.as_ref().map(|c| c.view())
    }

    fn replace(&mut self, current: ArrayView1<'_, f64>, reply: Evaluation) -> Result<()> {
        if self.current.is_none() || self.proposed.is_some() {
            return Err(McmcError::Protocol(
                "replace needs an initialised sampler with no outstanding proposal",
            ));
        }
        check_dim(self.dim(), current.len())?;
        self.current = Some(current.to_owned());
        self.current_log_pdf = reply.log_density;
        Ok(())
    }

    fn needs_initial_phase(&self) -> bool {
        true
    }

    fn set_initial_phase(&mut self, initial_phase: bool) {
        self.initial_phase = initial_phase;
    }

    fn in_initial_phase(&self) -> bool {
        self.initial_phase
    }
}

impl TunableMethod for AdaptiveCovarianceMcmc {
    fn n_hyper_parameters(&self) -> usize {
        1
    }

    /// `[eta]`.
    fn set_hyper_parameters(&mut self, x: &[f64]) -> Result<()> {
        match x {
            [eta] => self.set_eta(*eta),
            _ => Err(McmcError::config(format!(
                "expected 1 hyper-parameter, got {}",
                x.len()
            ))),
        }
    }
}

impl Loggable for AdaptiveCovarianceMcmc {
    fn log_fields(&self) -> Vec<LogField> {
        vec![
            LogField::int("iter", self.iterations),
            LogField::float("accept", self.acceptance.rate()),
            LogField::float("lambda", self.log_lambda.exp()),
        ]
    }
}
