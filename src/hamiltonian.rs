/*!
# Hamiltonian Monte Carlo

A single-chain gradient sampler that simulates Hamiltonian dynamics with the
leapfrog integrator, one integration step per ask/tell round.

The target `log p(x)` defines a potential energy `U(x) = -log p(x)` and a
momentum `p ~ N(0, Sigma)` adds kinetic energy `K(p) = sum_i p_i^2 / (2 m_i)`.
A trajectory of `L` leapfrog steps with step size `eps` looks like this:

```text
p <- p + eps/2 * grad log p(x)                      (start)
repeat L times:
    x <- x + eps * p / m                            (ask)
    p <- p + eps * grad log p(x)                    (tell, interior steps)
p <- p + eps/2 * grad log p(x); p <- -p             (tell, last step)
accept iff ln(u) < U(x_0) - U(x_L) + K(p_0) - K(p_L)
```

Because evaluation happens outside the sampler, the trajectory is an explicit
state machine: every `ask` performs one position update and returns the new
position, every `tell` performs the matching momentum update. Only the last
`tell` of a trajectory returns a [`Transition`]; the intermediate ones return
`None`.

Trajectories whose Hamiltonian error exceeds a threshold are recorded as
*divergent*. This is a diagnostic only and never affects acceptance.
*/

use ndarray::prelude::*;
use rand::prelude::*;

use crate::core::{
    check_dim, metropolis_accept, Evaluation, SingleChainMcmc, Transition, TunableMethod,
};
use crate::error::{McmcError, Result};
use crate::logging::{LogField, Loggable};
use crate::stats::{cholesky, sample_multivariate_normal, AcceptanceTracker};

/// Sub-state of one leapfrog trajectory.
#[derive(Debug, Clone, PartialEq)]
struct Leapfrog {
    position: Array1<f64>,
    momentum: Array1<f64>,
    gradient: Array1<f64>,
    /// Momentum drawn at the start, before the first half step.
    initial_momentum: Array1<f64>,
    /// Number of position updates performed so far.
    iteration: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Uninitialized,
    AwaitingInitialEval,
    Ready,
    InTrajectory { frog: Leapfrog, awaiting: bool },
}

/**
Hamiltonian Monte Carlo driven through the ask/tell protocol.

Every evaluation passed to [`tell`](SingleChainMcmc::tell) must carry the
gradient of the log-density.

# Examples

```rust
use asktell_mcmc::core::{Evaluation, SingleChainMcmc};
use asktell_mcmc::hamiltonian::HamiltonianMcmc;
use ndarray::arr1;

let mut hmc = HamiltonianMcmc::new(arr1(&[1.0, -1.0])).unwrap().set_seed(42);
hmc.set_leapfrog_steps(10).unwrap();
hmc.set_leapfrog_step_size(0.1).unwrap();

let mut chain = Vec::new();
while chain.len() < 100 {
    let x = hmc.ask().unwrap();
    let reply = Evaluation::with_gradient(-0.5 * x.dot(&x), -&x);
    if let Some(t) = hmc.tell(reply).unwrap() {
        chain.push(t.sample);
    }
}
assert!(hmc.acceptance_rate() > 0.5);
```
*/
#[derive(Debug, Clone)]
pub struct HamiltonianMcmc {
    x0: Array1<f64>,
    sigma0: Array2<f64>,
    chol: Array2<f64>,

    current: Option<Array1<f64>>,
    current_log_pdf: f64,
    current_gradient: Array1<f64>,
    phase: Phase,

    leapfrog_steps: usize,
    step_size: f64,
    mass: Array1<f64>,
    divergence_threshold: f64,
    divergent: Vec<u64>,

    mcmc_iteration: u64,
    acceptance: AcceptanceTracker,
    seed: u64,
    rng: SmallRng,
}

impl HamiltonianMcmc {
    /// Creates a sampler starting at `x0`, with identity momentum covariance.
    pub fn new(x0: Array1<f64>) -> Result<Self> {
        let dim = x0.len();
        Self::with_covariance(x0, Array2::eye(dim))
    }

    /**
    Creates a sampler starting at `x0`, drawing momenta from `N(0, sigma0)`.

    # Arguments

    * `x0` - Initial point of the chain.
    * `sigma0` - Momentum covariance. Must be symmetric positive definite.
      Keep it consistent with the [masses](Self::set_mass): the kinetic
      energy is always computed from the masses.
    */
    pub fn with_covariance(x0: Array1<f64>, sigma0: Array2<f64>) -> Result<Self> {
        let dim = x0.len();
        if dim == 0 {
            return Err(McmcError::config("points must have at least one parameter"));
        }
        check_dim(dim, sigma0.nrows())?;
        let chol = cholesky(sigma0.view())?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            x0,
            sigma0,
            chol,
            current: None,
            current_log_pdf: f64::NEG_INFINITY,
            current_gradient: Array1::zeros(dim),
            phase: Phase::Uninitialized,
            leapfrog_steps: 20,
            step_size: 0.2,
            mass: Array1::ones(dim),
            divergence_threshold: 1000.0,
            divergent: Vec::new(),
            mcmc_iteration: 0,
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

    pub fn leapfrog_steps(&self) -> usize {
        self.leapfrog_steps
    }

    pub fn set_leapfrog_steps(&mut self, steps: usize) -> Result<()> {
        self.check_not_in_trajectory()?;
        if steps < 1 {
            return Err(McmcError::config("number of leapfrog steps must be at least 1"));
        }
        self.leapfrog_steps = steps;
        Ok(())
    }

    pub fn leapfrog_step_size(&self) -> f64 {
        self.step_size
    }

    pub fn set_leapfrog_step_size(&mut self, step_size: f64) -> Result<()> {
        self.check_not_in_trajectory()?;
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(McmcError::config(format!(
                "step size must be positive, got {step_size}"
            )));
        }
        self.step_size = step_size;
        Ok(())
    }

    pub fn mass(&self) -> ArrayView1<'_, f64> {
        self.mass.view()
    }

    /// Sets the per-parameter masses used in the kinetic energy.
    pub fn set_mass(&mut self, mass: Array1<f64>) -> Result<()> {
        self.check_not_in_trajectory()?;
        check_dim(self.x0.len(), mass.len())?;
        if mass.iter().any(|m| !(m.is_finite() && *m > 0.0)) {
            return Err(McmcError::config("masses must be positive"));
        }
        self.mass = mass;
        Ok(())
    }

    pub fn sigma0(&self) -> ArrayView2<'_, f64> {
        self.sigma0.view()
    }

    pub fn set_sigma0(&mut self, sigma0: Array2<f64>) -> Result<()> {
        self.check_not_in_trajectory()?;
        check_dim(self.x0.len(), sigma0.nrows())?;
        self.chol = cholesky(sigma0.view())?;
        self.sigma0 = sigma0;
        Ok(())
    }

    pub fn divergence_threshold(&self) -> f64 {
        self.divergence_threshold
    }

    /// Hamiltonian error above which a trajectory counts as divergent.
    pub fn set_divergence_threshold(&mut self, threshold: f64) -> Result<()> {
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(McmcError::config(format!(
                "divergence threshold must be positive, got {threshold}"
            )));
        }
        self.divergence_threshold = threshold;
        Ok(())
    }

    /// Chain indices of the iterations whose trajectory diverged.
    pub fn divergent_iterations(&self) -> &[u64] {
        &self.divergent
    }

    /// Fraction of accepted trajectories so far.
    pub fn acceptance_rate(&self) -> f64 {
        self.acceptance.rate()
    }

    pub fn current_log_pdf(&self) -> Option<f64> {
        self.current.as_ref().map(|_| self.current_log_pdf)
    }

    pub fn current_gradient(&self) -> Option<ArrayView1<'_, f64>> {
        self.current.as_ref().map(|_| self.current_gradient.view())
    }

    fn check_not_in_trajectory(&self) -> Result<()> {
        if matches!(self.phase, Phase::InTrajectory { .. }) {
            return Err(McmcError::config(
                "integrator settings cannot change during a trajectory",
            ));
        }
        Ok(())
    }

    fn kinetic_energy(&self, momentum: &Array1<f64>) -> f64 {
        momentum
            .iter()
            .zip(self.mass.iter())
            .map(|(p, m)| p * p / (2.0 * m))
            .sum()
    }

    fn start_trajectory(&mut self) -> Result<Leapfrog> {
        let current = self
            .current
            .as_ref()
            .ok_or(McmcError::Protocol("sampler is not initialised"))?;
        let zero = Array1::zeros(current.len());
        let initial_momentum = sample_multivariate_normal(zero.view(), self.chol.view(), &mut self.rng);
        let mut momentum = initial_momentum.clone();
        momentum.scaled_add(0.5 * self.step_size, &self.current_gradient);
        Ok(Leapfrog {
            position: current.clone(),
            momentum,
            gradient: self.current_gradient.clone(),
            initial_momentum,
            iteration: 0,
        })
    }

    fn step_position(&mut self, mut frog: Leapfrog) -> Array1<f64> {
        let step = &frog.momentum / &self.mass * self.step_size;
        frog.position += &step;
        frog.iteration += 1;
        let position = frog.position.clone();
        self.phase = Phase::InTrajectory {
            frog,
            awaiting: true,
        };
        position
    }

    /// Last momentum half step, Metropolis test and bookkeeping.
    fn finish_trajectory(&mut self, mut frog: Leapfrog, log_pdf: f64) -> Transition {
        frog.momentum.scaled_add(0.5 * self.step_size, &frog.gradient);
        frog.momentum.mapv_inplace(|p| -p);

        let k_current = self.kinetic_energy(&frog.initial_momentum);
        let k_proposed = self.kinetic_energy(&frog.momentum);
        let log_ratio = (log_pdf - self.current_log_pdf) + k_current - k_proposed;

        let energy_error = -log_ratio;
        if !energy_error.is_finite() || energy_error > self.divergence_threshold {
            log::debug!(
                "divergent trajectory at iteration {} (energy error {energy_error})",
                self.mcmc_iteration
            );
            self.divergent.push(self.mcmc_iteration);
        }

        let u: f64 = self.rng.gen();
        let accepted = metropolis_accept(u, log_ratio);
        if accepted {
            self.current = Some(frog.position);
            self.current_log_pdf = log_pdf;
            self.current_gradient = frog.gradient;
        }
        self.acceptance.step(accepted);
        self.mcmc_iteration += 1;
        self.phase = Phase::Ready;

        Transition {
            sample: self.current.clone().unwrap_or_else(|| self.x0.clone()),
            accepted,
        }
    }
}

impl SingleChainMcmc for HamiltonianMcmc {
    fn name(&self) -> &'static str {
        "Hamiltonian Monte Carlo"
    }

    fn dim(&self) -> usize {
        self.x0.len()
    }

    fn needs_gradient(&self) -> bool {
        true
    }

    fn ask(&mut self) -> Result<Array1<f64>> {
        match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Uninitialized => {
                self.phase = Phase::AwaitingInitialEval;
                Ok(self.x0.clone())
            }
            Phase::Ready => {
                let frog = match self.start_trajectory() {
                    Ok(frog) => frog,
                    Err(e) => {
                        self.phase = Phase::Ready;
                        return Err(e);
                    }
                };
                Ok(self.step_position(frog))
            }
            Phase::InTrajectory {
                frog,
                awaiting: false,
            } => Ok(self.step_position(frog)),
            phase => {
                self.phase = phase;
                Err(McmcError::Protocol(
                    "ask called while an evaluation is awaiting tell",
                ))
            }
        }
    }

    fn tell(&mut self, reply: Evaluation) -> Result<Option<Transition>> {
        let dim = self.dim();
        match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::AwaitingInitialEval => {
                let (log_pdf, gradient) = match reply.require_gradient(dim) {
                    Ok(v) => v,
                    Err(e) => {
                        self.phase = Phase::AwaitingInitialEval;
                        return Err(e);
                    }
                };
                if !log_pdf.is_finite() {
                    return Err(McmcError::InvalidInitialState);
                }
                self.current = Some(self.x0.clone());
                self.current_log_pdf = log_pdf;
                self.current_gradient = gradient;
                self.mcmc_iteration += 1;
                self.phase = Phase::Ready;
                Ok(Some(Transition {
                    sample: self.x0.clone(),
                    accepted: true,
                }))
            }
            Phase::InTrajectory {
                mut frog,
                awaiting: true,
            } => {
                let (log_pdf, gradient) = match reply.require_gradient(dim) {
                    Ok(v) => v,
                    Err(e) => {
                        self.phase = Phase::InTrajectory {
                            frog,
                            awaiting: true,
                        };
                        return Err(e);
                    }
                };
                frog.gradient = gradient;
                if frog.iteration < self.leapfrog_steps {
                    frog.momentum.scaled_add(self.step_size, &frog.gradient);
                    self.phase = Phase::InTrajectory {
                        frog,
                        awaiting: false,
                    };
                    return Ok(None);
                }
                Ok(Some(self.finish_trajectory(frog, log_pdf)))
            }
            phase => {
                self.phase = phase;
                Err(McmcError::Protocol("tell called without a preceding ask"))
            }
        }
    }

    fn current(&self) -> Option<ArrayView1<'_, f64>> {
        self.current.as_ref().map(|c| c.view())
    }

    fn replace(&mut self, current: ArrayView1<'_, f64>, reply: Evaluation) -> Result<()> {
        if self.phase != Phase::Ready {
            return Err(McmcError::Protocol(
                "replace is only allowed between trajectories",
            ));
        }
        check_dim(self.dim(), current.len())?;
        let (log_pdf, gradient) = reply.require_gradient(self.dim())?;
        self.current = Some(current.to_owned());
        self.current_log_pdf = log_pdf;
        self.current_gradient = gradient;
        Ok(())
    }
}

impl TunableMethod for HamiltonianMcmc {
    fn n_hyper_parameters(&self) -> usize {
        2
    }

    /// `[leapfrog_steps, step_size]`. Either both are applied or neither is.
    fn set_hyper_parameters(&mut self, x: &[f64]) -> Result<()> {
        let &[steps, step_size] = x else {
            return Err(McmcError::config(format!(
                "expected 2 hyper-parameters, got {}",
                x.len()
            )));
        };
        self.check_not_in_trajectory()?;
        if !(steps.is_finite() && steps.fract() == 0.0 && steps >= 1.0) {
            return Err(McmcError::config(format!(
                "number of leapfrog steps must be a positive integer, got {steps}"
            )));
        }
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(McmcError::config(format!(
                "step size must be positive, got {step_size}"
            )));
        }
        self.leapfrog_steps = steps as usize;
        self.step_size = step_size;
        Ok(())
    }
}

impl Loggable for HamiltonianMcmc {
    fn log_fields(&self) -> Vec<LogField> {
        let frog = match &self.phase {
            Phase::InTrajectory { frog, .. } => frog.iteration as u64,
            _ => 0,
        };
        vec![
            LogField::int("iter", self.mcmc_iteration),
            LogField::int("frog", frog),
            LogField::float("accept", self.acceptance.rate()),
            LogField::int("divergent", self.divergent.len() as u64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn std_normal(x: &Array1<f64>) -> Evaluation {
        Evaluation::with_gradient(-0.5 * x.dot(x), -x)
    }

    fn initialised(x0: Array1<f64>) -> HamiltonianMcmc {
        let mut hmc = HamiltonianMcmc::new(x0).unwrap().set_seed(17);
        let x = hmc.ask().unwrap();
        hmc.tell(std_normal(&x)).unwrap();
        hmc
    }

    #[test]
    fn test_first_tell_emits_initial_point() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.3, -0.2])).unwrap();
        let x = hmc.ask().unwrap();
        assert_eq!(x, arr1(&[0.3, -0.2]));
        let t = hmc.tell(std_normal(&x)).unwrap().unwrap();
        assert_eq!(t.sample, x);
        assert!(t.accepted);
        assert_abs_diff_eq!(hmc.current_log_pdf().unwrap(), -0.065, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_initial_state() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0])).unwrap();
        hmc.ask().unwrap();
        let reply = Evaluation::with_gradient(f64::NEG_INFINITY, arr1(&[0.0]));
        assert_eq!(hmc.tell(reply), Err(McmcError::InvalidInitialState));
        assert!(hmc.current().is_none());
    }

    #[test]
    fn test_protocol_violations() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0])).unwrap();
        assert!(matches!(
            hmc.tell(std_normal(&arr1(&[0.0]))),
            Err(McmcError::Protocol(_))
        ));
        let x = hmc.ask().unwrap();
        assert!(matches!(hmc.ask(), Err(McmcError::Protocol(_))));
        hmc.tell(std_normal(&x)).unwrap();

        let x = hmc.ask().unwrap();
        assert!(matches!(hmc.ask(), Err(McmcError::Protocol(_))));
        hmc.tell(std_normal(&x)).unwrap();
        assert!(matches!(
            hmc.tell(std_normal(&x)),
            Err(McmcError::Protocol(_))
        ));
    }

    #[test]
    fn test_missing_gradient() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0, 0.0])).unwrap();
        let x = hmc.ask().unwrap();
        assert_eq!(
            hmc.tell(Evaluation::value(0.0)),
            Err(McmcError::MissingGradient)
        );
        // The request is still outstanding and can be answered properly.
        assert!(hmc.tell(std_normal(&x)).unwrap().is_some());
    }

    #[test]
    fn test_trajectory_length() {
        let mut hmc = initialised(arr1(&[0.5]));
        hmc.set_leapfrog_steps(5).unwrap();
        hmc.set_leapfrog_step_size(0.1).unwrap();
        for trajectory in 0..3 {
            for step in 1..=5 {
                let x = hmc.ask().unwrap();
                let out = hmc.tell(std_normal(&x)).unwrap();
                if step < 5 {
                    assert!(out.is_none(), "trajectory {trajectory} step {step}");
                    assert_eq!(hmc.log_fields()[1], LogField::int("frog", step));
                } else {
                    assert!(out.is_some());
                }
            }
        }
        assert_eq!(hmc.log_fields()[0], LogField::int("iter", 4));
    }

    #[test]
    fn test_constant_gradient_is_integrated_exactly() {
        // With log p(x) = g x the leapfrog scheme is exact and energy is
        // conserved, so every trajectory ends at x0 + p0 T + g T^2 / 2.
        let g = 0.7;
        let linear = |x: &Array1<f64>| Evaluation::with_gradient(g * x[0], arr1(&[g]));
        let mut hmc = HamiltonianMcmc::new(arr1(&[1.0])).unwrap().set_seed(5);
        hmc.set_leapfrog_steps(4).unwrap();
        hmc.set_leapfrog_step_size(0.25).unwrap();
        let x = hmc.ask().unwrap();
        hmc.tell(linear(&x)).unwrap();

        for _ in 0..10 {
            let x_start = hmc.current().unwrap()[0];
            let mut p0 = None;
            let transition = loop {
                let x = hmc.ask().unwrap();
                if p0.is_none() {
                    if let Phase::InTrajectory { frog, .. } = &hmc.phase {
                        p0 = Some(frog.initial_momentum[0]);
                    }
                }
                if let Some(t) = hmc.tell(linear(&x)).unwrap() {
                    break t;
                }
            };
            let t_total = 4.0 * 0.25;
            let expected = x_start + p0.unwrap() * t_total + 0.5 * g * t_total * t_total;
            assert!(transition.accepted);
            assert_abs_diff_eq!(transition.sample[0], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_small_steps_are_accepted() {
        let mut hmc = initialised(arr1(&[1.0, 0.0]));
        hmc.set_leapfrog_step_size(0.01).unwrap();
        for _ in 0..(100 * 20) {
            let x = hmc.ask().unwrap();
            hmc.tell(std_normal(&x)).unwrap();
        }
        assert!(hmc.acceptance_rate() > 0.95);
        assert!(hmc.divergent_iterations().is_empty());
    }

    #[test]
    fn test_unstable_step_size_diverges() {
        let mut hmc = initialised(arr1(&[1.0]));
        hmc.set_leapfrog_step_size(3.0).unwrap();
        loop {
            let x = hmc.ask().unwrap();
            if let Some(t) = hmc.tell(std_normal(&x)).unwrap() {
                assert!(!t.accepted);
                assert_eq!(t.sample, arr1(&[1.0]));
                break;
            }
        }
        assert_eq!(hmc.divergent_iterations(), &[1]);
        assert_eq!(hmc.log_fields()[3], LogField::int("divergent", 1));
    }

    #[test]
    fn test_replace() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0])).unwrap();
        assert!(hmc
            .replace(arr1(&[1.0]).view(), std_normal(&arr1(&[1.0])))
            .is_err());
        let mut hmc = initialised(arr1(&[0.0]));
        hmc.replace(arr1(&[2.0]).view(), std_normal(&arr1(&[2.0])))
            .unwrap();
        assert_eq!(hmc.current().unwrap(), arr1(&[2.0]));
        assert_eq!(hmc.current_log_pdf(), Some(-2.0));
        assert_eq!(
            hmc.replace(arr1(&[2.0]).view(), Evaluation::value(-2.0)),
            Err(McmcError::MissingGradient)
        );
        hmc.ask().unwrap();
        assert!(matches!(
            hmc.replace(arr1(&[2.0]).view(), std_normal(&arr1(&[2.0]))),
            Err(McmcError::Protocol(_))
        ));
    }

    #[test]
    fn test_setters() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0, 0.0])).unwrap();
        assert_eq!(hmc.leapfrog_steps(), 20);
        assert_eq!(hmc.leapfrog_step_size(), 0.2);
        assert!(hmc.set_leapfrog_steps(0).is_err());
        assert!(hmc.set_leapfrog_step_size(0.0).is_err());
        assert!(hmc.set_leapfrog_step_size(-0.1).is_err());
        assert!(hmc.set_mass(arr1(&[1.0])).is_err());
        assert!(hmc.set_mass(arr1(&[1.0, 0.0])).is_err());
        assert!(hmc.set_sigma0(arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_err());
        assert!(hmc.set_divergence_threshold(0.0).is_err());
        hmc.set_mass(arr1(&[2.0, 0.5])).unwrap();
        assert_eq!(hmc.mass(), arr1(&[2.0, 0.5]));

        assert_eq!(hmc.n_hyper_parameters(), 2);
        hmc.set_hyper_parameters(&[7.0, 0.05]).unwrap();
        assert_eq!(hmc.leapfrog_steps(), 7);
        assert_eq!(hmc.leapfrog_step_size(), 0.05);
        assert!(hmc.set_hyper_parameters(&[7.5, 0.05]).is_err());
        assert!(hmc.set_hyper_parameters(&[7.0]).is_err());
    }

    #[test]
    fn test_rejected_hyper_parameters_leave_settings_unchanged() {
        let mut hmc = HamiltonianMcmc::new(arr1(&[0.0, 0.0])).unwrap();
        assert!(hmc.set_hyper_parameters(&[7.0, -1.0]).is_err());
        assert_eq!(hmc.leapfrog_steps(), 20);
        assert_eq!(hmc.leapfrog_step_size(), 0.2);
        assert!(hmc.set_hyper_parameters(&[0.0, 0.05]).is_err());
        assert_eq!(hmc.leapfrog_step_size(), 0.2);

        let mut hmc = initialised(arr1(&[0.0]));
        hmc.ask().unwrap();
        assert!(hmc.set_hyper_parameters(&[3.0, 0.1]).is_err());
        assert_eq!(hmc.leapfrog_steps(), 20);
    }

    #[test]
    fn test_settings_locked_during_trajectory() {
        let mut hmc = initialised(arr1(&[0.0]));
        hmc.ask().unwrap();
        assert!(hmc.set_leapfrog_step_size(0.1).is_err());
        assert!(hmc.set_leapfrog_steps(3).is_err());
    }
}
