/*!
# Differential Evolution MCMC

An ensemble sampler in which every chain proposes a move along the difference
of two other chains (ter Braak, 2006). With `n` chains in `d` dimensions, the
proposal for chain `j` is

```text
x_j' = x_j + gamma * (x_r1 - x_r2) + e,    r1 != r2, r1 != j, r2 != j
```

where `e` is a small error term, either `N(0, b*)` or `U(-b*, b*)`, with
`b* = |mu| * b` (relative scaling, `mu` being the mean of the initial
ensemble) or `b* = b` (absolute scaling). Every `gamma_switch_rate`-th round
uses `gamma = 1`, which lets chains jump between modes.

Each chain is then accepted or rejected independently with the Metropolis
rule. The sampler implements [`MultiChainMcmc`]: the first `ask` returns the
initial ensemble, every later `ask` one proposal per chain.

## Example

```rust
use asktell_mcmc::core::{Evaluation, MultiChainMcmc};
use asktell_mcmc::differential_evolution::DifferentialEvolutionMcmc;
use ndarray::arr2;

let x0 = arr2(&[[0.1, 0.0], [-0.3, 0.4], [0.2, -0.5], [0.0, 0.9]]);
let mut de = DifferentialEvolutionMcmc::new(x0).unwrap().set_seed(3);
for _ in 0..100 {
    let xs = de.ask().unwrap();
    let fs: Vec<Evaluation> = xs
        .rows()
        .into_iter()
        .map(|x| Evaluation::value(-0.5 * x.dot(&x)))
        .collect();
    let current = de.tell(&fs).unwrap().unwrap();
    assert_eq!(current.dim(), (4, 2));
}
```
*/

use ndarray::prelude::*;
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::core::{
    check_count, metropolis_accept, Evaluation, MultiChainMcmc, SamplerWarning, TunableMethod,
};
use crate::error::{McmcError, Result};
use crate::logging::{LogField, Loggable};
use crate::stats::AcceptanceTracker;

/// Ensemble MCMC with differential evolution proposals.
#[derive(Debug, Clone)]
pub struct DifferentialEvolutionMcmc {
    x0: Array2<f64>,
    current: Option<Array2<f64>>,
    current_log_pdfs: Array1<f64>,
    proposed: Option<Array2<f64>>,

    gamma: f64,
    b: f64,
    b_star: Array1<f64>,
    gamma_switch_rate: usize,
    normal_error: bool,
    relative_scaling: bool,

    round: u64,
    acceptance: Vec<AcceptanceTracker>,
    warnings: Vec<SamplerWarning>,
    seed: u64,
    rng: SmallRng,
}

impl DifferentialEvolutionMcmc {
    /**
    Creates a sampler whose chains start at the rows of `x0`.

    # Arguments

    * `x0` - Initial points, one row per chain. At least three chains are
      needed so every chain has two distinct donors.

    # Errors

    [`McmcError::Configuration`] for fewer than three chains or zero
    parameters. Fewer than `1.5 * dim` chains is allowed but recorded in
    [`warnings`](Self::warnings).
    */
    pub fn new(x0: Array2<f64>) -> Result<Self> {
        let (n_chains, dim) = x0.dim();
        if n_chains < 3 {
            return Err(McmcError::config(format!(
                "differential evolution needs at least 3 chains, got {n_chains}"
            )));
        }
        if dim == 0 {
            return Err(McmcError::config("points must have at least one parameter"));
        }

        let mut warnings = Vec::new();
        let recommended = (1.5 * dim as f64).ceil() as usize;
        if n_chains < recommended {
            warnings.push(SamplerWarning::FewChains {
                n_chains,
                recommended,
            });
        }

        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            x0,
            current: None,
            current_log_pdfs: Array1::zeros(n_chains),
            proposed: None,
            gamma: 2.38 / (2.0 * dim as f64).sqrt(),
            b: 0.001,
            b_star: Array1::zeros(dim),
            gamma_switch_rate: 10,
            normal_error: true,
            relative_scaling: true,
            round: 0,
            acceptance: vec![AcceptanceTracker::default(); n_chains],
            warnings,
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

    /// Diagnostics collected at construction.
    pub fn warnings(&self) -> &[SamplerWarning] {
        &self.warnings
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Sets the coefficient of the chain difference used in ordinary rounds.
    pub fn set_gamma(&mut self, gamma: f64) -> Result<()> {
        if !(gamma.is_finite() && gamma >= 0.0) {
            return Err(McmcError::config(format!(
                "gamma must be non-negative, got {gamma}"
            )));
        }
        self.gamma = gamma;
        Ok(())
    }

    pub fn scale_coefficient(&self) -> f64 {
        self.b
    }

    /// Sets `b`, the scale of the error term.
    pub fn set_scale_coefficient(&mut self, b: f64) -> Result<()> {
        if !(b.is_finite() && b >= 0.0) {
            return Err(McmcError::config(format!(
                "scale coefficient must be non-negative, got {b}"
            )));
        }
        self.b = b;
        self.update_error_scale();
        Ok(())
    }

    pub fn gamma_switch_rate(&self) -> usize {
        self.gamma_switch_rate
    }

    /// Every `rate`-th round uses `gamma = 1`.
    pub fn set_gamma_switch_rate(&mut self, rate: usize) -> Result<()> {
        if rate < 1 {
            return Err(McmcError::config("gamma switch rate must be at least 1"));
        }
        self.gamma_switch_rate = rate;
        Ok(())
    }

    pub fn normal_error(&self) -> bool {
        self.normal_error
    }

    /// Gaussian (`true`) or uniform (`false`) error term.
    pub fn set_normal_error(&mut self, normal_error: bool) {
        self.normal_error = normal_error;
    }

    pub fn relative_scaling(&self) -> bool {
        self.relative_scaling
    }

    /// Scale the error term by the magnitude of the initial ensemble mean
    /// (`true`) or use `b` directly (`false`).
    pub fn set_relative_scaling(&mut self, relative_scaling: bool) {
        self.relative_scaling = relative_scaling;
        self.update_error_scale();
    }

    /// Log-densities of the current points, once initialised.
    pub fn current_log_pdfs(&self) -> Option<ArrayView1<'_, f64>> {
        self.current.as_ref().map(|_| self.current_log_pdfs.view())
    }

    /// Acceptance rate per chain.
    pub fn acceptance_rates(&self) -> Array1<f64> {
        self.acceptance.iter().map(|a| a.rate()).collect()
    }

    /// Number of completed proposal rounds (excluding initialisation).
    pub fn rounds(&self) -> u64 {
        self.round
    }

    fn update_error_scale(&mut self) {
        if self.current.is_none() {
            return;
        }
        let dim = self.x0.ncols();
        self.b_star = if self.relative_scaling {
            match self.x0.mean_axis(Axis(0)) {
                Some(mu) => mu.mapv(|m| (m * self.b).abs()),
                None => Array1::from_elem(dim, self.b),
            }
        } else {
            Array1::from_elem(dim, self.b)
        };
    }

    /// Gamma used in proposal round `round` (counted from 1).
    fn gamma_for_round(&self, round: u64) -> f64 {
        if round % self.gamma_switch_rate as u64 == 0 {
            1.0
        } else {
            self.gamma
        }
    }

    fn propose(&mut self) -> Result<Array2<f64>> {
        let current = self
            .current
            .as_ref()
            .ok_or(McmcError::Protocol("sampler is not initialised"))?;
        let (n_chains, dim) = current.dim();
        self.round += 1;
        let gamma = self.gamma_for_round(self.round);

        let mut proposed = current.clone();
        for (j, mut row) in proposed.rows_mut().into_iter().enumerate() {
            let (r1, r2) = draw_donors(&mut self.rng, n_chains, j);
            let diff = &current.row(r1) - &current.row(r2);
            row.scaled_add(gamma, &diff);
            for k in 0..dim {
                let e = if self.normal_error {
                    self.b_star[k] * self.rng.sample::<f64, _>(StandardNormal)
                } else {
                    self.b_star[k] * (2.0 * self.rng.gen::<f64>() - 1.0)
                };
                row[k] += e;
            }
        }
        Ok(proposed)
    }
}

/// Two distinct chain indices in `0..n`, both different from `j`.
pub(crate) fn draw_donors<R: Rng + ?Sized>(rng: &mut R, n: usize, j: usize) -> (usize, usize) {
    let picks = rand::seq::index::sample(rng, n - 1, 2);
    let shift = |r: usize| if r >= j { r + 1 } else { r };
    (shift(picks.index(0)), shift(picks.index(1)))
}

impl MultiChainMcmc for DifferentialEvolutionMcmc {
    fn name(&self) -> &'static str {
        "Differential Evolution MCMC"
    }

    fn dim(&self) -> usize {
        self.x0.ncols()
    }

    fn n_chains(&self) -> usize {
        self.x0.nrows()
    }

    fn ask(&mut self) -> Result<Array2<f64>> {
        if self.proposed.is_some() {
            return Err(McmcError::Protocol(
                "ask called while a proposal is awaiting tell",
            ));
        }
        let proposed = if self.current.is_none() {
            self.x0.clone()
        } else {
            self.propose()?
        };
        self.proposed = Some(proposed.clone());
        Ok(proposed)
    }

    fn tell(&mut self, replies: &[Evaluation]) -> Result<Option<Array2<f64>>> {
        if self.proposed.is_none() {
            return Err(McmcError::Protocol("tell called without a preceding ask"));
        }
        check_count(self.n_chains(), replies.len())?;
        let Some(proposed) = self.proposed.take() else {
            return Err(McmcError::Protocol("tell called without a preceding ask"));
        };

        let Some(current) = self.current.as_mut() else {
            if replies.iter().any(|r| !r.is_finite()) {
                return Err(McmcError::InvalidInitialState);
            }
            self.current_log_pdfs = replies.iter().map(|r| r.log_density).collect();
            self.current = Some(proposed.clone());
            self.update_error_scale();
            return Ok(Some(proposed));
        };

        for (j, reply) in replies.iter().enumerate() {
            let u: f64 = self.rng.gen();
            let accepted = metropolis_accept(u, reply.log_density - self.current_log_pdfs[j]);
            if accepted {
                current.row_mut(j).assign(&proposed.row(j));
                self.current_log_pdfs[j] = reply.log_density;
            }
            self.acceptance[j].step(accepted);
        }
        Ok(Some(current.clone()))
    }
}

impl TunableMethod for DifferentialEvolutionMcmc {
    fn n_hyper_parameters(&self) -> usize {
        4
    }

    /// `[gamma, scale_coefficient, gamma_switch_rate, normal_error]`, where the
    /// switch rate must be a whole number and any non-zero `normal_error`
    /// selects the Gaussian error term.
    fn set_hyper_parameters(&mut self, x: &[f64]) -> Result<()> {
        let &[gamma, b, switch_rate, normal_error] = x else {
            return Err(McmcError::config(format!(
                "expected 4 hyper-parameters, got {}",
                x.len()
            )));
        };
        if !(switch_rate.is_finite() && switch_rate.fract() == 0.0 && switch_rate >= 1.0) {
            return Err(McmcError::config(format!(
                "gamma switch rate must be a positive integer, got {switch_rate}"
            )));
        }
        if !(b.is_finite() && b >= 0.0) {
            return Err(McmcError::config(format!(
                "scale coefficient must be non-negative, got {b}"
            )));
        }
        // Only gamma is left to validate, so nothing is applied on failure.
        self.set_gamma(gamma)?;
        self.set_scale_coefficient(b)?;
        self.set_gamma_switch_rate(switch_rate as usize)?;
        self.set_normal_error(normal_error != 0.0);
        Ok(())
    }
}

impl Loggable for DifferentialEvolutionMcmc {
    fn log_fields(&self) -> Vec<LogField> {
        let n = self.acceptance.len().max(1) as f64;
        let accept = self.acceptance.iter().map(|a| a.rate()).sum::<f64>() / n;
        vec![LogField::int("iter", self.round), LogField::float("accept", accept)]
    }
}
