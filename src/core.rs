/*!
# The ask/tell protocol

Every sampler in this crate is a suspendable point generator. A driver calls
`ask` to obtain candidate point(s), evaluates the target log-density (and its
gradient, when the sampler [needs it](SingleChainMcmc::needs_gradient)) somewhere
else, and hands the result back through `tell`. Control is returned to the
caller between the two calls, so the same sampler can be driven from a plain
loop, from a thread pool or from an async task.

Two flavours exist:

- [`SingleChainMcmc`]: one point per `ask`, one [`Evaluation`] per `tell`.
- [`MultiChainMcmc`]: one point per chain per `ask` (rows of an `Array2`),
  a slice of evaluations per `tell`.

Both are strictly alternating. Calling `ask` twice without a `tell` in
between, or `tell` without an outstanding `ask`, fails with
[`McmcError::Protocol`].

## Example

```rust
use asktell_mcmc::core::{Evaluation, SingleChainMcmc};
use asktell_mcmc::hamiltonian::HamiltonianMcmc;
use ndarray::arr1;

let mut hmc = HamiltonianMcmc::new(arr1(&[0.5])).unwrap().set_seed(7);
for _ in 0..50 {
    let x = hmc.ask().unwrap();
    // Standard normal: log p = -x^2 / 2, gradient = -x.
    let reply = Evaluation::with_gradient(-0.5 * x[0] * x[0], -&x);
    let _maybe_sample = hmc.tell(reply).unwrap();
}
```
*/

use ndarray::{Array1, Array2, ArrayView1};
use std::fmt;

use crate::error::{McmcError, Result};
use crate::logging::Loggable;

/// The externally computed value of the target at a point requested by `ask`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Unnormalized log-density; `f64::NEG_INFINITY` outside the support.
    pub log_density: f64,
    /// Gradient of the log-density, if the driver computed it.
    pub gradient: Option<Array1<f64>>,
}

impl Evaluation {
    /// An evaluation without gradient information.
    pub fn value(log_density: f64) -> Self {
        Self {
            log_density,
            gradient: None,
        }
    }

    pub fn with_gradient(log_density: f64, gradient: Array1<f64>) -> Self {
        Self {
            log_density,
            gradient: Some(gradient),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.log_density.is_finite()
    }

    /// Splits off the gradient, failing if it is missing or has the wrong length.
    pub(crate) fn require_gradient(self, dim: usize) -> Result<(f64, Array1<f64>)> {
        let gradient = self.gradient.ok_or(McmcError::MissingGradient)?;
        check_dim(dim, gradient.len())?;
        Ok((self.log_density, gradient))
    }
}

impl From<f64> for Evaluation {
    fn from(log_density: f64) -> Self {
        Evaluation::value(log_density)
    }
}

impl From<(f64, Array1<f64>)> for Evaluation {
    fn from((log_density, gradient): (f64, Array1<f64>)) -> Self {
        Evaluation::with_gradient(log_density, gradient)
    }
}

/// A new entry of a single chain, produced by a completed `tell`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The chain's current point after the update (an owned copy).
    pub sample: Array1<f64>,
    /// Whether the proposal evaluated in this round became the current point.
    pub accepted: bool,
}

/// A sampler evolving one Markov chain through the ask/tell protocol.
pub trait SingleChainMcmc: Loggable + Send {
    /// Human readable name of the method.
    fn name(&self) -> &'static str;

    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Whether each [`Evaluation`] passed to `tell` must carry a gradient.
    fn needs_gradient(&self) -> bool {
        false
    }

    /// Returns the next point to evaluate.
    fn ask(&mut self) -> Result<Array1<f64>>;

    /// Consumes the evaluation of the point returned by the last `ask`.
    ///
    /// Returns `None` when the round did not produce a new chain entry (for
    /// example intermediate leapfrog steps), otherwise the chain's current
    /// point together with the accepted flag.
    fn tell(&mut self, reply: Evaluation) -> Result<Option<Transition>>;

    /// The current point of the chain, once initialised.
    fn current(&self) -> Option<ArrayView1<'_, f64>>;

    /// Overwrites the current point and its evaluation.
    ///
    /// Only allowed after initialisation and while no proposal is outstanding.
    fn replace(&mut self, current: ArrayView1<'_, f64>, reply: Evaluation) -> Result<()>;

    /// Whether the method has an initial phase that runs differently (e.g.
    /// without adaptation).
    fn needs_initial_phase(&self) -> bool {
        false
    }

    fn set_initial_phase(&mut self, _initial_phase: bool) {}

    fn in_initial_phase(&self) -> bool {
        false
    }
}

/// A sampler evolving several chains in lock step.
pub trait MultiChainMcmc: Loggable + Send {
    fn name(&self) -> &'static str;

    fn dim(&self) -> usize;

    fn n_chains(&self) -> usize;

    fn needs_gradient(&self) -> bool {
        false
    }

    /// Returns one point per chain, as the rows of an `n_chains x dim` array.
    fn ask(&mut self) -> Result<Array2<f64>>;

    /// Consumes one evaluation per chain, in the row order of the last `ask`.
    ///
    /// Returns the chains' current points after the update.
    fn tell(&mut self, replies: &[Evaluation]) -> Result<Option<Array2<f64>>>;
}

/// A non-fatal diagnostic raised while configuring a sampler.
///
/// Samplers collect these instead of printing them; drivers can query them
/// through the sampler's `warnings()` method and decide what to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerWarning {
    /// Fewer chains than recommended for the number of parameters.
    FewChains { n_chains: usize, recommended: usize },
}

impl fmt::Display for SamplerWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerWarning::FewChains {
                n_chains,
                recommended,
            } => write!(
                f,
                "{n_chains} chains is below the recommended minimum of {recommended}"
            ),
        }
    }
}

/// Methods exposing their hyper-parameters as a flat vector, so they can be
/// tuned by an outer optimiser.
pub trait TunableMethod {
    fn n_hyper_parameters(&self) -> usize;

    fn set_hyper_parameters(&mut self, x: &[f64]) -> Result<()>;
}

/// The Metropolis rule: accept iff `ln(u) < log_ratio`, with `u ~ U(0, 1)`.
///
/// A `NaN` ratio is always rejected.
///
/// ```rust
/// use asktell_mcmc::core::metropolis_accept;
///
/// assert!(metropolis_accept(0.5, 0.0));
/// assert!(!metropolis_accept(0.5, -1.0));
/// assert!(!metropolis_accept(0.9, f64::NEG_INFINITY));
/// ```
pub fn metropolis_accept(u: f64, log_ratio: f64) -> bool {
    u.ln() < log_ratio
}

pub(crate) fn check_dim(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(McmcError::Dimension { expected, got });
    }
    Ok(())
}

pub(crate) fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(McmcError::EvaluationCount { expected, got });
    }
    Ok(())
}
