//! Ask/tell samplers for unnormalized log densities.
//!
//! Every sampler is a state machine: `ask` returns the point(s) to evaluate,
//! `tell` takes the evaluations back. The caller owns the evaluation loop, so
//! runs can be paused, distributed or driven by an external optimizer.
//! [`controller::McmcController`] provides a ready-made loop.

pub mod adaptive_covariance;
pub mod controller;
pub mod core;
pub mod differential_evolution;
pub mod distributions;
pub mod error;
pub mod hamiltonian;
pub mod io;
pub mod logging;
pub mod smc;
pub mod stats;

pub use crate::core::{Evaluation, MultiChainMcmc, SingleChainMcmc, Transition};
pub use crate::error::{McmcError, Result};
