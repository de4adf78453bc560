//! Error types shared by every sampler in the crate.

use thiserror::Error;

/// Everything that can go wrong while driving a sampler through its
/// ask/tell cycle.
///
/// All errors are local and synchronous. None of them are retried by the
/// samplers themselves; recovering (for example by rebuilding a sampler with
/// different settings) is up to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmcError {
    /// `ask` or `tell` was called out of sequence.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The initial point(s) have a non-finite log-density, so there is no
    /// valid state to start a chain from.
    #[error("initial point(s) must have a finite log-density")]
    InvalidInitialState,

    /// A hyper-parameter or setting was rejected.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `ask` was called after the last temperature of the schedule.
    #[error("temperature schedule exhausted after {steps} steps")]
    ScheduleExhausted { steps: usize },

    /// A batched `tell` received the wrong number of evaluations.
    #[error("expected {expected} evaluations, got {got}")]
    EvaluationCount { expected: usize, got: usize },

    /// A point or gradient with the wrong number of parameters.
    #[error("expected dimension {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    /// A gradient-based sampler was given an evaluation without a gradient.
    #[error("this sampler needs the gradient of the log-density")]
    MissingGradient,

    /// Every importance weight underflowed to zero.
    #[error("all particle weights are zero")]
    DegenerateWeights,
}

impl McmcError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        McmcError::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, McmcError>;
