//! Error types for reconstruction jobs
//!
//! Configuration problems are detected while the streaming pipelines and
//! solvers are set up and abort the job before any compute. Convergence
//! outcomes are not errors; see [`crate::solver::Termination`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// Invalid job or pipeline configuration (slice partitioning, ports, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Buffer handed to an operator does not have the declared shape
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Code path that does not exist for the selected mode
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-finite values inside an iteration
    #[error("numerical breakdown: {0}")]
    Numerical(String),

    /// Malformed persisted data
    #[error("format error: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, ReconError>;
