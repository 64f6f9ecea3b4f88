//! Primal-dual solver for the linearized sub-problems
//!
//! One solve minimizes
//!
//! ```text
//! λ/2 ‖A x - res‖² + α Σ|∇x - v| + β Σ|E v| + 1/(2δ) ‖x - xk‖² + ω/2 ‖∇x_H1‖²
//! ```
//!
//! over the box constraints of the unknowns (TV drops `v` and the `β` term)
//! with the Malitsky-Pock line search. The iteration itself lives in [`pd`];
//! the kernels it runs are supplied by a [`PdKernels`] backend:
//! [`streamed::StreamedKernels`] for slice-separable encodings and
//! [`sms::SmsKernels`] for multiband data.

pub mod objective;
pub mod pd;
pub mod sms;
pub mod state;
pub mod streamed;

pub use pd::{solve, solve_with_progress, Evaluation, PdSettings};
pub use state::{Layout, PdState, PingPong, WarmStart};

use crate::error::Result;
use crate::kernels::KernelParams;
use crate::streaming::NormPair;

/// How a primal-dual solve ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Primal value or gap stopped changing
    Converged,
    /// The gap grew
    Stagnated,
    /// Iteration budget used up
    Exhausted,
}

/// Outcome of one solve, values at the last objective evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveReport {
    pub termination: Termination,
    pub iterations: usize,
    pub primal: f64,
    pub dual: f64,
    pub gap: f64,
}

/// Operator backend of the primal-dual iteration
///
/// All methods read the current slots of [`PdState`] and write either the
/// current slots (`warmup`) or the next slots (`primal`, `dual`).
pub trait PdKernels {
    /// `A x`, `Kyk1`, `∇x` and for TGV `E v`, `Kyk2` of the current iterate
    fn warmup(&self, state: &mut PdState, params: &KernelParams) -> Result<()>;

    /// `x_new`, `∇x_new`, `A x_new` and for TGV `v_new`, `E v_new`
    fn primal(&self, state: &mut PdState, params: &KernelParams) -> Result<()>;

    /// Dual updates; returns the line-search norms
    fn dual(&self, state: &mut PdState, params: &KernelParams) -> Result<NormPair>;
}
