//! Primal-dual iteration with line search
//!
//! Malitsky-Pock step-size adaptation: the primal step `τ` grows with the
//! strong-convexity modulus `μ = 1/δ` of the proximal term and is halved
//! until `sqrt(β)·τ·‖ΔK*y‖ <= ‖Δy‖` holds for the freshly updated dual
//! variables. The objective is evaluated every [`EVAL_EVERY`] iterations.

use super::objective::primal_dual;
use super::state::PdState;
use super::{PdKernels, SolveReport, Termination};
use crate::error::{ReconError, Result};
use crate::kernels::KernelParams;
use crate::volume::Volume;

/// Objective evaluation interval
pub const EVAL_EVERY: usize = 10;

const BETA_LINE: f64 = 400.0;
const THETA_LINE: f64 = 1.0;
/// Step shrink factor of the backtracking
const MU_LINE: f64 = 0.5;

/// Initial primal step: `1/‖K‖` bound of the TV and TGV operators
fn initial_tau(tgv: bool) -> f64 {
    if tgv {
        1.0 / (0.5 * (18.0 + 33f64.sqrt())).sqrt()
    } else {
        1.0 / 8f64.sqrt()
    }
}

/// Budget and stopping rule of one solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PdSettings {
    pub iters: usize,
    pub tol: f64,
    pub stag: f64,
    /// Gauss-Newton objective at the linearization point, normalizes the primal test
    pub fval_init: f64,
}

/// One objective evaluation, handed to the progress callback
pub struct Evaluation<'a> {
    pub iteration: usize,
    pub primal: f64,
    pub dual: f64,
    pub gap: f64,
    pub x: &'a Volume,
}

pub fn solve(
    kernels: &dyn PdKernels,
    state: &mut PdState,
    params: KernelParams,
    settings: &PdSettings,
) -> Result<SolveReport> {
    solve_with_progress(kernels, state, params, settings, |_| {})
}

/// Primal-dual solve with progress callback
///
/// `params` carries the regularization weights; step sizes are set here.
/// The state holds the final iterate in its current slots on return.
pub fn solve_with_progress<F>(
    kernels: &dyn PdKernels,
    state: &mut PdState,
    mut params: KernelParams,
    settings: &PdSettings,
    mut progress: F,
) -> Result<SolveReport>
where
    F: FnMut(&Evaluation<'_>),
{
    if !(params.delta > 0.0) || !params.delta.is_finite() {
        return Err(ReconError::Config(format!("proximal weight delta must be positive, got {}", params.delta)));
    }
    let mut tau = initial_tau(state.is_tgv());
    let mut beta_line = BETA_LINE;
    let mut theta_line = THETA_LINE;
    let mu = 1.0 / params.delta as f64;

    kernels.warmup(state, &params)?;

    let mut report = SolveReport {
        termination: Termination::Exhausted,
        iterations: 0,
        primal: 0.0,
        dual: 0.0,
        gap: 0.0,
    };
    let mut primal_prev = 0.0f64;
    let mut gap_init = 0.0f64;
    let mut gap_old = 0.0f64;

    for i in 0..settings.iters {
        params.tau = tau as f32;
        kernels.primal(state, &params)?;

        let beta_new = beta_line * (1.0 + mu * tau);
        let mut tau_new = tau * (beta_line / beta_new * (1.0 + theta_line)).sqrt();
        beta_line = beta_new;

        loop {
            theta_line = tau_new / tau;
            params.theta = theta_line as f32;
            params.sigma = (beta_line * tau_new) as f32;

            let norms = kernels.dual(state, &params)?;
            if !norms.lhs.is_finite() || !norms.ynorm.is_finite() {
                return Err(ReconError::Numerical(format!("non-finite line-search norms at iteration {}", i)));
            }
            if beta_line.sqrt() * tau_new * norms.lhs.abs().sqrt() <= norms.ynorm.abs().sqrt() {
                break;
            }
            tau_new *= MU_LINE;
        }

        state.flip();
        tau = tau_new;
        report.iterations = i + 1;

        if i % EVAL_EVERY != 0 {
            continue;
        }

        let (primal, dual) = primal_dual(state, &params);
        let gap = (primal - dual).abs();
        if i == 0 {
            gap_init = gap;
        }
        report.primal = primal;
        report.dual = dual;
        report.gap = gap;

        log::debug!(
            "iteration {}: primal {:.3e}, dual {:.3e}, gap {:.3e}, tau {:.3e}",
            i,
            primal,
            dual,
            gap,
            tau
        );
        progress(&Evaluation { iteration: i, primal, dual, gap, x: state.x.current() });

        if (primal_prev - primal).abs() / settings.fval_init < settings.tol {
            report.termination = Termination::Converged;
            break;
        }
        primal_prev = primal;
        if gap > gap_old * settings.stag && i > 1 {
            report.termination = Termination::Stagnated;
            break;
        }
        if (gap - gap_old).abs() / gap_init < settings.tol {
            report.termination = Termination::Converged;
            break;
        }
        gap_old = gap;
    }

    log::info!(
        "primal-dual solve ended ({:?}) after {} iterations: primal {:.3e}, gap {:.3e}",
        report.termination,
        report.iterations,
        report.primal,
        report.gap
    );
    Ok(report)
}
