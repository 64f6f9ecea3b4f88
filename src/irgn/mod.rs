//! Iteratively regularized Gauss-Newton reconstruction
//!
//! Each Gauss-Newton step linearizes the signal model around the current
//! estimate, rebalances the unknowns, and solves the convex sub-problem
//!
//! ```text
//! min_x λ/2 ‖A (x - xk) - (data - T(S(xk)))‖² + R(x) + 1/(2δ) ‖x - xk‖²
//! ```
//!
//! with the primal-dual solver. The regularization weights follow the
//! continuation schedule of [`crate::config::IrgnConfig::reg_params`] and
//! every accepted estimate is handed to a [`ResultStore`].

pub mod balance;
pub mod strategy;

pub use balance::{balance, gradient_ratio, jacobian_norms};
pub use strategy::{select, Acquisition, ReconStrategy, SmsSetup, SmsStrategy, StreamedStrategy};

use std::sync::Arc;

use crate::config::{JobConfig, RegParams};
use crate::error::{ReconError, Result};
use crate::kernels::KernelParams;
use crate::model::Model;
use crate::solver::objective::{grad_l21, h1_norm_sqr, sym_l21};
use crate::solver::{Evaluation, Layout, PdSettings, PdState, SolveReport, WarmStart};
use crate::store::ResultStore;
use crate::streaming::{DeviceConstants, DevicePool};
use crate::utils::gradient::{grad_inplace, symgrad_inplace, SlabGeometry};
use crate::utils::simd_ops::diff_norm_sqr;
use crate::volume::Volume;

/// Outcome of one Gauss-Newton step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnStep {
    pub step: usize,
    /// Gauss-Newton objective at the new estimate
    pub fval: f64,
    pub solve: SolveReport,
}

/// Result of a reconstruction job
#[derive(Debug)]
pub struct ReconOutcome {
    /// Final estimate in physical units, unknown-major
    pub result: Volume,
    /// Objective at the initial guess after the step-0 rebalancing
    pub fval_init: f64,
    pub steps: Vec<GnStep>,
    /// True if the objective decrease fell below `tol` before `max_gn_it`
    pub converged: bool,
}

/// Primal-dual weights of one step
fn kernel_params(reg: &RegParams) -> KernelParams {
    KernelParams {
        delta: reg.delta,
        alpha: reg.gamma,
        beta: 2.0 * reg.gamma,
        omega: reg.omega,
        lambd: reg.lambd,
        ..Default::default()
    }
}

/// Model output in the slice-major layout with non-finite values zeroed
fn sanitized(mut vol: Volume, what: &str) -> Volume {
    let replaced = vol.sanitize();
    if replaced > 0 {
        log::warn!("{}: replaced {} non-finite values by zero", what, replaced);
    }
    vol.swap_outer_axes()
}

/// Model signal at the slice-major estimate `x`
fn forward_images(model: &dyn Model, x: &Volume) -> Volume {
    sanitized(model.execute_forward(&x.swap_outer_axes()), "model signal")
}

/// Gauss-Newton objective
///
/// `λ/2 ‖data - T(S(x))‖² + γ Σ|∇x - v| + 2γ Σ|E v| + ω/2 ‖∇x_H1‖²`, with
/// the gradient weighted by the device ratio and the joint norms of the
/// primal-dual solver.
fn gn_objective(
    strategy: &dyn ReconStrategy,
    data: &Volume,
    step_val: &Volume,
    x: &Volume,
    v: Option<&Volume>,
    reg: &RegParams,
    constants: &DeviceConstants,
) -> Result<f64> {
    let layout = strategy.layout();
    let signal = strategy.transform(step_val)?;
    let misfit = diff_norm_sqr(data.as_slice(), signal.as_slice());

    let geom = SlabGeometry::whole(layout.slices(), constants.dz);
    let mut gradx = Volume::zeros(layout.grad);
    grad_inplace(gradx.as_mut_slice(), x.as_slice(), layout.unknowns, &geom, &constants.ratio);

    let tgv = constants.unknowns_tgv;
    let gamma = reg.gamma as f64;
    let reg_term = match v {
        Some(v) => {
            let mut ev = Volume::zeros(layout.sym);
            symgrad_inplace(ev.as_mut_slice(), v.as_slice(), layout.unknowns, &geom);
            gamma * grad_l21(&gradx, Some(v), tgv) + 2.0 * gamma * sym_l21(&ev, tgv)
        }
        None => gamma * grad_l21(&gradx, None, tgv),
    };

    Ok(reg.lambd as f64 / 2.0 * misfit + reg_term + reg.omega as f64 / 2.0 * h1_norm_sqr(&gradx, tgv))
}

/// Run a reconstruction job
///
/// `model` supplies the initial guess (unknown-major) and its constraints
/// and scales are updated in place. Every step's estimate is persisted in
/// physical units under [`crate::config::Regularizer::dataset_name`].
pub fn reconstruct(
    config: &JobConfig,
    model: &mut dyn Model,
    acq: &Acquisition,
    store: &mut dyn ResultStore,
) -> Result<ReconOutcome> {
    if config.reco_2d {
        return Err(ReconError::Unimplemented("2D reconstruction; reconstruct a single slice in 3D instead"));
    }
    config.irgn.validate()?;
    let mut irgn = config.irgn.clone();
    irgn.lambd *= irgn.snr_est;

    let unknowns = model.unknowns();
    let unknowns_tgv = model.unknowns_tgv().min(unknowns);
    let guess = model.guess();
    let gs = guess.shape();
    if gs.slices != unknowns || gs.comps != 1 {
        return Err(ReconError::Shape(format!("initial guess {:?} does not hold {} unknowns", gs, unknowns)));
    }
    if model.constraints().len() != unknowns || model.uk_scale().len() != unknowns {
        return Err(ReconError::Config("model needs one constraint and one scale per unknown".into()));
    }
    let slices = gs.channels;

    let pool = Arc::new(DevicePool::new(
        config.stream.num_dev,
        config.stream.queues_per_device,
        DeviceConstants::new(unknowns, unknowns_tgv, acq.dz),
    )?);
    let strategy = strategy::select(config, acq, slices, unknowns, gs.rows, gs.cols, Arc::clone(&pool))?;
    let layout: Layout = *strategy.layout();
    pool.set_constraints(model.constraints());

    let mut x = guess.swap_outer_axes();
    let mut warm = WarmStart::zeros(&layout, config.regularizer);

    let mut iters = irgn.start_iters;
    let mut fval_init = f64::MIN_POSITIVE;
    let mut fval_old: Option<f64> = None;
    let mut steps = Vec::new();
    let mut converged = false;

    for n in 0..irgn.max_gn_it {
        let mut jac = sanitized(model.execute_gradient(&x.swap_outer_axes()), "model jacobian");
        let scales = balance(model, &mut x, &mut jac, layout.scans());
        log::debug!("GN step {}: balancing factors {:?}", n, scales);

        let ratio = gradient_ratio(&x, unknowns_tgv, acq.dz);
        log::debug!("GN step {}: gradient ratio {:?}", n, ratio);
        pool.set_ratio(&ratio);
        pool.set_constraints(model.constraints());

        let step_val = forward_images(model, &x);
        let reg = irgn.reg_params(n, x.norm());
        if !(reg.delta > 0.0) || !reg.delta.is_finite() {
            return Err(ReconError::Config(format!(
                "GN step {}: proximal weight delta={} is not positive; the estimate has norm {:.3e}",
                n,
                reg.delta,
                x.norm()
            )));
        }
        if n == 0 {
            fval_init = gn_objective(strategy.as_ref(), &acq.data, &step_val, &x, warm.v.as_ref(), &reg, &pool.constants())?
                .max(f64::MIN_POSITIVE);
            log::info!("objective at the balanced initial guess: {:.6e}", fval_init);
        }
        let res = acq.data.sub(&strategy.transform(&step_val)?)?.add(&strategy.linearized(&x, &jac)?)?;

        let mut state = PdState::new(&layout, unknowns_tgv, x, res, &warm)?;
        let settings = PdSettings {
            iters,
            tol: irgn.tol as f64,
            stag: irgn.stag as f64,
            fval_init,
        };

        let solve = {
            let viewer: &dyn Model = &*model;
            let mut progress = |e: &Evaluation<'_>| {
                if irgn.display_iterations {
                    viewer.plot_unknowns(&viewer.rescale(&e.x.swap_outer_axes()));
                }
            };
            strategy.solve(&mut state, &jac, kernel_params(&reg), &settings, &mut progress)?
        };
        state.store_warm_start(&mut warm);
        x = state.x.into_current();
        iters = (2 * iters).min(irgn.max_iters);

        let step_val = forward_images(model, &x);
        let fval = gn_objective(strategy.as_ref(), &acq.data, &step_val, &x, warm.v.as_ref(), &reg, &pool.constants())?;
        store.write(&config.regularizer.dataset_name(n), &model.rescale(&x.swap_outer_axes()), fval)?;

        log::info!(
            "GN step {}: objective {:.6e} ({:.3} of initial), gamma {:.3e}, delta {:.3e}, {:?} after {} iterations",
            n,
            fval,
            fval / fval_init,
            reg.gamma,
            reg.delta,
            solve.termination,
            solve.iterations
        );
        steps.push(GnStep { step: n, fval, solve });

        if (fval_old.unwrap_or(fval_init) - fval).abs() / fval_init < irgn.tol as f64 {
            log::info!("terminated at GN step {}: objective decrease below {:.3e}", n, irgn.tol);
            converged = true;
            break;
        }
        fval_old = Some(fval);
    }

    Ok(ReconOutcome { result: model.rescale(&x.swap_outer_axes()), fval_init, steps, converged })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_params_from_schedule() {
        let reg = RegParams { lambd: 5.0, gamma: 0.3, omega: 0.1, delta: 2.0, delta_max: 4.0 };
        let p = kernel_params(&reg);

        assert_eq!(p.alpha, 0.3);
        assert!((p.beta - 0.6).abs() < 1e-7);
        assert_eq!(p.lambd, 5.0);
        assert_eq!(p.delta, 2.0);
        assert_eq!(p.omega, 0.1);
        assert_eq!(p.tau, 0.0);
    }
}
