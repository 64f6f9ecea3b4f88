//! Primal and dual objective of the linearized sub-problem
//!
//! Norms of the TV/TGV terms are taken jointly per voxel over all TGV
//! unknowns and components, matching the dual projections of the update
//! kernels.

use super::state::PdState;
use crate::kernels::KernelParams;
use crate::utils::gradient::sym_norm_sqr;
use crate::utils::simd_ops::{diff_norm_sqr, dot_re, norm_sqr};
use crate::volume::Volume;

/// `Σ_voxel sqrt(Σ_{u < tgv, k} |g - v|²)`
pub(crate) fn grad_l21(gradx: &Volume, v: Option<&Volume>, unknowns_tgv: usize) -> f64 {
    let shape = gradx.shape();
    let (nu, plane) = (shape.channels, shape.plane());
    let g = gradx.as_slice();
    let mut total = 0.0f64;

    for s in 0..shape.slices {
        for p in 0..plane {
            let mut acc = 0.0f64;
            for u in 0..unknowns_tgv.min(nu) {
                let v0 = ((s * nu + u) * plane + p) * 3;
                for k in v0..v0 + 3 {
                    let d = match v {
                        Some(v) => g[k] - v.as_slice()[k],
                        None => g[k],
                    };
                    acc += d.norm_sqr() as f64;
                }
            }
            total += acc.sqrt();
        }
    }
    total
}

/// `Σ_voxel sqrt(Σ_{u < tgv} ‖Ev_u‖_F²)`
pub(crate) fn sym_l21(ev: &Volume, unknowns_tgv: usize) -> f64 {
    let shape = ev.shape();
    let (nu, plane) = (shape.channels, shape.plane());
    let q = ev.as_slice();
    let mut total = 0.0f64;

    for s in 0..shape.slices {
        for p in 0..plane {
            let acc: f64 = (0..unknowns_tgv.min(nu))
                .map(|u| {
                    let v0 = ((s * nu + u) * plane + p) * 6;
                    sym_norm_sqr(&q[v0..v0 + 6]) as f64
                })
                .sum();
            total += acc.sqrt();
        }
    }
    total
}

/// `Σ_{u >= tgv} ‖g_u‖²` over the H1 unknowns
pub(crate) fn h1_norm_sqr(g: &Volume, unknowns_tgv: usize) -> f64 {
    let shape = g.shape();
    let block = shape.plane() * shape.comps;
    g.as_slice()
        .chunks(block)
        .enumerate()
        .filter(|(idx, _)| idx % shape.channels >= unknowns_tgv)
        .map(|(_, chunk)| norm_sqr(chunk))
        .sum()
}

/// Primal and dual value at the current iterate
pub fn primal_dual(state: &PdState, params: &KernelParams) -> (f64, f64) {
    let tgv = state.unknowns_tgv;
    let lambd = params.lambd as f64;
    let delta = params.delta as f64;
    let omega = params.omega as f64;

    let x = state.x.current();
    let gradx = state.gradx.current();
    let kyk1 = state.kyk1.current();
    let r = state.r.current();
    let z1 = state.z1.current();

    let mut primal = lambd / 2.0 * diff_norm_sqr(state.ax.current().as_slice(), state.res.as_slice())
        + 1.0 / (2.0 * delta) * diff_norm_sqr(x.as_slice(), state.xk.as_slice())
        + omega / 2.0 * h1_norm_sqr(gradx, tgv);

    match &state.tgv {
        Some(t) => {
            primal += params.alpha as f64 * grad_l21(gradx, Some(t.v.current()), tgv)
                + params.beta as f64 * sym_l21(t.ev.current(), tgv);
        }
        None => primal += params.alpha as f64 * grad_l21(gradx, None, tgv),
    }

    let mut dual = -delta / 2.0 * kyk1.norm_sqr() + dot_re(state.xk.as_slice(), kyk1.as_slice())
        - 1.0 / (2.0 * lambd) * r.norm_sqr()
        - dot_re(state.res.as_slice(), r.as_slice());
    if omega > 0.0 {
        dual -= 1.0 / (2.0 * omega) * h1_norm_sqr(z1, tgv);
    }

    (primal, dual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Cpx, Shape};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_joint_norm_over_tgv_unknowns() {
        // two unknowns, one voxel, gradients (3,0,0) and (0,4,0)
        let shape = Shape::new(1, 2, 1, 1, 3);
        let mut g = Volume::zeros(shape);
        g.as_mut_slice()[0] = Cpx::new(3.0, 0.0);
        g.as_mut_slice()[4] = Cpx::new(0.0, 4.0);

        assert_abs_diff_eq!(grad_l21(&g, None, 2), 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grad_l21(&g, None, 1), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(h1_norm_sqr(&g, 1), 16.0, epsilon = 1e-9);

        let v = g.clone();
        assert_eq!(grad_l21(&g, Some(&v), 2), 0.0);
    }

    #[test]
    fn test_sym_norm_counts_off_diagonals_twice() {
        let shape = Shape::new(1, 1, 1, 1, 6);
        let ev = Volume::filled(shape, Cpx::new(1.0, 0.0));
        assert_abs_diff_eq!(sym_l21(&ev, 1), 3.0, epsilon = 1e-6);
    }
}
