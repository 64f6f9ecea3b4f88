//! Primal-dual update kernels
//!
//! All updates are pointwise in the slice direction, so halo slices of a
//! chunk come out exact and can feed connected stages. The dual variables
//! of the TV/TGV term are projected jointly per voxel over all TGV
//! unknowns and components; the H1 block of `z1` gets the prox of the
//! quadratic penalty instead.

use super::{ChunkContext, KernelParams, Operator};
use crate::utils::gradient::sym_norm_sqr;
use crate::volume::{Cpx, ZERO};

/// Scale factor that maps a vector of norm `sqrt(norm_sqr)` into the ball of radius `threshold`
#[inline]
fn ball_scale(norm_sqr: f32, threshold: f32) -> f32 {
    let norm = norm_sqr.sqrt();
    if norm > threshold {
        threshold / norm
    } else {
        1.0
    }
}

/// Extrapolated difference `(1+θ)·new - θ·old`
#[inline]
fn extrapolate(new: Cpx, old: Cpx, theta: f32) -> Cpx {
    new * (1.0 + theta) - old * theta
}

/// `[x, Kyk1, xk] -> proj_C((x - τ·Kyk1 + (τ/δ)·xk) / (1 + τ/δ))`
pub struct UpdatePrimal;

impl Operator for UpdatePrimal {
    fn arity(&self) -> usize {
        3
    }

    fn name(&self) -> &'static str {
        "primal update"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams) {
        let (x, kyk1, xk) = (inputs[0], inputs[1], inputs[2]);
        let shape = ctx.out_shape;
        let plane = shape.plane();
        let tau = params.tau;
        let tau_delta = tau / params.delta;
        let denom = 1.0 / (1.0 + tau_delta);

        for (idx, block) in out.chunks_mut(plane).enumerate() {
            let constraint = &ctx.constants.constraints[idx % shape.channels];
            let base = idx * plane;
            for (i, o) in block.iter_mut().enumerate() {
                let j = base + i;
                let value = (x[j] - kyk1[j] * tau + xk[j] * tau_delta) * denom;
                *o = constraint.project(value);
            }
        }
    }
}

/// `[v, Kyk2] -> v - τ·Kyk2` on TGV unknowns, zero on H1 unknowns
pub struct UpdateV;

impl Operator for UpdateV {
    fn arity(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "v update"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams) {
        let (v, kyk2) = (inputs[0], inputs[1]);
        let shape = ctx.out_shape;
        let block_len = shape.plane() * shape.comps;
        let tgv = ctx.constants.unknowns_tgv;

        for (idx, block) in out.chunks_mut(block_len).enumerate() {
            if idx % shape.channels >= tgv {
                block.fill(ZERO);
                continue;
            }
            let base = idx * block_len;
            for (i, o) in block.iter_mut().enumerate() {
                *o = v[base + i] - kyk2[base + i] * params.tau;
            }
        }
    }
}

/// Dual update of the gradient variable
///
/// TGV inputs `[z1, ∇x_new, ∇x, v_new, v]`, TV inputs `[z1, ∇x_new, ∇x]`.
/// TGV unknowns are projected jointly onto the ball of radius `α`, H1
/// unknowns are divided by `1 + σ/ω`.
pub struct UpdateZ1 {
    pub tgv: bool,
}

impl UpdateZ1 {
    pub fn tgv() -> Self {
        Self { tgv: true }
    }

    pub fn tv() -> Self {
        Self { tgv: false }
    }
}

impl Operator for UpdateZ1 {
    fn arity(&self) -> usize {
        if self.tgv {
            5
        } else {
            3
        }
    }

    fn name(&self) -> &'static str {
        if self.tgv {
            "z1 update (tgv)"
        } else {
            "z1 update (tv)"
        }
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams) {
        let (z1, gx_new, gx) = (inputs[0], inputs[1], inputs[2]);
        let shape = ctx.out_shape;
        let (nu, plane) = (shape.channels, shape.plane());
        let tgv = ctx.constants.unknowns_tgv;
        let (sigma, theta) = (params.sigma, params.theta);

        let h1_factor = if params.omega > 0.0 { 1.0 / (1.0 + sigma / params.omega) } else { 0.0 };

        for s in 0..shape.slices {
            for p in 0..plane {
                let mut norm_sqr = 0.0f32;
                for u in 0..nu {
                    let v0 = ((s * nu + u) * plane + p) * 3;
                    for k in v0..v0 + 3 {
                        let mut step = extrapolate(gx_new[k], gx[k], theta);
                        if self.tgv && u < tgv {
                            step -= extrapolate(inputs[3][k], inputs[4][k], theta);
                        }
                        let t = z1[k] + step * sigma;
                        if u < tgv {
                            norm_sqr += t.norm_sqr();
                            out[k] = t;
                        } else {
                            out[k] = t * h1_factor;
                        }
                    }
                }

                if tgv == 0 {
                    continue;
                }
                let scale = if params.alpha > 0.0 { ball_scale(norm_sqr, params.alpha) } else { 0.0 };
                if scale != 1.0 {
                    for u in 0..tgv {
                        let v0 = ((s * nu + u) * plane + p) * 3;
                        for o in &mut out[v0..v0 + 3] {
                            *o *= scale;
                        }
                    }
                }
            }
        }
    }
}

/// `[z2, Ev_new, Ev] -> proj_β(z2 + σ((1+θ)Ev_new - θEv))` jointly over TGV unknowns
pub struct UpdateZ2;

impl Operator for UpdateZ2 {
    fn arity(&self) -> usize {
        3
    }

    fn name(&self) -> &'static str {
        "z2 update"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams) {
        let (z2, ev_new, ev) = (inputs[0], inputs[1], inputs[2]);
        let shape = ctx.out_shape;
        let (nu, plane) = (shape.channels, shape.plane());
        let tgv = ctx.constants.unknowns_tgv;
        let (sigma, theta) = (params.sigma, params.theta);

        for s in 0..shape.slices {
            for p in 0..plane {
                let mut norm_sqr = 0.0f32;
                for u in 0..nu {
                    let v0 = ((s * nu + u) * plane + p) * 6;
                    if u >= tgv {
                        out[v0..v0 + 6].fill(ZERO);
                        continue;
                    }
                    for k in v0..v0 + 6 {
                        out[k] = z2[k] + extrapolate(ev_new[k], ev[k], theta) * sigma;
                    }
                    norm_sqr += sym_norm_sqr(&out[v0..v0 + 6]);
                }

                if tgv == 0 {
                    continue;
                }
                let scale = if params.beta > 0.0 { ball_scale(norm_sqr, params.beta) } else { 0.0 };
                if scale != 1.0 {
                    for u in 0..tgv {
                        let v0 = ((s * nu + u) * plane + p) * 6;
                        for o in &mut out[v0..v0 + 6] {
                            *o *= scale;
                        }
                    }
                }
            }
        }
    }
}

/// `[r, Ax_new, Ax, res] -> (r + σ((1+θ)Ax_new - θAx - res)) / (1 + σ/λ)`
pub struct UpdateR;

impl Operator for UpdateR {
    fn arity(&self) -> usize {
        4
    }

    fn name(&self) -> &'static str {
        "r update"
    }

    fn apply(&self, _ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams) {
        let (r, ax_new, ax, res) = (inputs[0], inputs[1], inputs[2], inputs[3]);
        let (sigma, theta) = (params.sigma, params.theta);
        let denom = 1.0 / (1.0 + sigma / params.lambd);

        for (j, o) in out.iter_mut().enumerate() {
            *o = (r[j] + (extrapolate(ax_new[j], ax[j], theta) - res[j]) * sigma) * denom;
        }
    }
}
