//! Finite-difference kernels
//!
//! Thin chunk wrappers around [`crate::utils::gradient`]; the chunk's
//! position in the volume comes from the [`ChunkContext`] so the global
//! boundaries get zero boundary conditions.

use super::{ChunkContext, KernelParams, Operator};
use crate::utils::gradient::{grad_inplace, symdiv_inplace, symgrad_inplace};
use crate::volume::{Cpx, ZERO};

/// `[x] -> ∇x`, scaled per unknown by the device gradient ratio
pub struct Gradient;

impl Operator for Gradient {
    fn arity(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "gradient"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let grid = ctx.in_shapes[0];
        grad_inplace(out, inputs[0], grid, &ctx.geometry(), &ctx.constants.ratio);
    }
}

/// `[v] -> Ev`
pub struct SymGradient;

impl Operator for SymGradient {
    fn arity(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "symmetrized gradient"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let grid = ctx.in_shapes[0].with_comps(1);
        symgrad_inplace(out, inputs[0], grid, &ctx.geometry());
    }
}

/// `[z2, z1] -> -z1 - div_sym z2` on TGV unknowns, zero on H1 unknowns
///
/// [`UpdateKyk2::with_reference`] takes the previous `Kyk2` as a third input
/// so the stage can report `‖Kyk2_new - Kyk2‖²` as its adjoint norm.
pub struct UpdateKyk2 {
    reference: bool,
}

impl UpdateKyk2 {
    pub fn new() -> Self {
        Self { reference: false }
    }

    pub fn with_reference() -> Self {
        Self { reference: true }
    }
}

impl Default for UpdateKyk2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for UpdateKyk2 {
    fn arity(&self) -> usize {
        2 + self.reference as usize
    }

    fn name(&self) -> &'static str {
        "kyk2 update"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let grid = ctx.in_shapes[1].with_comps(1);
        let (z2, z1) = (inputs[0], inputs[1]);
        symdiv_inplace(out, z2, grid, &ctx.geometry());

        let per_unknown = 3 * grid.plane();
        let tgv = ctx.constants.unknowns_tgv;
        for (idx, chunk) in out.chunks_mut(per_unknown).enumerate() {
            let u = idx % grid.channels;
            let base = idx * per_unknown;
            if u < tgv {
                for (k, o) in chunk.iter_mut().enumerate() {
                    *o = -z1[base + k] - *o;
                }
            } else {
                chunk.fill(ZERO);
            }
        }
    }
}
