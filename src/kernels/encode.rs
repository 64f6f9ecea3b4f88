//! Encoding kernels
//!
//! The linearized forward operator is `A x = E(J x)`: the Jacobian
//! projects the unknowns onto one image per scan
//! (`img[n] = Σ_u J[u·NScan + n] · x[u]`) and the encoding maps the images to
//! data. All kernels here are per-slice and therefore exact on halo slices,
//! except for the divergence term of the adjoint kernels.

use std::sync::Arc;

use super::{ChunkContext, KernelParams, Operator};
use crate::encoding::Encoding;
use crate::utils::gradient::div_inplace;
use crate::volume::{Cpx, Shape, ZERO};

/// `img[s, n] = Σ_u J[s, u·NScan + n] · x[s, u]`
fn project(img: &mut [Cpx], x: &[Cpx], jac: &[Cpx], x_shape: Shape, scans: usize) {
    let (nu, plane) = (x_shape.channels, x_shape.plane());
    img.fill(ZERO);
    for s in 0..x_shape.slices {
        for u in 0..nu {
            let xu = &x[(s * nu + u) * plane..(s * nu + u + 1) * plane];
            for n in 0..scans {
                let j0 = (s * nu * scans + u * scans + n) * plane;
                let target = &mut img[(s * scans + n) * plane..(s * scans + n + 1) * plane];
                for ((t, &xv), &jv) in target.iter_mut().zip(xu).zip(&jac[j0..j0 + plane]) {
                    *t += jv * xv;
                }
            }
        }
    }
}

/// `out[s, u] = Σ_n conj(J[s, u·NScan + n]) · img[s, n] - div z1`
fn back_project_minus_div(ctx: &ChunkContext<'_>, out: &mut [Cpx], img: &[Cpx], z1: &[Cpx], jac: &[Cpx], scans: usize) {
    let grid = ctx.out_shape;
    let (nu, plane) = (grid.channels, grid.plane());

    div_inplace(out, z1, grid, &ctx.geometry(), &ctx.constants.ratio);
    for v in out.iter_mut() {
        *v = -*v;
    }
    for s in 0..grid.slices {
        for u in 0..nu {
            let target = &mut out[(s * nu + u) * plane..(s * nu + u + 1) * plane];
            for n in 0..scans {
                let j0 = (s * nu * scans + u * scans + n) * plane;
                let image = &img[(s * scans + n) * plane..(s * scans + n + 1) * plane];
                for ((t, &iv), &jv) in target.iter_mut().zip(image).zip(&jac[j0..j0 + plane]) {
                    *t += jv.conj() * iv;
                }
            }
        }
    }
}

/// Number of scans encoded by a Jacobian of shape `jac` for `unknowns` unknowns
#[inline]
fn scans_of(jac: Shape, unknowns: usize) -> usize {
    jac.channels / unknowns.max(1)
}

/// `[x, C, J] -> E(J x)`
pub struct ForwardOp {
    encoding: Arc<dyn Encoding>,
}

impl ForwardOp {
    pub fn new(encoding: Arc<dyn Encoding>) -> Self {
        Self { encoding }
    }
}

impl Operator for ForwardOp {
    fn arity(&self) -> usize {
        3
    }

    fn name(&self) -> &'static str {
        "forward"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let (x, coils, jac) = (inputs[0], inputs[1], inputs[2]);
        let x_shape = ctx.in_shapes[0];
        let scans = scans_of(ctx.in_shapes[2], x_shape.channels);

        let mut img = vec![ZERO; x_shape.slices * scans * x_shape.plane()];
        project(&mut img, x, jac, x_shape, scans);
        self.encoding.forward(out, &img, coils, ctx.slices());
    }
}

/// `[r, z1, C, J] -> Jᴴ Eᴴ r - div z1`
///
/// [`AdjointOp::with_reference`] takes the previous `Kyk1` as a fifth input
/// so the stage can report `‖Kyk1_new - Kyk1‖²` as its adjoint norm.
pub struct AdjointOp {
    encoding: Arc<dyn Encoding>,
    reference: bool,
}

impl AdjointOp {
    pub fn new(encoding: Arc<dyn Encoding>) -> Self {
        Self { encoding, reference: false }
    }

    pub fn with_reference(encoding: Arc<dyn Encoding>) -> Self {
        Self { encoding, reference: true }
    }
}

impl Operator for AdjointOp {
    fn arity(&self) -> usize {
        4 + self.reference as usize
    }

    fn name(&self) -> &'static str {
        "adjoint"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let (r, z1, coils, jac) = (inputs[0], inputs[1], inputs[2], inputs[3]);
        let grid = ctx.out_shape;
        let scans = scans_of(ctx.in_shapes[3], grid.channels);

        let mut img = vec![ZERO; grid.slices * scans * grid.plane()];
        self.encoding.adjoint(&mut img, r, coils, ctx.slices());
        back_project_minus_div(ctx, out, &img, z1, jac, scans);
    }
}

/// `[img, C] -> E(img)`, the encoding alone
pub struct TransformOp {
    encoding: Arc<dyn Encoding>,
}

impl TransformOp {
    pub fn new(encoding: Arc<dyn Encoding>) -> Self {
        Self { encoding }
    }
}

impl Operator for TransformOp {
    fn arity(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "transform"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        self.encoding.forward(out, inputs[0], inputs[1], ctx.slices());
    }
}

/// `[x, J] -> J x`, one image per scan
pub struct ImageProjection;

impl Operator for ImageProjection {
    fn arity(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "image projection"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let x_shape = ctx.in_shapes[0];
        let scans = ctx.out_shape.channels;
        project(out, inputs[0], inputs[1], x_shape, scans);
    }
}

/// `[img, z1, J] -> Jᴴ img - div z1`, the adjoint kernel for images that
/// were already brought back from data space (SMS)
pub struct KykFromImage {
    reference: bool,
}

impl KykFromImage {
    pub fn new() -> Self {
        Self { reference: false }
    }

    pub fn with_reference() -> Self {
        Self { reference: true }
    }
}

impl Default for KykFromImage {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for KykFromImage {
    fn arity(&self) -> usize {
        3 + self.reference as usize
    }

    fn name(&self) -> &'static str {
        "kyk1 from image"
    }

    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], _params: &KernelParams) {
        let scans = ctx.in_shapes[0].channels;
        back_project_minus_div(ctx, out, inputs[0], inputs[1], inputs[2], scans);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::random;
    use crate::encoding::{Cartesian, ImageSpace};
    use crate::streaming::device::DeviceConstants;
    use crate::utils::gradient::{grad_inplace, SlabGeometry};
    use crate::utils::simd_ops::dot_conj;

    /// `<A x, r> + <∇x, z1> == <x, Aᴴr - div z1>` since `div = -∇ᴴ`
    #[test]
    fn test_forward_adjoint_pair() {
        let (slices, unknowns, scans, coils, rows, cols) = (3, 2, 2, 2, 4, 4);
        let plane = rows * cols;
        let encoding: Arc<dyn Encoding> = Arc::new(Cartesian::fully_sampled(scans, coils, rows, cols));
        let mut constants = DeviceConstants::new(unknowns, unknowns, 1.0);
        constants.ratio = vec![1.0, 0.5];

        let u = Shape::new(slices, unknowns, rows, cols, 1);
        let g = u.with_comps(3);
        let c = Shape::new(slices, coils, rows, cols, 1);
        let j = Shape::new(slices, unknowns * scans, rows, cols, 1);
        let d = Shape::new(slices, scans * coils, rows, cols, 1);

        let x = random(u.len(), 1);
        let sens = random(c.len(), 2);
        let jac = random(j.len(), 3);
        let r = random(d.len(), 4);
        let z1 = random(g.len(), 5);
        assert_eq!(d.len(), slices * scans * coils * plane);

        let fwd_shapes = [u, c, j];
        let mut ax = vec![ZERO; d.len()];
        ForwardOp::new(encoding.clone()).apply(
            &ChunkContext::whole(d, &fwd_shapes, &constants),
            &mut ax,
            &[&x, &sens, &jac],
            &KernelParams::default(),
        );

        let adj_shapes = [d, g, c, j];
        let mut kyk1 = vec![ZERO; u.len()];
        AdjointOp::new(encoding).apply(
            &ChunkContext::whole(u, &adj_shapes, &constants),
            &mut kyk1,
            &[&r, &z1, &sens, &jac],
            &KernelParams::default(),
        );

        let mut gx = vec![ZERO; g.len()];
        grad_inplace(&mut gx, &x, u, &SlabGeometry::whole(slices, 1.0), &constants.ratio);

        let lhs = dot_conj(&ax, &r) + dot_conj(&gx, &z1);
        let rhs = dot_conj(&x, &kyk1);
        let rel_err = (lhs - rhs).norm() / (lhs.norm() + rhs.norm() + 1e-10);
        assert!(rel_err < 1e-4, "Adjoint property failed: lhs={}, rhs={}, rel_err={}", lhs, rhs, rel_err);
    }

    #[test]
    fn test_image_projection_matches_forward_in_image_space() {
        let (slices, unknowns, scans, rows, cols) = (2, 2, 3, 2, 3);
        let encoding: Arc<dyn Encoding> = Arc::new(ImageSpace::new(scans, rows, cols));
        let constants = DeviceConstants::new(unknowns, unknowns, 1.0);
        let u = Shape::new(slices, unknowns, rows, cols, 1);
        let j = Shape::new(slices, unknowns * scans, rows, cols, 1);
        let img = Shape::new(slices, scans, rows, cols, 1);
        let c = Shape::new(slices, 1, rows, cols, 1);

        let x = random(u.len(), 7);
        let jac = random(j.len(), 8);
        let ones = vec![Cpx::new(1.0, 0.0); c.len()];

        let proj_shapes = [u, j];
        let mut projected = vec![ZERO; img.len()];
        ImageProjection.apply(
            &ChunkContext::whole(img, &proj_shapes, &constants),
            &mut projected,
            &[&x, &jac],
            &KernelParams::default(),
        );

        let fwd_shapes = [u, c, j];
        let mut forward = vec![ZERO; img.len()];
        ForwardOp::new(encoding).apply(
            &ChunkContext::whole(img, &fwd_shapes, &constants),
            &mut forward,
            &[&x, &ones, &jac],
            &KernelParams::default(),
        );

        assert_eq!(projected, forward);

        // x = (1, 0) picks the first unknown's Jacobian rows
        let plane = rows * cols;
        let mut e0 = vec![ZERO; u.len()];
        for s in 0..slices {
            e0[s * unknowns * plane..(s * unknowns + 1) * plane].fill(Cpx::new(1.0, 0.0));
        }
        ImageProjection.apply(
            &ChunkContext::whole(img, &proj_shapes, &constants),
            &mut projected,
            &[&e0, &jac],
            &KernelParams::default(),
        );
        for s in 0..slices {
            for n in 0..scans {
                let got = &projected[(s * scans + n) * plane..(s * scans + n + 1) * plane];
                let j0 = (s * unknowns * scans + n) * plane;
                assert_eq!(got, &jac[j0..j0 + plane]);
            }
        }
    }

    #[test]
    fn test_kyk_from_image_matches_adjoint_in_image_space() {
        let (slices, unknowns, scans, rows, cols) = (2, 1, 2, 3, 3);
        let encoding: Arc<dyn Encoding> = Arc::new(ImageSpace::new(scans, rows, cols));
        let constants = DeviceConstants::new(unknowns, unknowns, 1.0);
        let u = Shape::new(slices, unknowns, rows, cols, 1);
        let g = u.with_comps(3);
        let j = Shape::new(slices, unknowns * scans, rows, cols, 1);
        let img = Shape::new(slices, scans, rows, cols, 1);
        let c = Shape::new(slices, 1, rows, cols, 1);

        let r = random(img.len(), 1);
        let z1 = random(g.len(), 2);
        let jac = random(j.len(), 3);
        let ones = vec![Cpx::new(1.0, 0.0); c.len()];

        let adj_shapes = [img, g, c, j];
        let mut a = vec![ZERO; u.len()];
        AdjointOp::new(encoding).apply(
            &ChunkContext::whole(u, &adj_shapes, &constants),
            &mut a,
            &[&r, &z1, &ones, &jac],
            &KernelParams::default(),
        );

        let kyk_shapes = [img, g, j];
        let mut b = vec![ZERO; u.len()];
        KykFromImage::new().apply(
            &ChunkContext::whole(u, &kyk_shapes, &constants),
            &mut b,
            &[&r, &z1, &jac],
            &KernelParams::default(),
        );

        assert_eq!(a, b);
    }
}
