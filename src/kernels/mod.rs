//! Per-chunk compute kernels
//!
//! An [`Operator`] maps a fixed-arity tuple of input chunks to one output
//! chunk. It is stateless apart from immutable setup data (an encoding, FFT
//! plans) and never owns volumes: the streaming layer hands it slice ranges
//! of whole volumes, including halo slices, together with a
//! [`ChunkContext`] describing where the chunk sits and which device
//! constants apply.
//!
//! Kernels:
//! - Finite differences: gradient, symmetrized gradient, `Kyk2` update
//! - Primal-dual updates: primal prox, `v`, `z1` (TV/TGV), `z2`, `r`
//! - Encoding: forward, adjoint, transform-only, image projection

pub mod encode;
pub mod gradient;
pub mod update;

pub use encode::*;
pub use gradient::*;
pub use update::*;

use crate::streaming::device::DeviceConstants;
use crate::utils::gradient::SlabGeometry;
use crate::volume::{Cpx, Shape};

/// Scalar coefficients of one kernel invocation
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KernelParams {
    /// Primal step size
    pub tau: f32,
    /// Proximal weight of the linearization anchor
    pub delta: f32,
    /// Dual step size
    pub sigma: f32,
    /// Extrapolation factor
    pub theta: f32,
    /// First-order regularization weight
    pub alpha: f32,
    /// Second-order (symmetrized gradient) weight
    pub beta: f32,
    /// H1 weight
    pub omega: f32,
    /// Data-fidelity weight
    pub lambd: f32,
}

/// Where a chunk sits in the volume and which constants apply to it
pub struct ChunkContext<'a> {
    /// Global index of the chunk's first (halo) slice
    pub first_slice: usize,
    pub total_slices: usize,
    /// Local output shape (halo included)
    pub out_shape: Shape,
    /// Local input shapes (halo included)
    pub in_shapes: &'a [Shape],
    pub constants: &'a DeviceConstants,
}

impl<'a> ChunkContext<'a> {
    /// Context covering a whole volume in one piece
    pub fn whole(out_shape: Shape, in_shapes: &'a [Shape], constants: &'a DeviceConstants) -> Self {
        Self { first_slice: 0, total_slices: out_shape.slices, out_shape, in_shapes, constants }
    }

    pub fn geometry(&self) -> SlabGeometry {
        SlabGeometry {
            first_slice: self.first_slice,
            total_slices: self.total_slices,
            dz: self.constants.dz,
        }
    }

    /// Number of local slices (halo included)
    #[inline]
    pub fn slices(&self) -> usize {
        self.out_shape.slices
    }
}

/// Stateless per-chunk kernel
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of input chunks `apply` reads
    fn arity(&self) -> usize;

    /// Compute `out` from `inputs` for one chunk
    ///
    /// Buffers have the local shapes given in `ctx`; the streaming layer
    /// validates them before dispatch.
    fn apply(&self, ctx: &ChunkContext<'_>, out: &mut [Cpx], inputs: &[&[Cpx]], params: &KernelParams);
}
